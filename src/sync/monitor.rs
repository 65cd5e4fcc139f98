//! Per-object monitors: mutual exclusion plus wait/notify on any object.
//!
//! Every object can act as a lock, but an object only needs a full-fledged
//! monitor once there is actual contention or `wait` is called on it. Until
//! then the lock state is "thin": the owner's thread id and a recursion
//! count live directly in the object's lock word (the scheme of Bacon et
//! al.'s featherweight locks). Contention, recursion overflow or a first
//! `wait` inflate the lock: a [`Monitor`] is allocated, seeded with the
//! thin state and published by compare-and-swapping the lock word. A fat
//! lock stays fat for the rest of the object's lifetime.
//!
//! The delicate case is inflating a lock some other thread holds: the
//! contender suspends the owner through the thread registry, re-reads the
//! lock word to make sure nothing changed while the suspension was in
//! flight, and only then transfers the thin state into the new monitor.
//!
//! Waiting uses each thread's personal condition variable rather than a
//! per-monitor one so `notify` can wake one specific waiter without
//! disturbing its peers; the monitor's own condition variable is reserved
//! for `enter` contention.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::errors::MonitorError;
use crate::objectmodel::reference::ObjectReference;
use crate::options;
use crate::threads::{blocked_scope, Thread, ThreadId, ThreadState, INVALID_THREAD_ID};
use crate::VirtualMachine;

use super::lock_word::{LockState, LockWord};

/// Method and bytecode offset at which a lock was first acquired, captured
/// for contention events when lock profiling is enabled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockSite {
    pub method: Arc<str>,
    pub bytecode_offset: u32,
}

impl fmt::Display for LockSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.method, self.bytecode_offset)
    }
}

/// Longest timed wait honoured; longer requests are clamped. Callers loop
/// on spurious wakeups anyway, so an early return is always permitted.
const MAX_TIMED_WAIT: Duration = Duration::from_millis(u32::MAX as u64);

fn clamp_wait_duration(ms: i64, ns: i32) -> Duration {
    Duration::from_millis(ms as u64)
        .checked_add(Duration::from_nanos(ns as u64))
        .map_or(MAX_TIMED_WAIT, |requested| requested.min(MAX_TIMED_WAIT))
}

/// Everything guarded by the monitor's internal mutex.
struct MonitorState {
    owner: Option<Arc<Thread>>,
    /// Times the owner has re-entered beyond the first acquisition.
    lock_count: u32,
    /// Threads parked in `wait`, FIFO at insertion.
    wait_set: VecDeque<Arc<Thread>>,
    /// Where the current owner first acquired the lock; profiling only.
    locking_site: Option<LockSite>,
}

fn owner_is(state: &MonitorState, thread: &Arc<Thread>) -> bool {
    state
        .owner
        .as_ref()
        .is_some_and(|owner| Arc::ptr_eq(owner, thread))
}

/// The inflated ("fat") monitor. Owned by the [`MonitorRegistry`]; lock
/// words hold its raw heap address as a non-owning handle, which is why a
/// monitor is never moved once installed and is destroyed only by the GC
/// sweep after its object died.
pub struct Monitor<VM: VirtualMachine> {
    /// Address of the protected object; rewritten by `sweep` when a
    /// relocating collector moves the object.
    object: AtomicUsize,
    state: Mutex<MonitorState>,
    /// Signalled on full release to wake one thread parked in `lock`.
    contenders: Condvar,
    marker: PhantomData<VM>,
}

impl<VM: VirtualMachine> Monitor<VM> {
    /// The caller must either be `owner` itself or have suspended `owner`;
    /// otherwise the owner could release the thin lock mid-inflation.
    fn new(self_thread: &Arc<Thread>, owner: Arc<Thread>, object: ObjectReference) -> Self {
        debug_assert!(Arc::ptr_eq(&owner, self_thread) || owner.is_suspended());
        Self {
            object: AtomicUsize::new(object.to_address()),
            state: Mutex::new(MonitorState {
                owner: Some(owner),
                lock_count: 0,
                wait_set: VecDeque::new(),
                locking_site: None,
            }),
            contenders: Condvar::new(),
            marker: PhantomData,
        }
    }

    /// # Safety
    ///
    /// `address` must come from a `FatLocked` lock word of a reachable
    /// object; the registry keeps such monitors alive and pinned.
    pub(crate) unsafe fn from_address<'a>(address: usize) -> &'a Self {
        &*(address as *const Self)
    }

    pub fn address(&self) -> usize {
        self as *const Self as usize
    }

    pub fn object(&self) -> ObjectReference {
        // Never zero once the monitor is constructed.
        unsafe { ObjectReference::from_address_unchecked(self.object.load(Ordering::Relaxed)) }
    }

    fn set_object(&self, object: ObjectReference) {
        self.object.store(object.to_address(), Ordering::Relaxed);
    }

    /// Propagates the thin-lock state into this monitor and publishes it by
    /// repointing the object's lock word. Returns false if another thread
    /// inflated first, in which case this monitor must be discarded.
    fn install(&self) -> bool {
        // Uncontended acquisition: the monitor is not yet visible to others.
        let mut state = self.state.lock();
        let owner = state.owner.clone().expect("monitor created without an owner");
        let object = self.object();
        let thin = object.lock_word();
        if thin.state() != LockState::ThinLocked {
            // The owner is suspended but another thread beat us to it.
            debug_assert_eq!(thin.state(), LockState::FatLocked);
            return false;
        }
        debug_assert_eq!(owner.id(), thin.thin_lock_owner());
        state.lock_count = thin.thin_lock_count();
        let fat = LockWord::from_monitor(self.address());
        // Publication races with other inflating threads.
        let success = object.cas_lock_word(thin, fat);
        if success && options::lock_profiling_threshold_ms() != 0 {
            state.locking_site = VM::current_location(&owner);
        }
        success
    }

    /// Blocks until the calling thread owns this monitor. Reentrant.
    pub fn lock(&self, thread: &Arc<Thread>) {
        let mut state = self.state.lock();
        loop {
            match state.owner.as_ref() {
                None => {
                    state.owner = Some(thread.clone());
                    debug_assert_eq!(state.lock_count, 0);
                    if options::lock_profiling_threshold_ms() != 0 {
                        state.locking_site = VM::current_location(thread);
                    }
                    return;
                }
                Some(owner) if Arc::ptr_eq(owner, thread) => {
                    state.lock_count += 1;
                    return;
                }
                Some(_) => {}
            }

            // Contended. Remember the owner's lock site before letting go of
            // the mutex; by the time we wake the owner may be long gone.
            let wait_start =
                (options::lock_profiling_threshold_ms() != 0).then(Instant::now);
            let owners_site = state.locking_site.clone();
            drop(state);
            blocked_scope(thread, ThreadState::Blocked, || {
                // Reacquire while out of the runnable state so the collector
                // is not kept waiting while we park.
                let mut state = self.state.lock();
                if state.owner.is_some() {
                    self.contenders.wait(&mut state);
                    if let Some(started) = wait_start {
                        self.maybe_log_contention(thread, started.elapsed(), owners_site.as_ref());
                    }
                }
            });
            state = self.state.lock();
        }
    }

    /// Samples a contended wake and emits a contention event carrying the
    /// prior owner's lock site. The probability scales linearly with the
    /// wait time up to the profiling threshold; sensitive threads always
    /// report once the percentage is non-zero.
    fn maybe_log_contention(&self, thread: &Thread, waited: Duration, owners_site: Option<&LockSite>) {
        let threshold = options::lock_profiling_threshold_ms();
        if threshold == 0 {
            return;
        }
        let wait_ms = waited.as_millis() as u64;
        let sample_percent = if wait_ms >= threshold {
            100
        } else {
            100 * wait_ms / threshold
        };
        if sample_percent == 0 {
            return;
        }
        if !options::is_sensitive_thread() && thread.next_random() % 100 >= sample_percent {
            return;
        }
        let object = self.object();
        log::info!(
            target: "monkit::contention",
            "thread {} waited {}ms (sampled at {}%) to lock {} first locked at {}",
            thread,
            wait_ms,
            sample_percent,
            VM::describe_object(object),
            owners_site.map_or_else(|| "<unknown>".to_string(), LockSite::to_string),
        );
    }

    /// Releases one level of ownership; on full release wakes a contender.
    pub fn unlock(&self, thread: &Arc<Thread>) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        if owner_is(&state, thread) {
            if state.lock_count == 0 {
                state.owner = None;
                state.locking_site = None;
                self.contenders.notify_one();
            } else {
                state.lock_count -= 1;
            }
            Ok(())
        } else {
            let found_owner = state.owner.clone();
            drop(state);
            Err(failed_unlock(
                self.object(),
                thread,
                found_owner.as_deref(),
                Some(self),
            ))
        }
    }

    /// Waits until notified, interrupted or timed out. Releases the monitor
    /// completely regardless of the recursion depth and restores that depth
    /// after re-acquiring. `why` must be one of the three wait states.
    pub fn wait(
        &self,
        thread: &Arc<Thread>,
        ms: i64,
        ns: i32,
        interrupt_allowed: bool,
        why: ThreadState,
    ) -> Result<(), MonitorError> {
        debug_assert!(why.is_in_wait(), "not a wait state: {why:?}");

        let mut state = self.state.lock();
        if !owner_is(&state, thread) {
            return Err(MonitorError::IllegalMonitorState(
                "object not locked by thread before wait()".to_owned(),
            ));
        }

        // wait(0, 0) is defined as wait(0), which is defined as wait().
        let why = if why == ThreadState::TimedWaiting && ms == 0 && ns == 0 {
            ThreadState::Waiting
        } else {
            why
        };

        if ms < 0 || !(0..=999_999).contains(&ns) {
            return Err(MonitorError::IllegalArgument(format!(
                "timeout arguments out of range: ms={ms} ns={ns}"
            )));
        }

        // Join the wait set and release our hold completely, however deep
        // the recursion; the saved depth is restored after re-acquisition.
        state.wait_set.push_back(thread.clone());
        let prev_lock_count = state.lock_count;
        state.lock_count = 0;
        state.owner = None;
        let saved_site = state.locking_site.take();

        // The collector will ignore us in this state, and we re-check for
        // pending suspensions before transitioning back.
        thread.transition_from_runnable_to_suspended(why);

        let was_interrupted;
        {
            // Pseudo-atomically release the monitor and start listening on
            // our personal condition variable: wait_monitor is published
            // before the internal mutex is released, so a notifier that
            // finds us in the wait set knows to signal wait_cond.
            let mut wait_data = thread.wait_data.lock();
            debug_assert_eq!(wait_data.wait_monitor, 0);
            wait_data.wait_monitor = self.address();
            self.contenders.notify_one();
            drop(state);

            if wait_data.interrupted {
                // Interrupted before we ever parked.
                was_interrupted = true;
            } else {
                if why == ThreadState::Waiting {
                    thread.wait_cond.wait(&mut wait_data);
                } else {
                    let _ = thread
                        .wait_cond
                        .wait_for(&mut wait_data, clamp_wait_duration(ms, ns));
                }
                was_interrupted = wait_data.interrupted;
                wait_data.interrupted = false;
            }
        }

        thread.transition_from_suspended_to_runnable();

        {
            // Cleared only after transitioning back so diagnostic dumps of
            // a waiting thread still name the monitor it waits on.
            let mut wait_data = thread.wait_data.lock();
            debug_assert_ne!(wait_data.wait_monitor, 0);
            wait_data.wait_monitor = 0;
        }

        // Re-acquire and restore the saved depth. A notifier may have
        // already unlinked us; remove ourselves only if still present.
        self.lock(thread);
        let mut state = self.state.lock();
        debug_assert!(owner_is(&state, thread));
        state.lock_count = prev_lock_count;
        state.locking_site = saved_site;
        state.wait_set.retain(|waiter| !Arc::ptr_eq(waiter, thread));
        drop(state);

        if was_interrupted {
            // "The interrupted status of the current thread is cleared when
            // this exception is thrown."
            thread.wait_data.lock().interrupted = false;
            if interrupt_allowed {
                return Err(MonitorError::Interrupted);
            }
        }
        Ok(())
    }

    /// Wakes the first waiter that has not already left on its own via
    /// timeout or interrupt. Silent when the wait set drains empty.
    pub fn notify(&self, thread: &Arc<Thread>) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        if !owner_is(&state, thread) {
            return Err(MonitorError::IllegalMonitorState(
                "object not locked by thread before notify()".to_owned(),
            ));
        }
        while let Some(waiter) = state.wait_set.pop_front() {
            let wait_data = waiter.wait_data.lock();
            if wait_data.wait_monitor == self.address() {
                waiter.wait_cond.notify_one();
                return Ok(());
            }
        }
        Ok(())
    }

    /// Drains the wait set, waking every thread still waiting here.
    pub fn notify_all(&self, thread: &Arc<Thread>) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        if !owner_is(&state, thread) {
            return Err(MonitorError::IllegalMonitorState(
                "object not locked by thread before notifyAll()".to_owned(),
            ));
        }
        while let Some(waiter) = state.wait_set.pop_front() {
            let wait_data = waiter.wait_data.lock();
            if wait_data.wait_monitor == self.address() {
                waiter.wait_cond.notify_one();
            }
        }
        Ok(())
    }

    pub fn owner_thread(&self) -> Option<Arc<Thread>> {
        self.state.lock().owner.clone()
    }

    pub fn owner_thread_id(&self) -> ThreadId {
        self.owner_thread().map_or(INVALID_THREAD_ID, |t| t.id())
    }
}

/// Changes the shape of a lock from thin to fat, preserving the recursion
/// count. `owner` is the designated owner of the new monitor and must be
/// the caller itself or a thread the caller has suspended. There is a race
/// with other inflating threads, so callers re-read the lock word after.
fn inflate<VM: VirtualMachine>(self_thread: &Arc<Thread>, owner: Arc<Thread>, object: ObjectReference) {
    let owner_id = owner.id();
    let monitor = Box::new(Monitor::<VM>::new(self_thread, owner, object));
    if monitor.install() {
        log::debug!(
            target: "monkit::monitor",
            "thread {} created monitor {:#x} for {:?}",
            owner_id,
            monitor.address(),
            object,
        );
        // May block while the collector disallows new monitors.
        VM::monitors().add(monitor);
    }
    debug_assert_eq!(object.lock_word().state(), LockState::FatLocked);
}

/// Acquires the object's lock for `thread`. Reentrant: every call must be
/// matched by an [`exit`].
pub fn enter<VM: VirtualMachine>(thread: &Arc<Thread>, object: ObjectReference) {
    let thread_id = thread.id();
    let mut contention_count: usize = 0;
    thread.set_monitor_enter_object(Some(object));

    loop {
        let lock_word = object.lock_word();
        match lock_word.state() {
            LockState::Unlocked => {
                let thin = LockWord::from_thin_lock(thread_id, 0);
                if object.cas_lock_word(lock_word, thin) {
                    break;
                }
            }
            LockState::ThinLocked => {
                let owner_id = lock_word.thin_lock_owner();
                if owner_id == thread_id {
                    let count = lock_word.thin_lock_count();
                    if count < LockWord::THIN_LOCK_MAX_COUNT {
                        // No other thread can successfully CAS a word naming
                        // us as owner, so a plain store cannot be raced.
                        object.set_lock_word(LockWord::from_thin_lock(thread_id, count + 1));
                        break;
                    }
                    // The count is saturated; switch to a fat lock.
                    inflate::<VM>(thread, thread.clone(), object);
                } else {
                    contention_count += 1;
                    if contention_count <= options::max_spins_before_inflation() {
                        // Brief spin-sleep; crossing a safepoint keeps the
                        // collector and suspenders unblocked meanwhile.
                        blocked_scope(thread, ThreadState::Blocked, || {
                            std::thread::sleep(Duration::from_micros(1));
                        });
                    } else {
                        contention_count = 0;
                        // Spin budget exhausted: suspend the owner and
                        // inflate on its behalf. The runnable state must be
                        // given up first or the suspension handshake could
                        // deadlock against a stop-the-world request.
                        blocked_scope(thread, ThreadState::Blocked, || {
                            if lock_word == object.lock_word() {
                                let (owner, _timed_out) =
                                    VM::threads().suspend_thread_by_id(owner_id);
                                if let Some(owner) = owner {
                                    // Suspension won; make sure the lock did
                                    // not change hands while it was in flight.
                                    let reread = object.lock_word();
                                    if reread.state() == LockState::ThinLocked
                                        && reread.thin_lock_owner() == owner_id
                                    {
                                        inflate::<VM>(thread, owner.clone(), object);
                                    }
                                    VM::threads().resume(&owner);
                                }
                            }
                        });
                    }
                }
            }
            LockState::FatLocked => {
                // Safety: a fat lock word of a reachable object always
                // points at a registered, pinned monitor.
                let monitor = unsafe { Monitor::<VM>::from_address(lock_word.monitor_address()) };
                monitor.lock(thread);
                break;
            }
        }
    }

    thread.set_monitor_enter_object(None);
}

/// Releases one level of the object's lock held by `thread`.
pub fn exit<VM: VirtualMachine>(thread: &Arc<Thread>, object: ObjectReference) -> Result<(), MonitorError> {
    let lock_word = object.lock_word();
    match lock_word.state() {
        LockState::Unlocked => Err(failed_unlock::<VM>(object, thread, None, None)),
        LockState::ThinLocked => {
            let owner_id = lock_word.thin_lock_owner();
            if owner_id != thread.id() {
                let found_owner = VM::threads().find_by_id(owner_id);
                Err(failed_unlock::<VM>(object, thread, found_owner.as_deref(), None))
            } else {
                // Plain stores are fine: we are the verified owner, and a
                // spinner can only CAS in after observing the new word.
                let count = lock_word.thin_lock_count();
                if count != 0 {
                    object.set_lock_word(LockWord::from_thin_lock(owner_id, count - 1));
                } else {
                    object.set_lock_word(LockWord::unlocked());
                }
                Ok(())
            }
        }
        LockState::FatLocked => {
            let monitor = unsafe { Monitor::<VM>::from_address(lock_word.monitor_address()) };
            monitor.unlock(thread)
        }
    }
}

/// Waits on the object until timeout, interrupt or notification. Waiting
/// needs a wait set, so a thin lock is inflated first.
pub fn wait<VM: VirtualMachine>(
    thread: &Arc<Thread>,
    object: ObjectReference,
    ms: i64,
    ns: i32,
    interrupt_allowed: bool,
    why: ThreadState,
) -> Result<(), MonitorError> {
    let mut lock_word = object.lock_word();
    match lock_word.state() {
        LockState::Unlocked => {
            return Err(MonitorError::IllegalMonitorState(
                "object not locked by thread before wait()".to_owned(),
            ));
        }
        LockState::ThinLocked => {
            if lock_word.thin_lock_owner() != thread.id() {
                return Err(MonitorError::IllegalMonitorState(
                    "object not locked by thread before wait()".to_owned(),
                ));
            }
            inflate::<VM>(thread, thread.clone(), object);
            lock_word = object.lock_word();
        }
        LockState::FatLocked => {}
    }
    let monitor = unsafe { Monitor::<VM>::from_address(lock_word.monitor_address()) };
    monitor.wait(thread, ms, ns, interrupt_allowed, why)
}

/// Wakes one waiter. A thin lock held by `thread` has no waiters, so this
/// is a no-op there; inflation is never needed just to notify.
pub fn notify<VM: VirtualMachine>(thread: &Arc<Thread>, object: ObjectReference) -> Result<(), MonitorError> {
    notify_internal::<VM>(thread, object, false)
}

/// Wakes every waiter; otherwise like [`notify`].
pub fn notify_all<VM: VirtualMachine>(thread: &Arc<Thread>, object: ObjectReference) -> Result<(), MonitorError> {
    notify_internal::<VM>(thread, object, true)
}

fn notify_internal<VM: VirtualMachine>(
    thread: &Arc<Thread>,
    object: ObjectReference,
    notify_all: bool,
) -> Result<(), MonitorError> {
    let what = if notify_all { "notifyAll()" } else { "notify()" };
    let lock_word = object.lock_word();
    match lock_word.state() {
        LockState::Unlocked => Err(MonitorError::IllegalMonitorState(format!(
            "object not locked by thread before {what}"
        ))),
        LockState::ThinLocked => {
            if lock_word.thin_lock_owner() != thread.id() {
                Err(MonitorError::IllegalMonitorState(format!(
                    "object not locked by thread before {what}"
                )))
            } else {
                // We own the lock but there is no monitor, hence no waiters.
                Ok(())
            }
        }
        LockState::FatLocked => {
            let monitor = unsafe { Monitor::<VM>::from_address(lock_word.monitor_address()) };
            if notify_all {
                monitor.notify_all(thread)
            } else {
                monitor.notify(thread)
            }
        }
    }
}

fn thread_to_string(thread: Option<&Thread>) -> String {
    thread.map_or_else(|| "NULL".to_owned(), Thread::to_string)
}

/// Classifies a rejected unlock instead of masking the race: the owner is
/// re-read now that the rejection is certain, and the message distinguishes
/// the four ways the original observation and the re-read can disagree.
fn failed_unlock<VM: VirtualMachine>(
    object: ObjectReference,
    expected_owner: &Thread,
    found_owner: Option<&Thread>,
    monitor: Option<&Monitor<VM>>,
) -> MonitorError {
    let current_owner = monitor.and_then(Monitor::owner_thread);
    let current_owner = current_owner.as_deref();
    let object = VM::describe_object(object);
    let expected = thread_to_string(Some(expected_owner));
    let message = match (current_owner, found_owner) {
        (None, None) => {
            format!("unlock of unowned monitor on {object} on thread '{expected}'")
        }
        (None, Some(found)) => format!(
            "unlock of monitor owned by '{}' on {object} (where now the monitor appears unowned) on thread '{expected}'",
            found,
        ),
        (Some(current), None) => format!(
            "unlock of monitor owned by '{}' on {object} (originally believed to be unowned) on thread '{expected}'",
            current,
        ),
        (Some(current), Some(found)) => {
            if !std::ptr::eq(current, found) {
                format!(
                    "unlock of monitor originally owned by '{}' (now owned by '{}') on {object} on thread '{expected}'",
                    found, current,
                )
            } else {
                format!(
                    "unlock of monitor owned by '{}' on {object} on thread '{expected}'",
                    current,
                )
            }
        }
    };
    MonitorError::IllegalMonitorState(message)
}

/// Owner of the object's lock, or [`INVALID_THREAD_ID`] when unlocked.
pub fn lock_owner_thread_id<VM: VirtualMachine>(object: ObjectReference) -> ThreadId {
    let lock_word = object.lock_word();
    match lock_word.state() {
        LockState::Unlocked => INVALID_THREAD_ID,
        LockState::ThinLocked => lock_word.thin_lock_owner(),
        LockState::FatLocked => {
            let monitor = unsafe { Monitor::<VM>::from_address(lock_word.monitor_address()) };
            monitor.owner_thread_id()
        }
    }
}

/// Formats what a thread is waiting or sleeping on, one line, for thread
/// dumps. Writes nothing for threads that are not waiting on anything.
pub fn describe_wait<VM: VirtualMachine>(sink: &mut dyn fmt::Write, thread: &Thread) -> fmt::Result {
    let state = thread.state();
    let mut object = None;
    let mut lock_owner = INVALID_THREAD_ID;

    match state {
        ThreadState::Sleeping => sink.write_str("  - sleeping on ")?,
        ThreadState::Waiting | ThreadState::TimedWaiting => sink.write_str("  - waiting on ")?,
        ThreadState::Blocked => {
            sink.write_str("  - waiting to lock ")?;
            object = thread.monitor_enter_object();
            if let Some(object) = object {
                lock_owner = lock_owner_thread_id::<VM>(object);
            }
        }
        // Not waiting on anything.
        _ => return Ok(()),
    }

    if state.is_in_wait() {
        let wait_data = thread.wait_data.lock();
        if wait_data.wait_monitor != 0 {
            let monitor = unsafe { Monitor::<VM>::from_address(wait_data.wait_monitor) };
            object = Some(monitor.object());
        }
    }

    match object {
        Some(object) => write!(
            sink,
            "<{:#x}> ({})",
            object.identity_hash(),
            VM::describe_object(object)
        )?,
        None => sink.write_str("<unknown>")?,
    }
    if lock_owner != INVALID_THREAD_ID {
        write!(sink, " held by thread {lock_owner}")?;
    }
    sink.write_char('\n')
}

/// The object whose monitor the thread contends for: the one it is blocked
/// entering, but also the one it is waiting on.
pub fn contended_monitor<VM: VirtualMachine>(thread: &Thread) -> Option<ObjectReference> {
    if let Some(object) = thread.monitor_enter_object() {
        return Some(object);
    }
    let wait_data = thread.wait_data.lock();
    if wait_data.wait_monitor != 0 {
        let monitor = unsafe { Monitor::<VM>::from_address(wait_data.wait_monitor) };
        return Some(monitor.object());
    }
    None
}

/// Read-only view of an object's monitor for diagnostic tools.
pub struct MonitorInfo {
    pub owner: Option<Arc<Thread>>,
    /// Total acquisitions by the owner (recursion count plus one), zero
    /// when unheld.
    pub entry_count: u32,
    pub waiters: Vec<Arc<Thread>>,
}

pub fn snapshot<VM: VirtualMachine>(object: ObjectReference) -> MonitorInfo {
    let lock_word = object.lock_word();
    match lock_word.state() {
        LockState::Unlocked => MonitorInfo {
            owner: None,
            entry_count: 0,
            waiters: Vec::new(),
        },
        LockState::ThinLocked => MonitorInfo {
            owner: VM::threads().find_by_id(lock_word.thin_lock_owner()),
            entry_count: 1 + lock_word.thin_lock_count(),
            // Thin locks have no waiters.
            waiters: Vec::new(),
        },
        LockState::FatLocked => {
            let monitor = unsafe { Monitor::<VM>::from_address(lock_word.monitor_address()) };
            let state = monitor.state.lock();
            MonitorInfo {
                owner: state.owner.clone(),
                entry_count: if state.owner.is_some() {
                    1 + state.lock_count
                } else {
                    0
                },
                waiters: state.wait_set.iter().cloned().collect(),
            }
        }
    }
}

/// Debug validity check: a fat word must point at a registered monitor.
pub fn is_valid_lock_word<VM: VirtualMachine>(lock_word: LockWord) -> bool {
    match lock_word.state() {
        LockState::Unlocked => true,
        LockState::ThinLocked => lock_word.thin_lock_owner() != INVALID_THREAD_ID,
        LockState::FatLocked => VM::monitors().contains(lock_word.monitor_address()),
    }
}

struct RegistryInner<VM: VirtualMachine> {
    monitors: Vec<Box<Monitor<VM>>>,
    allow_new: bool,
}

/// Process-wide collection of live inflated monitors. The registry is the
/// sole owner of every monitor; the collector sweeps it to destroy the
/// monitors of dead objects and to fix back-references after relocation.
/// The registry lock is a leaf: no other lock is taken while it is held.
pub struct MonitorRegistry<VM: VirtualMachine> {
    inner: Mutex<RegistryInner<VM>>,
    add_cond: Condvar,
}

impl<VM: VirtualMachine> MonitorRegistry<VM> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                monitors: Vec::new(),
                allow_new: true,
            }),
            add_cond: Condvar::new(),
        }
    }

    /// Takes ownership of a freshly installed monitor. Blocks while the
    /// collector has new monitors disallowed.
    pub fn add(&self, monitor: Box<Monitor<VM>>) {
        let mut inner = self.inner.lock();
        while !inner.allow_new {
            self.add_cond.wait(&mut inner);
        }
        inner.monitors.push(monitor);
    }

    /// Gates registration during the collector's critical phase. Keep the
    /// phase short: contended `enter` on uninflated objects blocks in
    /// [`add`](Self::add) until [`allow_new`](Self::allow_new).
    pub fn disallow_new(&self) {
        self.inner.lock().allow_new = false;
    }

    pub fn allow_new(&self) {
        self.inner.lock().allow_new = true;
        self.add_cond.notify_all();
    }

    /// Visits every monitor's object: `None` means the object is dead and
    /// the monitor is destroyed; `Some(new)` updates the back-reference
    /// (identity for non-moving collectors).
    pub fn sweep(&self, mut visitor: impl FnMut(ObjectReference) -> Option<ObjectReference>) {
        let mut inner = self.inner.lock();
        inner.monitors.retain_mut(|monitor| {
            let object = monitor.object();
            match visitor(object) {
                Some(new_object) => {
                    monitor.set_object(new_object);
                    true
                }
                None => {
                    log::debug!(
                        target: "monkit::gc",
                        "freeing monitor {:#x} belonging to unmarked {:?}",
                        monitor.address(),
                        object,
                    );
                    #[cfg(debug_assertions)]
                    {
                        let word = object.lock_word();
                        debug_assert_eq!(word.state(), LockState::FatLocked);
                        debug_assert_eq!(word.monitor_address(), monitor.address());
                        let state = monitor.state.get_mut();
                        debug_assert!(
                            state.owner.is_none() && state.wait_set.is_empty(),
                            "destroying a monitor still in use"
                        );
                    }
                    false
                }
            }
        });
    }

    pub fn contains(&self, address: usize) -> bool {
        self.inner
            .lock()
            .monitors
            .iter()
            .any(|monitor| monitor.address() == address)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<VM: VirtualMachine> Default for MonitorRegistry<VM> {
    fn default() -> Self {
        Self::new()
    }
}
