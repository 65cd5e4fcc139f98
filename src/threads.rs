//! Thread objects and the thread registry consumed by the monitor
//! subsystem: small reusable thread ids for thin-lock owner fields, the
//! runnable/suspended state machine the collector synchronizes against,
//! the cooperative suspension handshake used to inflate a contended thin
//! lock, and the per-thread wake-up primitive behind `wait`/`notify`.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::objectmodel::reference::ObjectReference;
use crate::sync::lock_word::LockWord;

pub type ThreadId = u32;

/// Reserved id meaning "no thread"; never assigned to a live thread.
pub const INVALID_THREAD_ID: ThreadId = 0;

/// How long a suspension request waits for the target to reach a safepoint
/// before reporting a timeout.
const SUSPEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ThreadState {
    New = 0,
    /// Executing managed code. A thread in this state must reach a
    /// safepoint before a suspension request or the collector can proceed.
    Runnable = 1,
    /// Parked in `enter` on a contended lock.
    Blocked = 2,
    Waiting = 3,
    TimedWaiting = 4,
    Sleeping = 5,
    /// Stopped at a safepoint on behalf of another thread.
    Suspended = 6,
    Terminated = 7,
}

impl From<u8> for ThreadState {
    fn from(value: u8) -> ThreadState {
        match value {
            0 => ThreadState::New,
            1 => ThreadState::Runnable,
            2 => ThreadState::Blocked,
            3 => ThreadState::Waiting,
            4 => ThreadState::TimedWaiting,
            5 => ThreadState::Sleeping,
            6 => ThreadState::Suspended,
            7 => ThreadState::Terminated,
            _ => unreachable!(),
        }
    }
}

impl ThreadState {
    pub fn is_runnable(&self) -> bool {
        matches!(self, ThreadState::Runnable)
    }

    /// True for the three states a thread parks in while inside `wait`.
    pub fn is_in_wait(&self) -> bool {
        matches!(
            self,
            ThreadState::Waiting | ThreadState::TimedWaiting | ThreadState::Sleeping
        )
    }
}

/// Guarded by the thread's `wait_mutex`; the personal wake-up primitive a
/// waiting thread parks on so `notify` can pick one specific waiter.
pub(crate) struct WaitData {
    /// Address of the monitor this thread is waiting in, zero when not
    /// waiting. Non-zero means a notifier or interrupter must signal the
    /// thread's `wait_cond` to wake it.
    pub(crate) wait_monitor: usize,
    pub(crate) interrupted: bool,
}

struct SuspendState {
    state: ThreadState,
    suspend_count: u32,
}

pub struct Thread {
    id: ThreadId,
    name: String,
    /// Mirror of the state inside `suspend`, readable without the lock.
    state: AtomicU8,
    suspend: Mutex<SuspendState>,
    /// Signalled when the thread leaves the runnable state (suspenders wait
    /// for that) and when the suspend count drops to zero (the thread waits
    /// for that).
    resume_cond: Condvar,
    pub(crate) wait_data: Mutex<WaitData>,
    pub(crate) wait_cond: Condvar,
    /// Object this thread is currently blocked entering, for diagnostics.
    monitor_enter_object: AtomicUsize,
    /// xorshift state for contention sampling.
    prng: AtomicU64,
}

impl Thread {
    fn new(id: ThreadId, name: String) -> Self {
        Self {
            id,
            name,
            state: AtomicU8::new(ThreadState::Runnable as u8),
            suspend: Mutex::new(SuspendState {
                state: ThreadState::Runnable,
                suspend_count: 0,
            }),
            resume_cond: Condvar::new(),
            wait_data: Mutex::new(WaitData {
                wait_monitor: 0,
                interrupted: false,
            }),
            wait_cond: Condvar::new(),
            monitor_enter_object: AtomicUsize::new(0),
            prng: AtomicU64::new(0x9e37_79b9_7f4a_7c15 ^ ((id as u64) << 1 | 1)),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, guard: &mut SuspendState, state: ThreadState) {
        guard.state = state;
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Leaves the runnable state before an OS-level block so the collector
    /// and suspension requests are not kept waiting on this thread.
    pub fn transition_from_runnable_to_suspended(&self, why: ThreadState) {
        debug_assert!(
            matches!(why, ThreadState::Blocked) || why.is_in_wait(),
            "not a blocking state: {why:?}"
        );
        let mut guard = self.suspend.lock();
        debug_assert!(guard.state.is_runnable());
        self.set_state(&mut guard, why);
        self.resume_cond.notify_all();
    }

    /// Returns to the runnable state, parking first if a suspension request
    /// arrived while the thread was out.
    pub fn transition_from_suspended_to_runnable(&self) {
        let mut guard = self.suspend.lock();
        while guard.suspend_count > 0 {
            self.resume_cond.wait(&mut guard);
        }
        self.set_state(&mut guard, ThreadState::Runnable);
    }

    /// Safepoint poll for runnable threads: parks here until resumed if
    /// another thread has requested suspension.
    pub fn check_suspend(&self) {
        let mut guard = self.suspend.lock();
        if guard.suspend_count == 0 {
            return;
        }
        self.set_state(&mut guard, ThreadState::Suspended);
        self.resume_cond.notify_all();
        while guard.suspend_count > 0 {
            self.resume_cond.wait(&mut guard);
        }
        self.set_state(&mut guard, ThreadState::Runnable);
    }

    /// Raises the suspend count and waits for the thread to stop. Returns
    /// false if the target did not reach a safepoint within the timeout, in
    /// which case the request has been withdrawn.
    pub(crate) fn request_suspend(&self) -> bool {
        let deadline = Instant::now() + SUSPEND_TIMEOUT;
        let mut guard = self.suspend.lock();
        guard.suspend_count += 1;
        while guard.state.is_runnable() {
            if self
                .resume_cond
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                guard.suspend_count -= 1;
                if guard.suspend_count == 0 {
                    self.resume_cond.notify_all();
                }
                return false;
            }
        }
        true
    }

    pub(crate) fn release_suspend(&self) {
        let mut guard = self.suspend.lock();
        debug_assert!(guard.suspend_count > 0, "resume without suspend");
        guard.suspend_count -= 1;
        if guard.suspend_count == 0 {
            self.resume_cond.notify_all();
        }
    }

    /// True while another thread holds this one stopped; inflation of a
    /// foreign-owned thin lock is only legal in that window.
    pub fn is_suspended(&self) -> bool {
        let guard = self.suspend.lock();
        guard.suspend_count > 0 && !guard.state.is_runnable()
    }

    /// Marks the thread interrupted and wakes it if it is parked in `wait`.
    pub fn interrupt(&self) {
        let mut wait_data = self.wait_data.lock();
        wait_data.interrupted = true;
        self.wait_cond.notify_one();
    }

    pub fn is_interrupted(&self) -> bool {
        self.wait_data.lock().interrupted
    }

    /// Returns the interrupted flag and clears it.
    pub fn interrupted(&self) -> bool {
        let mut wait_data = self.wait_data.lock();
        std::mem::take(&mut wait_data.interrupted)
    }

    pub fn monitor_enter_object(&self) -> Option<ObjectReference> {
        ObjectReference::from_address(self.monitor_enter_object.load(Ordering::Relaxed))
    }

    pub(crate) fn set_monitor_enter_object(&self, object: Option<ObjectReference>) {
        self.monitor_enter_object.store(
            object.map_or(0, ObjectReference::to_address),
            Ordering::Relaxed,
        );
    }

    /// xorshift64; cheap dice for contention sampling.
    pub(crate) fn next_random(&self) -> u64 {
        let mut x = self.prng.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.prng.store(x, Ordering::Relaxed);
        x
    }
}

impl fmt::Display for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (tid {})", self.name, self.id)
    }
}

/// Runs `f` with the thread transitioned out of the runnable state so that
/// suspension requests and the collector can proceed while it blocks.
pub fn blocked_scope<T>(thread: &Thread, why: ThreadState, f: impl FnOnce() -> T) -> T {
    thread.transition_from_runnable_to_suspended(why);
    let result = f();
    thread.transition_from_suspended_to_runnable();
    result
}

struct ThreadsInner {
    list: Vec<Arc<Thread>>,
    /// Bitmap of allocated thread ids; ids are reused so they keep fitting
    /// the thin-lock owner field.
    allocated_ids: Vec<u64>,
}

impl ThreadsInner {
    fn allocate_id(&mut self) -> ThreadId {
        for (word_index, word) in self.allocated_ids.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                *word |= 1 << bit;
                return Self::id_for(word_index, bit);
            }
        }
        self.allocated_ids.push(1);
        Self::id_for(self.allocated_ids.len() - 1, 0)
    }

    fn id_for(word_index: usize, bit: usize) -> ThreadId {
        let id = (word_index * 64 + bit) as ThreadId + 1;
        assert!(id <= LockWord::MAX_THIN_LOCK_OWNER, "thread id space exhausted");
        id
    }

    fn release_id(&mut self, id: ThreadId) {
        let index = (id - 1) as usize;
        self.allocated_ids[index / 64] &= !(1 << (index % 64));
    }
}

/// Process-wide thread registry. The monitor subsystem uses it to find the
/// owner of a thin lock, and to suspend that owner while inflating.
pub struct Threads {
    inner: Mutex<ThreadsInner>,
}

impl Threads {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(ThreadsInner {
                list: Vec::new(),
                allocated_ids: Vec::new(),
            }),
        }
    }

    /// Registers the calling thread, handing back its runtime-side object.
    /// The thread starts runnable.
    pub fn attach(&self, name: &str) -> Arc<Thread> {
        let mut inner = self.inner.lock();
        let id = inner.allocate_id();
        let thread = Arc::new(Thread::new(id, name.to_owned()));
        inner.list.push(thread.clone());
        log::trace!(target: "monkit::threads", "attached {thread}");
        thread
    }

    /// Unregisters a thread and recycles its id. The caller must not use
    /// the thread for monitor operations afterwards.
    pub fn detach(&self, thread: &Arc<Thread>) {
        {
            let mut guard = thread.suspend.lock();
            thread.set_state(&mut guard, ThreadState::Terminated);
            thread.resume_cond.notify_all();
        }
        let mut inner = self.inner.lock();
        inner.list.retain(|t| !Arc::ptr_eq(t, thread));
        inner.release_id(thread.id());
        log::trace!(target: "monkit::threads", "detached {thread}");
    }

    pub fn find_by_id(&self, id: ThreadId) -> Option<Arc<Thread>> {
        if id == INVALID_THREAD_ID {
            return None;
        }
        let inner = self.inner.lock();
        inner.list.iter().find(|t| t.id() == id).cloned()
    }

    /// Suspends the thread with the given id at its next safepoint.
    /// Returns `(thread, false)` on success, `(None, true)` when the target
    /// exists but never stopped within the timeout, and `(None, false)`
    /// when no such thread is registered.
    pub fn suspend_thread_by_id(&self, id: ThreadId) -> (Option<Arc<Thread>>, bool) {
        let Some(thread) = self.find_by_id(id) else {
            return (None, false);
        };
        if thread.request_suspend() {
            (Some(thread), false)
        } else {
            (None, true)
        }
    }

    pub fn resume(&self, thread: &Thread) {
        thread.release_suspend();
    }
}

impl Default for Threads {
    fn default() -> Self {
        Self::new()
    }
}
