//! Initialization knobs for the monitor subsystem. A runtime calls
//! [`init`] once during startup; every knob has a usable default so tests
//! and embedders that never call it still get sensible behaviour.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Contended waits longer than this many milliseconds become candidates for
/// a sampled contention event; zero disables sampling entirely.
static LOCK_PROFILING_THRESHOLD_MS: AtomicU64 = AtomicU64::new(0);

/// Spin-sleep iterations a contender performs before it suspends the owner
/// and inflates the lock.
static MAX_SPINS_BEFORE_INFLATION: AtomicUsize = AtomicUsize::new(50);

/// Optional predicate consulted by contention logging; a sensitive thread's
/// contention events skip the sampling dice.
static IS_SENSITIVE_THREAD_HOOK: Mutex<Option<fn() -> bool>> = Mutex::new(None);

pub fn init(
    lock_profiling_threshold_ms: u64,
    max_spins_before_inflation: usize,
    is_sensitive_thread_hook: Option<fn() -> bool>,
) {
    LOCK_PROFILING_THRESHOLD_MS.store(lock_profiling_threshold_ms, Ordering::Relaxed);
    MAX_SPINS_BEFORE_INFLATION.store(max_spins_before_inflation, Ordering::Relaxed);
    *IS_SENSITIVE_THREAD_HOOK.lock() = is_sensitive_thread_hook;
}

pub fn lock_profiling_threshold_ms() -> u64 {
    LOCK_PROFILING_THRESHOLD_MS.load(Ordering::Relaxed)
}

pub fn max_spins_before_inflation() -> usize {
    MAX_SPINS_BEFORE_INFLATION.load(Ordering::Relaxed)
}

pub fn is_sensitive_thread() -> bool {
    IS_SENSITIVE_THREAD_HOOK.lock().map_or(false, |hook| hook())
}
