#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use monkit::mock::MockVM;
use monkit::sync::monitor;
use monkit::threads::Thread;
use monkit::{HeapObjectHeader, LockState, ObjectReference, ThreadState, VirtualMachine};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Test objects are leaked so monitors registered for them stay valid for
/// the lifetime of the test binary (the registry may be swept later).
pub fn leak_object() -> ObjectReference {
    ObjectReference::from_header(Box::leak(Box::new(HeapObjectHeader::new())))
}

pub fn attach(name: &str) -> Arc<Thread> {
    MockVM::threads().attach(name)
}

pub fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Forces an object's lock fat: a wait needs a wait set, so even a
/// zero-contention timed wait inflates.
pub fn inflate_via_timed_wait(thread: &Arc<Thread>, object: ObjectReference) {
    monitor::enter::<MockVM>(thread, object);
    monitor::wait::<MockVM>(thread, object, 1, 0, false, ThreadState::TimedWaiting).unwrap();
    monitor::exit::<MockVM>(thread, object).unwrap();
    assert_eq!(object.lock_word().state(), LockState::FatLocked);
}
