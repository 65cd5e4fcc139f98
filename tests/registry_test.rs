//! GC-facing registry behaviour: sweeping dead monitors, fixing
//! back-references after relocation, and the allow-new gate that parks
//! inflating threads during the collector's critical phase.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use monkit::mock::MockVM;
use monkit::sync::monitor::{self, is_valid_lock_word};
use monkit::{LockState, ThreadState, VirtualMachine};

#[test]
fn sweep_relocates_and_frees() {
    common::init_logging();
    let t = common::attach("gc-driver");
    let object_a = common::leak_object();
    let object_b = common::leak_object();
    common::inflate_via_timed_wait(&t, object_a);
    common::inflate_via_timed_wait(&t, object_b);

    assert!(is_valid_lock_word::<MockVM>(object_a.lock_word()));
    assert!(is_valid_lock_word::<MockVM>(object_b.lock_word()));

    // Relocate a: the collector moved the object (header included) and
    // hands the monitor its new address.
    let object_a_moved = common::leak_object();
    object_a_moved.set_lock_word(object_a.lock_word());
    MockVM::monitors().sweep(|object| {
        if object == object_a {
            Some(object_a_moved)
        } else {
            Some(object)
        }
    });

    let mut seen = Vec::new();
    MockVM::monitors().sweep(|object| {
        seen.push(object);
        Some(object)
    });
    assert!(seen.contains(&object_a_moved));
    assert!(!seen.contains(&object_a));
    assert!(is_valid_lock_word::<MockVM>(object_a_moved.lock_word()));

    // Kill b: an unreachable object's monitor is destroyed and unlinked.
    MockVM::monitors().sweep(|object| if object == object_b { None } else { Some(object) });
    assert!(!is_valid_lock_word::<MockVM>(object_b.lock_word()));

    let mut seen = Vec::new();
    MockVM::monitors().sweep(|object| {
        seen.push(object);
        Some(object)
    });
    assert!(!seen.contains(&object_b));
    assert!(seen.contains(&object_a_moved));
}

#[test]
fn disallow_new_parks_inflating_threads() {
    let object = common::leak_object();
    let done = Arc::new(AtomicBool::new(false));

    MockVM::monitors().disallow_new();

    let inflater = {
        let done = done.clone();
        thread::spawn(move || {
            let me = common::attach("inflater");
            monitor::enter::<MockVM>(&me, object);
            // The wait inflates; registration parks until the gate opens.
            monitor::wait::<MockVM>(&me, object, 1, 0, false, ThreadState::TimedWaiting).unwrap();
            monitor::exit::<MockVM>(&me, object).unwrap();
            done.store(true, Ordering::Release);
        })
    };

    // The lock word is published before registration, so once it reads fat
    // the inflater is already committed to the gated add.
    common::wait_until("lock word inflates", || {
        object.lock_word().state() == LockState::FatLocked
    });
    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::Acquire), "add() went through a closed gate");

    MockVM::monitors().allow_new();
    inflater.join().unwrap();
    assert!(done.load(Ordering::Acquire));
    assert!(is_valid_lock_word::<MockVM>(object.lock_word()));
}
