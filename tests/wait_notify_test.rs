//! The wait/notify protocol: wakeups, interrupts, timeouts, recursion
//! restoration across a wait, and the waiting-thread diagnostics.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use monkit::mock::MockVM;
use monkit::sync::monitor;
use monkit::{MonitorError, ThreadState};

#[test]
fn wait_then_notify_restores_recursion() {
    common::init_logging();
    let object = common::leak_object();
    let woke = Arc::new(AtomicBool::new(false));

    let waiter = {
        let woke = woke.clone();
        thread::spawn(move || {
            let t1 = common::attach("waiter");
            // Two levels deep: wait must fully release and then restore.
            monitor::enter::<MockVM>(&t1, object);
            monitor::enter::<MockVM>(&t1, object);
            monitor::wait::<MockVM>(&t1, object, 0, 0, true, ThreadState::Waiting).unwrap();

            assert_eq!(monitor::lock_owner_thread_id::<MockVM>(object), t1.id());
            assert_eq!(monitor::snapshot::<MockVM>(object).entry_count, 2);
            monitor::exit::<MockVM>(&t1, object).unwrap();
            monitor::exit::<MockVM>(&t1, object).unwrap();
            woke.store(true, Ordering::Release);
        })
    };

    common::wait_until("waiter parks", || {
        monitor::snapshot::<MockVM>(object).waiters.len() == 1
    });

    let t2 = common::attach("notifier");
    monitor::enter::<MockVM>(&t2, object);
    // The wait released the lock completely, recursion notwithstanding.
    assert_eq!(monitor::snapshot::<MockVM>(object).entry_count, 1);
    monitor::notify::<MockVM>(&t2, object).unwrap();
    monitor::exit::<MockVM>(&t2, object).unwrap();

    waiter.join().unwrap();
    assert!(woke.load(Ordering::Acquire));
    let info = monitor::snapshot::<MockVM>(object);
    assert!(info.owner.is_none());
    assert_eq!(info.entry_count, 0);
    assert!(info.waiters.is_empty());
}

#[test]
fn interrupt_during_timed_wait() {
    let object = common::leak_object();
    let t1 = common::attach("interruptee");

    let waiter = {
        let t1 = t1.clone();
        thread::spawn(move || {
            monitor::enter::<MockVM>(&t1, object);
            let err = monitor::wait::<MockVM>(&t1, object, 10_000, 0, true, ThreadState::TimedWaiting)
                .unwrap_err();
            assert_eq!(err, MonitorError::Interrupted);
            // The flag is consumed by the raise, and the monitor is ours
            // again until we exit.
            assert!(!t1.is_interrupted());
            assert_eq!(monitor::lock_owner_thread_id::<MockVM>(object), t1.id());
            monitor::exit::<MockVM>(&t1, object).unwrap();
        })
    };

    common::wait_until("waiter parks", || {
        monitor::snapshot::<MockVM>(object).waiters.len() == 1
    });
    t1.interrupt();
    waiter.join().unwrap();
}

#[test]
fn notify_all_wakes_every_waiter() {
    const WAITERS: usize = 5;
    let object = common::leak_object();
    let returned = Arc::new(AtomicUsize::new(0));

    let waiters: Vec<_> = (0..WAITERS)
        .map(|i| {
            let returned = returned.clone();
            thread::spawn(move || {
                let me = common::attach(&format!("waiter-{i}"));
                monitor::enter::<MockVM>(&me, object);
                monitor::wait::<MockVM>(&me, object, 0, 0, true, ThreadState::Waiting).unwrap();
                // Re-acquired exactly once, serialized through the monitor.
                assert_eq!(monitor::snapshot::<MockVM>(object).entry_count, 1);
                monitor::exit::<MockVM>(&me, object).unwrap();
                returned.fetch_add(1, Ordering::AcqRel);
            })
        })
        .collect();

    common::wait_until("all waiters park", || {
        monitor::snapshot::<MockVM>(object).waiters.len() == WAITERS
    });

    let t6 = common::attach("broadcaster");
    monitor::enter::<MockVM>(&t6, object);
    monitor::notify_all::<MockVM>(&t6, object).unwrap();
    assert!(monitor::snapshot::<MockVM>(object).waiters.is_empty());
    monitor::exit::<MockVM>(&t6, object).unwrap();

    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(returned.load(Ordering::Acquire), WAITERS);
}

#[test]
fn timed_wait_returns_on_timeout() {
    let object = common::leak_object();
    let t1 = common::attach("sleeper");

    monitor::enter::<MockVM>(&t1, object);
    let started = Instant::now();
    monitor::wait::<MockVM>(&t1, object, 50, 0, true, ThreadState::TimedWaiting).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(monitor::lock_owner_thread_id::<MockVM>(object), t1.id());
    monitor::exit::<MockVM>(&t1, object).unwrap();
}

#[test]
fn pending_interrupt_short_circuits_the_wait() {
    let object = common::leak_object();
    let t1 = common::attach("pre-interrupted");

    // Interrupts are surfaced: even an untimed wait returns immediately.
    monitor::enter::<MockVM>(&t1, object);
    t1.interrupt();
    let err =
        monitor::wait::<MockVM>(&t1, object, 0, 0, true, ThreadState::Waiting).unwrap_err();
    assert_eq!(err, MonitorError::Interrupted);
    assert!(!t1.is_interrupted());

    // Interrupts swallowed: the wait still ends, no error, flag consumed.
    t1.interrupt();
    monitor::wait::<MockVM>(&t1, object, 0, 0, false, ThreadState::Waiting).unwrap();
    assert!(!t1.is_interrupted());
    monitor::exit::<MockVM>(&t1, object).unwrap();
}

#[test]
fn notifies_are_not_lost_while_parked() {
    const WAITERS: usize = 3;
    const NOTIFIES: usize = 2;
    let object = common::leak_object();
    let returned = Arc::new(AtomicUsize::new(0));

    let waiters: Vec<_> = (0..WAITERS)
        .map(|i| {
            let returned = returned.clone();
            thread::spawn(move || {
                let me = common::attach(&format!("parked-{i}"));
                monitor::enter::<MockVM>(&me, object);
                monitor::wait::<MockVM>(&me, object, 0, 0, true, ThreadState::Waiting).unwrap();
                monitor::exit::<MockVM>(&me, object).unwrap();
                returned.fetch_add(1, Ordering::AcqRel);
            })
        })
        .collect();

    common::wait_until("all waiters park", || {
        monitor::snapshot::<MockVM>(object).waiters.len() == WAITERS
    });

    let notifier = common::attach("notifier");
    monitor::enter::<MockVM>(&notifier, object);
    for _ in 0..NOTIFIES {
        monitor::notify::<MockVM>(&notifier, object).unwrap();
    }
    monitor::exit::<MockVM>(&notifier, object).unwrap();

    common::wait_until("notified waiters return", || {
        returned.load(Ordering::Acquire) >= NOTIFIES
    });

    // Release the remaining waiter and fold everything up.
    monitor::enter::<MockVM>(&notifier, object);
    monitor::notify_all::<MockVM>(&notifier, object).unwrap();
    monitor::exit::<MockVM>(&notifier, object).unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(returned.load(Ordering::Acquire), WAITERS);
}

#[test]
fn describe_wait_names_the_monitor() {
    let object = common::leak_object();
    let t1 = common::attach("described");
    let parked = Arc::new(AtomicBool::new(false));

    let waiter = {
        let t1 = t1.clone();
        let parked = parked.clone();
        thread::spawn(move || {
            monitor::enter::<MockVM>(&t1, object);
            parked.store(true, Ordering::Release);
            monitor::wait::<MockVM>(&t1, object, 0, 0, true, ThreadState::Waiting).unwrap();
            monitor::exit::<MockVM>(&t1, object).unwrap();
        })
    };

    // The wait publishes its monitor only after the state flips, so poll
    // for both before dumping.
    common::wait_until("waiter parks", || {
        parked.load(Ordering::Acquire)
            && t1.state() == ThreadState::Waiting
            && monitor::contended_monitor::<MockVM>(&t1) == Some(object)
    });
    let mut dump = String::new();
    monitor::describe_wait::<MockVM>(&mut dump, &t1).unwrap();
    assert!(dump.contains("waiting on"), "unexpected dump: {dump}");

    let t2 = common::attach("releaser");
    monitor::enter::<MockVM>(&t2, object);
    monitor::notify::<MockVM>(&t2, object).unwrap();
    monitor::exit::<MockVM>(&t2, object).unwrap();
    waiter.join().unwrap();
}

#[test]
fn describe_wait_names_the_blocking_owner() {
    let object = common::leak_object();
    let holder = common::attach("blocking-holder");
    common::inflate_via_timed_wait(&holder, object);

    monitor::enter::<MockVM>(&holder, object);

    let contender = common::attach("blocked");
    let done = Arc::new(AtomicBool::new(false));
    let blocked = {
        let contender = contender.clone();
        let done = done.clone();
        thread::spawn(move || {
            monitor::enter::<MockVM>(&contender, object);
            monitor::exit::<MockVM>(&contender, object).unwrap();
            done.store(true, Ordering::Release);
        })
    };

    common::wait_until("contender blocks", || {
        contender.state() == ThreadState::Blocked
            && monitor::contended_monitor::<MockVM>(&contender) == Some(object)
    });

    let mut dump = String::new();
    monitor::describe_wait::<MockVM>(&mut dump, &contender).unwrap();
    assert!(dump.contains("waiting to lock"), "unexpected dump: {dump}");
    assert!(
        dump.contains(&format!("held by thread {}", holder.id())),
        "unexpected dump: {dump}"
    );

    monitor::exit::<MockVM>(&holder, object).unwrap();
    blocked.join().unwrap();
    assert!(done.load(Ordering::Acquire));
}
