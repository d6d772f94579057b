use kernel_sync::SpinLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::{panic, thread};

#[test]
fn guard_releases_on_drop() {
    let l = SpinLock::new(0_u32);
    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.is_locked());
    }
    assert!(!l.is_locked());
    *l.lock() += 1;
    assert_eq!(*l.lock(), 42);
}

#[test]
fn try_lock_fails_while_held() {
    let l = SpinLock::new(1u8);
    let g1 = l.try_lock().expect("uncontended");
    assert!(l.try_lock().is_none());
    drop(g1);
    assert_eq!(*l.try_lock().expect("released"), 1);
}

#[test]
fn waiter_enters_after_holder_leaves() {
    let l = Arc::new(SpinLock::new(Vec::new()));
    let held = l.lock();

    let waiter = {
        let l = Arc::clone(&l);
        thread::spawn(move || l.with_lock(|v| v.push("waiter")))
    };

    thread::sleep(std::time::Duration::from_millis(20));
    assert!(!waiter.is_finished());
    drop(held);
    waiter.join().unwrap();
    assert_eq!(*l.lock(), ["waiter"]);
}

#[test]
fn get_mut_and_into_inner_bypass_locking() {
    let mut l = SpinLock::new(vec![1, 2, 3]);
    l.get_mut().push(4);
    assert_eq!(l.into_inner(), [1, 2, 3, 4]);
}

#[test]
fn contended_counter_is_exact() {
    let cores = 4;
    let iters = 10_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(cores));

    let handles: Vec<_> = (0..cores)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    lock.with_lock(|v| {
                        assert_eq!(in_cs.fetch_add(1, Ordering::SeqCst), 0);
                        *v += 1;
                        in_cs.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*lock.lock(), cores * iters);
}

#[test]
fn panicking_holder_releases_lock() {
    let l = SpinLock::new(0u32);
    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("holder died");
        });
    }));
    assert!(res.is_err());
    assert_eq!(l.with_lock(|v| *v), 123);
}

#[test]
fn spinlock_is_sync_for_send_t() {
    fn takes_sync<S: Sync>(_s: &S) {}
    takes_sync(&SpinLock::new(0u8));
}
