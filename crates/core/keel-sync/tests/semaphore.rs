//! Multi-unit behaviour of `Semaphore`.

#![cfg(not(loom))]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use common::{settle, wait_until};
use keel_sync::sync::{Fairness, Semaphore};
use keel_sync::{SyncError, Unit};

#[test]
fn two_permits_admit_two_of_three() {
    let sem = Arc::new(Semaphore::new(2));
    let passed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let (sem, passed) = (Arc::clone(&sem), Arc::clone(&passed));
            thread::spawn(move || {
                sem.acquire().unwrap();
                passed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    wait_until("two acquired, one queued", || {
        passed.load(Ordering::SeqCst) == 2 && sem.queue_length() == 1
    });
    settle();
    assert_eq!(passed.load(Ordering::SeqCst), 2);
    assert_eq!(sem.available_permits(), 0);

    sem.release().unwrap();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(passed.load(Ordering::SeqCst), 3);
    assert_eq!(sem.available_permits(), 0);
}

#[test]
fn fair_semaphore_grants_in_arrival_order() {
    let sem = Arc::new(Semaphore::with_fairness(0, Fairness::Fair));
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for (i, name) in ["A", "B", "C"].into_iter().enumerate() {
        let (s, o) = (Arc::clone(&sem), Arc::clone(&order));
        handles.push(thread::spawn(move || {
            s.acquire().unwrap();
            o.lock().unwrap().push(name);
        }));
        wait_until("arrival queued", || sem.queue_length() == i + 1);
    }

    for granted in 1..=3 {
        sem.release().unwrap();
        wait_until("grant recorded", || order.lock().unwrap().len() == granted);
        settle();
        assert_eq!(order.lock().unwrap().len(), granted);
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), ["A", "B", "C"]);
}

#[test]
fn fair_acquire_yields_to_queue_but_try_acquire_barges() {
    let sem = Arc::new(Semaphore::with_fairness(0, Fairness::Fair));

    let s = Arc::clone(&sem);
    let big = thread::spawn(move || s.acquire_many(2));
    wait_until("big request queued", || sem.has_queued_threads());

    // One permit is not enough for the queued request, so it stays first.
    sem.release().unwrap();
    settle();
    assert_eq!(sem.available_permits(), 1);
    assert_eq!(sem.queue_length(), 1);

    let s = Arc::clone(&sem);
    let polite = thread::spawn(move || s.try_acquire_for(Duration::ZERO))
        .join()
        .unwrap();
    assert_eq!(polite, Ok(false), "fair acquire must not overtake");

    let s = Arc::clone(&sem);
    let barged = thread::spawn(move || s.try_acquire()).join().unwrap();
    assert!(barged, "try_acquire barges by design");
    assert_eq!(sem.available_permits(), 0);

    sem.release_many(2).unwrap();
    assert_eq!(big.join().unwrap(), Ok(()));
    assert_eq!(sem.available_permits(), 0);
}

#[test]
fn multi_permit_acquire_is_all_or_nothing() {
    let sem = Arc::new(Semaphore::new(0));
    let s = Arc::clone(&sem);
    let waiter = thread::spawn(move || s.acquire_many_uninterruptibly(3));
    wait_until("waiter queued", || sem.has_queued_threads());

    sem.release_many(2).unwrap();
    settle();
    assert_eq!(sem.available_permits(), 2);
    assert!(sem.has_queued_threads());

    sem.release().unwrap();
    waiter.join().unwrap().unwrap();
    assert_eq!(sem.available_permits(), 0);
}

#[test]
fn timed_acquire_respects_timeout() {
    let sem = Semaphore::new(0);
    let start = Instant::now();
    assert_eq!(sem.try_acquire_for(Duration::from_millis(50)), Ok(false));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(5));
    assert!(!sem.has_queued_threads());
}

#[test]
fn interrupted_acquire_does_not_swallow_a_release() {
    let sem = Arc::new(Semaphore::new(0));

    let (tx, rx) = std::sync::mpsc::channel();
    let s = Arc::clone(&sem);
    let victim = thread::spawn(move || {
        tx.send(Unit::current()).unwrap();
        s.acquire()
    });
    let victim_unit = rx.recv().unwrap();
    wait_until("victim queued", || sem.queue_length() == 1);

    let s = Arc::clone(&sem);
    let survivor = thread::spawn(move || s.acquire());
    wait_until("survivor queued", || sem.queue_length() == 2);

    victim_unit.interrupt();
    assert_eq!(victim.join().unwrap(), Err(SyncError::Interrupted));
    assert_eq!(sem.queue_length(), 1);

    sem.release().unwrap();
    assert_eq!(survivor.join().unwrap(), Ok(()));
    assert_eq!(sem.available_permits(), 0);
}

#[test]
fn permits_guard_concurrent_section() {
    const LIMIT: usize = 3;
    let sem = Arc::new(Semaphore::new(LIMIT as i32));
    let inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let (sem, inside) = (Arc::clone(&sem), Arc::clone(&inside));
            thread::spawn(move || {
                for _ in 0..200 {
                    let _permit = sem.permit().unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    assert!(now <= LIMIT, "{now} units inside");
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(sem.available_permits(), LIMIT as i32);
}
