//! Multi-unit behaviour of `BoundedBlockingQueue`.

#![cfg(not(loom))]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use common::{settle, wait_until};
use keel_sync::sync::BoundedBlockingQueue;
use keel_sync::{SyncError, Unit};

#[test]
fn put_blocks_on_full_until_take() {
    let q = Arc::new(BoundedBlockingQueue::new(2).unwrap());
    q.put(1);
    q.put(2);

    let done = Arc::new(AtomicBool::new(false));
    let (qq, d) = (Arc::clone(&q), Arc::clone(&done));
    let producer = thread::spawn(move || {
        qq.put(3);
        d.store(true, Ordering::SeqCst);
    });

    settle();
    assert!(!done.load(Ordering::SeqCst), "put(3) must block while full");

    assert_eq!(q.take(), 1);
    producer.join().unwrap();
    assert!(done.load(Ordering::SeqCst));

    let mut rest = Vec::new();
    q.drain_to(&mut rest);
    assert_eq!(rest, vec![2, 3]);
}

#[test]
fn take_blocks_on_empty_until_put() {
    let q = Arc::new(BoundedBlockingQueue::new(1).unwrap());
    let qq = Arc::clone(&q);
    let consumer = thread::spawn(move || qq.take());
    settle();
    assert!(!consumer.is_finished());
    q.put("hello");
    assert_eq!(consumer.join().unwrap(), "hello");
}

#[test]
fn fifo_under_concurrent_producer_and_consumer() {
    const CAP: usize = 4;
    const ITEMS: u32 = 5_000;

    let q = Arc::new(BoundedBlockingQueue::new(CAP).unwrap());
    let qq = Arc::clone(&q);
    let producer = thread::spawn(move || {
        for i in 0..ITEMS {
            qq.put(i);
        }
    });

    for expected in 0..ITEMS {
        assert!(q.len() <= CAP);
        assert_eq!(q.take(), expected);
    }
    producer.join().unwrap();
    assert!(q.is_empty());
}

#[test]
fn many_producers_lose_nothing() {
    let q = Arc::new(BoundedBlockingQueue::new(3).unwrap());
    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..250 {
                    q.put(p * 1000 + i);
                }
            })
        })
        .collect();

    let mut last = [None::<u32>; 4];
    for _ in 0..1000 {
        let v = q.take();
        let (p, i) = ((v / 1000) as usize, v % 1000);
        // Per-producer order is preserved.
        assert!(last[p].is_none_or(|prev| prev < i));
        last[p] = Some(i);
    }
    for h in producers {
        h.join().unwrap();
    }
    assert_eq!(last, [Some(249); 4]);
}

#[test]
fn timed_offer_succeeds_when_space_frees() {
    let q = Arc::new(BoundedBlockingQueue::new(1).unwrap());
    q.put(0);
    let qq = Arc::clone(&q);
    let producer = thread::spawn(move || qq.offer_timeout(1, Duration::from_secs(10)));
    wait_until("producer blocked", || !producer.is_finished());
    settle();
    assert_eq!(q.take(), 0);
    assert_eq!(producer.join().unwrap(), Ok(()));
    assert_eq!(q.poll(), Some(1));
}

#[test]
fn timed_poll_respects_timeout() {
    let q: BoundedBlockingQueue<u8> = BoundedBlockingQueue::new(1).unwrap();
    let start = Instant::now();
    assert_eq!(q.poll_timeout(Duration::from_millis(50)), None);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn clear_releases_blocked_producers() {
    let q = Arc::new(BoundedBlockingQueue::new(1).unwrap());
    q.put(0);
    let qq = Arc::clone(&q);
    let producer = thread::spawn(move || qq.put(1));
    settle();
    q.clear();
    producer.join().unwrap();
    assert_eq!(q.poll(), Some(1));
}

#[test]
fn interrupt_cancels_blocked_take() {
    let q = Arc::new(BoundedBlockingQueue::<u32>::new(1).unwrap());
    let (unit_tx, unit_rx) = std::sync::mpsc::channel();

    let qc = Arc::clone(&q);
    let consumer = thread::spawn(move || {
        unit_tx.send(Unit::current()).unwrap();
        let result = qc.take_interruptibly();
        (result, Unit::current().is_interrupted())
    });
    let unit = unit_rx.recv().unwrap();
    settle();
    unit.interrupt();

    let (result, still_flagged) = consumer.join().unwrap();
    assert_eq!(result, Err(SyncError::Interrupted));
    assert!(!still_flagged);

    // The queue is untouched and still usable.
    q.put(5);
    assert_eq!(q.take_interruptibly(), Ok(5));
}

#[test]
fn interrupt_cancels_blocked_put() {
    let q = Arc::new(BoundedBlockingQueue::new(1).unwrap());
    q.put(1);
    let (unit_tx, unit_rx) = std::sync::mpsc::channel();

    let qc = Arc::clone(&q);
    let producer = thread::spawn(move || {
        unit_tx.send(Unit::current()).unwrap();
        qc.put_interruptibly(2)
    });
    let unit = unit_rx.recv().unwrap();
    settle();
    unit.interrupt();

    assert_eq!(producer.join().unwrap(), Err(SyncError::Interrupted));
    assert_eq!(q.len(), 1);
    assert_eq!(q.poll(), Some(1));
}
