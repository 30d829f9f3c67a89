use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use multicam_kernel::{DeviceId, PoolConfig, WorkerPool};

fn pool(devices: u32, per_device: usize, reserve: bool) -> Arc<WorkerPool<usize>> {
    let config = PoolConfig {
        workers_per_device: per_device,
        reserve_fast_path: reserve,
        capacity_limit: None,
    };
    let devices: Vec<DeviceId> = (0..devices).map(DeviceId).collect();
    Arc::new(WorkerPool::initialize(&devices, &config, |_, _| Ok(0usize)).unwrap())
}

#[test]
fn concurrent_holders_never_exceed_capacity() {
    let pool = pool(2, 2, true);
    let capacity = pool.capacity();
    assert_eq!(capacity, 3);

    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let holders = holders.clone();
            let peak = peak.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    let lease = pool.lease().unwrap();
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    lease.run(|count| *count += 1).unwrap();
                    thread::sleep(Duration::from_millis(1));
                    holders.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= capacity);
    assert_eq!(pool.available(), capacity);
    assert_eq!(pool.busy_count(), 0);

    // Every run landed on some general worker.
    let keys: Vec<_> = (0..capacity).map(|_| pool.acquire().unwrap()).collect();
    let total: usize = keys
        .iter()
        .map(|key| pool.with_worker(*key, |count| *count).unwrap())
        .sum();
    assert_eq!(total, 8 * 25);
}

#[test]
fn fast_path_is_not_blocked_by_general_contention() {
    let pool = pool(1, 3, true);

    // Exhaust the general pool.
    let held: Vec<_> = (0..pool.capacity()).map(|_| pool.acquire().unwrap()).collect();
    assert_eq!(pool.available(), 0);

    // A general acquire now blocks...
    let (tx, rx) = mpsc::channel();
    let blocked = {
        let pool = pool.clone();
        thread::spawn(move || tx.send(pool.acquire()).unwrap())
    };
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    // ...while the fast path still goes through.
    for _ in 0..3 {
        let lease = pool.lease_fast_path().unwrap();
        assert!(lease.is_fast_path());
        assert_eq!(Some(lease.key()), pool.fast_path_key());
    }

    pool.release(held[0]).unwrap();
    let key = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(key, held[0]);
    blocked.join().unwrap();
}

#[test]
fn fast_path_serializes_its_single_worker() {
    let pool = pool(1, 2, true);
    let in_use = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let in_use = in_use.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for _ in 0..10 {
                    let _lease = pool.lease_fast_path().unwrap();
                    assert_eq!(in_use.fetch_add(1, Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_micros(200));
                    in_use.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn parked_worker_release_wakes_waiter_without_blocking() {
    let config = PoolConfig {
        workers_per_device: 2,
        reserve_fast_path: false,
        capacity_limit: Some(1),
    };
    let pool = Arc::new(
        WorkerPool::initialize(&[DeviceId(0)], &config, |_, index| Ok(index)).unwrap(),
    );
    let parked = pool.keys()[1];
    let held = pool.acquire().unwrap();

    // A second caller queues behind the single general worker.
    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || tx.send(pool.acquire()).unwrap())
    };
    thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());

    // Returning the parked worker must not wait, and it goes to the queued caller.
    let (done_tx, done_rx) = mpsc::channel();
    {
        let pool = pool.clone();
        thread::spawn(move || done_tx.send(pool.release(parked).is_ok()).unwrap());
    }
    assert!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap());
    let handed = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(handed, parked);
    waiter.join().unwrap();
    assert_eq!(pool.with_worker(handed, |index| *index).unwrap(), 1);

    // The original holder's release is not starved of its permit.
    let (done_tx, done_rx) = mpsc::channel();
    {
        let pool = pool.clone();
        thread::spawn(move || done_tx.send(pool.release(held).is_ok()).unwrap());
    }
    assert!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap());
    pool.release(handed).unwrap();

    assert_eq!(pool.capacity(), 2);
    assert_eq!(pool.available(), 2);
    assert_eq!(pool.busy_count(), 0);
}
