use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use multicam_kernel::{BoundedFrameBuffer, FrameRegistry, StreamId, SyncOutcome};

fn registry_with(ids: &[&str], sync: bool) -> Arc<FrameRegistry> {
    let registry = Arc::new(FrameRegistry::new());
    for id in ids {
        registry
            .register(StreamId::from(*id), Arc::new(BoundedFrameBuffer::new(2)), sync)
            .unwrap();
    }
    registry
}

#[test]
fn no_participant_passes_before_all_arrive() {
    let registry = registry_with(&["a", "b", "c"], true);
    registry.set_sync_enabled(true);

    let (tx, rx) = mpsc::channel();
    let mut handles = Vec::new();
    for id in ["a", "b"] {
        let registry = registry.clone();
        let tx = tx.clone();
        handles.push(thread::spawn(move || {
            tx.send(registry.sync(&StreamId::from(id))).unwrap();
        }));
    }

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(registry.arrived_count(), 2);

    assert_eq!(registry.sync(&StreamId::from("c")), SyncOutcome::LastArrival);
    for _ in 0..2 {
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            SyncOutcome::Released
        );
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(registry.arrived_count(), 0);
}

#[test]
fn participants_advance_in_lockstep() {
    const ROUNDS: usize = 50;
    let registry = registry_with(&["a", "b", "c"], true);
    registry.set_sync_enabled(true);
    let progress: Arc<Vec<AtomicUsize>> = Arc::new((0..3).map(|_| AtomicUsize::new(0)).collect());

    let handles: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .enumerate()
        .map(|(slot, id)| {
            let registry = registry.clone();
            let progress = progress.clone();
            thread::spawn(move || {
                let id = StreamId::from(id);
                for round in 0..ROUNDS {
                    registry.sync(&id);
                    progress[slot].store(round + 1, Ordering::SeqCst);
                    // Nobody can be more than one round ahead of anybody else.
                    for other in progress.iter() {
                        let theirs = other.load(Ordering::SeqCst);
                        assert!(theirs >= round, "participant ran ahead of the barrier");
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(registry.generation(), ROUNDS as u64);
}

#[test]
fn non_participants_never_block() {
    let registry = registry_with(&["a"], false);
    registry.set_sync_enabled(true);
    assert_eq!(registry.sync(&StreamId::from("a")), SyncOutcome::NotParticipant);
    assert_eq!(
        registry.sync(&StreamId::from("unknown")),
        SyncOutcome::NotParticipant
    );
}

#[test]
fn unregistering_the_missing_participant_releases_the_round() {
    let registry = registry_with(&["a", "b"], true);
    registry.set_sync_enabled(true);

    let waiter = {
        let registry = registry.clone();
        thread::spawn(move || registry.sync(&StreamId::from("a")))
    };
    thread::sleep(Duration::from_millis(100));

    assert!(registry.unregister(&StreamId::from("b")).is_some());
    assert_eq!(waiter.join().unwrap(), SyncOutcome::Released);
    assert_eq!(registry.participants(), vec![StreamId::from("a")]);

    // Sole participant now passes straight through.
    assert_eq!(registry.sync(&StreamId::from("a")), SyncOutcome::LastArrival);
}

#[test]
fn wake_all_frees_held_participants() {
    let registry = registry_with(&["a", "b"], true);

    let waiter = {
        let registry = registry.clone();
        thread::spawn(move || registry.sync(&StreamId::from("a")))
    };
    thread::sleep(Duration::from_millis(100));
    registry.wake_all();
    assert_eq!(waiter.join().unwrap(), SyncOutcome::Woken);
}
