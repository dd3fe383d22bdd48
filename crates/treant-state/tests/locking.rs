use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use treant_state::{LockGuard, LockMode, StateError, StateHandle, StateOptions, TreantFile};

const QUIET: Duration = Duration::from_millis(200);
const PATIENT: Duration = Duration::from_secs(10);

#[test]
fn test_exclusive_blocks_shared_until_released() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("Treant.t.json");

    let held = LockGuard::acquire(&record, LockMode::Exclusive).unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let record = record.clone();
        thread::spawn(move || {
            let guard = LockGuard::acquire(&record, LockMode::Shared).unwrap();
            tx.send(guard.mode()).unwrap();
        })
    };

    assert!(rx.recv_timeout(QUIET).is_err(), "shared lock granted during exclusive hold");
    held.release();
    assert_eq!(rx.recv_timeout(PATIENT).unwrap(), LockMode::Shared);
    waiter.join().unwrap();
}

#[test]
fn test_shared_holders_coexist() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("Treant.t.json");

    let _held = LockGuard::acquire(&record, LockMode::Shared).unwrap();

    let (tx, rx) = mpsc::channel();
    let reader = {
        let record = record.clone();
        thread::spawn(move || {
            let _guard = LockGuard::acquire(&record, LockMode::Shared).unwrap();
            tx.send(()).unwrap();
        })
    };

    rx.recv_timeout(PATIENT)
        .expect("second shared lock should not wait");
    reader.join().unwrap();
}

#[test]
fn test_shared_blocks_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("Treant.t.json");

    let held = LockGuard::acquire(&record, LockMode::Shared).unwrap();

    let (tx, rx) = mpsc::channel();
    let writer = {
        let record = record.clone();
        thread::spawn(move || {
            let _guard = LockGuard::acquire(&record, LockMode::Exclusive).unwrap();
            tx.send(()).unwrap();
        })
    };

    assert!(rx.recv_timeout(QUIET).is_err(), "exclusive lock granted during shared hold");
    drop(held);
    rx.recv_timeout(PATIENT).unwrap();
    writer.join().unwrap();
}

#[test]
fn test_concurrent_writers_lose_no_updates() {
    const WRITERS: usize = 4;
    const ROUNDS: usize = 25;

    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("Treant.t.json");
    TreantFile::open(&record, StateOptions::default())
        .unwrap()
        .add_categories([("count", 0)])
        .unwrap();

    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let record = record.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let treant = TreantFile::open(&record, StateOptions::default()).unwrap();
                barrier.wait();
                for _ in 0..ROUNDS {
                    treant
                        .state()
                        .write(|txn| {
                            let current: usize = txn
                                .categories()
                                .get("count")
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0);
                            txn.add_categories([("count", current + 1)])
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let treant = TreantFile::open(&record, StateOptions::default()).unwrap();
    let count = treant.get_categories().unwrap()["count"].clone();
    assert_eq!(count, (WRITERS * ROUNDS).to_string());
}

#[test]
fn test_failed_write_releases_lock() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("Treant.t.json");
    let treant = TreantFile::open(&record, StateOptions::default()).unwrap();

    let err = treant
        .state()
        .write(|txn| {
            txn.add_tags(["half-done"])?;
            Err::<(), _>(StateError::UniverseNotFound("nope".into()))
        })
        .unwrap_err();
    assert!(err.is_not_found());

    let (tx, rx) = mpsc::channel();
    let record_for_thread = record.clone();
    thread::spawn(move || {
        let _guard = LockGuard::acquire(&record_for_thread, LockMode::Exclusive).unwrap();
        tx.send(()).unwrap();
    });
    rx.recv_timeout(PATIENT).unwrap();
    assert!(treant.get_tags().unwrap().is_empty());
}
