//! Integration tests exercising `Database` the way a host process would:
//! concurrent lock waits, deadlock breaking, crash-and-recover durability,
//! and redo-log wraparound under periodic checkpointing.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use cooldb::config::DatabaseConfig;
use cooldb::Database;
use cooldb_common::{Affinity, FilePage, LatchMode, LockMode};
use cooldb_txn::Transaction;
use tempfile::tempdir;

fn cfg(dir: &std::path::Path) -> DatabaseConfig {
    DatabaseConfig {
        buffer_pool_pages: 16,
        data_dir: dir.to_path_buf(),
        redo_log_pages: 64,
        initial_data_pages: 32,
        ..Default::default()
    }
}

/// Scenario: a single committed write survives a crash (drop without a
/// clean `stop()`) and is restored by startup recovery on reopen.
#[test]
fn commit_survives_crash_and_reopen() {
    let dir = tempdir().unwrap();
    let page = FilePage::new(0, 2);
    {
        let db = Database::open(cfg(dir.path())).unwrap();
        let trans = db.begin_transaction();
        let mut buf = db.pin(page, LatchMode::Exclusive).unwrap();
        let lsn = db.write_value(&trans, &mut buf, 77).unwrap();
        db.unpin_dirty(buf, Affinity::Liked, lsn);
        db.commit(&trans).unwrap();
        // dropped here without stop(): no final checkpoint, nothing flushed
        // to the data file beyond what the WAL already has durably.
    }

    let db = Database::open(cfg(dir.path())).unwrap();
    let buf = db.pin(page, LatchMode::Shared).unwrap();
    assert_eq!(db.read_value(&buf), 77);
    db.unpin(buf, Affinity::Liked);
}

/// Scenario: a writer blocks behind two concurrent readers of the same
/// resource and is granted only once both have committed.
#[test]
fn writer_waits_for_concurrent_readers() {
    let dir = tempdir().unwrap();
    let db = Arc::new(Database::open(cfg(dir.path())).unwrap());
    let resource = 7u64;

    let t1 = db.begin_transaction();
    let t2 = db.begin_transaction();
    let t3 = db.begin_transaction();

    db.lock(resource, &t1, LockMode::Shared).unwrap();
    db.lock(resource, &t2, LockMode::Shared).unwrap();

    let (db3, t3c) = (db.clone(), t3.clone());
    let writer = std::thread::spawn(move || db3.lock(resource, &t3c, LockMode::Exclusive));

    std::thread::sleep(Duration::from_millis(150));
    assert!(!writer.is_finished(), "writer should still be blocked behind both readers");

    db.commit(&t1).unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert!(!writer.is_finished(), "writer should still be blocked behind the remaining reader");

    db.commit(&t2).unwrap();
    writer.join().unwrap().unwrap();
    db.commit(&t3).unwrap();
}

/// Scenario: three transactions each hold one resource and each wants the
/// next one's — a three-way cycle. Exactly one is cancelled to break it;
/// once its holder aborts (and later the other two commit), the rest of
/// the ring drains. Grounded in the deadlock detector's own
/// `three_way_cycle_cancels_cheapest` unit test, exercised here through
/// `Database::lock` instead of the bare `LockManager`.
#[test]
fn three_way_deadlock_cancels_exactly_one_victim() {
    let dir = tempdir().unwrap();
    let db = Arc::new(Database::open(cfg(dir.path())).unwrap());

    let t1 = db.begin_transaction();
    let t2 = db.begin_transaction();
    let t3 = db.begin_transaction();
    let by_id: Vec<(u64, Arc<Transaction>)> = vec![(1, t1.clone()), (2, t2.clone()), (3, t3.clone())];

    db.lock(100, &t1, LockMode::Exclusive).unwrap();
    db.lock(200, &t2, LockMode::Exclusive).unwrap();
    db.lock(300, &t3, LockMode::Exclusive).unwrap();

    let (tx, rx) = mpsc::channel();
    for (id, resource, trans) in [(1u64, 200u64, t1.clone()), (2, 300, t2.clone()), (3, 100, t3.clone())] {
        let db = db.clone();
        let tx = tx.clone();
        std::thread::spawn(move || {
            let result = db.lock(resource, &trans, LockMode::Exclusive);
            let _ = tx.send((id, result.is_ok()));
        });
    }
    drop(tx);

    let mut victims = 0;
    let mut successes = 0;
    for _ in 0..3 {
        let (id, ok) = rx.recv_timeout(Duration::from_secs(10)).expect("every lock attempt should eventually resolve");
        let trans = &by_id.iter().find(|(tid, _)| *tid == id).unwrap().1;
        if ok {
            successes += 1;
            db.commit(trans).unwrap();
        } else {
            victims += 1;
            db.abort(trans).unwrap();
        }
    }
    assert_eq!(victims, 1, "exactly one transaction should be cancelled to break the cycle");
    assert_eq!(successes, 2);
}

/// Scenario: several transactions race to increment a shared byte, the
/// process is dropped mid-stream without a clean shutdown, and recovery
/// restores the page to exactly the sum of what actually committed.
#[test]
fn concurrent_increments_survive_crash_and_recovery() {
    let dir = tempdir().unwrap();
    let page = FilePage::new(0, 5);
    const THREADS: u64 = 3;
    const PER_THREAD: u64 = 40;
    let resource = 555u64;

    {
        let db = Arc::new(Database::open(cfg(dir.path())).unwrap());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        let trans = db.begin_transaction();
                        db.lock(resource, &trans, LockMode::Exclusive).unwrap();
                        let mut buf = db.pin(page, LatchMode::Exclusive).unwrap();
                        let current = db.read_value(&buf);
                        let lsn = db.write_value(&trans, &mut buf, current.wrapping_add(1)).unwrap();
                        db.unpin_dirty(buf, Affinity::Liked, lsn);
                        db.commit(&trans).unwrap();
                        db.unlock_all(resource, &trans);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // Dropped here: no stop(), no final checkpoint. Every increment is
        // only durable via its own commit record in the WAL.
    }

    let db = Database::open(cfg(dir.path())).unwrap();
    let buf = db.pin(page, LatchMode::Shared).unwrap();
    assert_eq!(db.read_value(&buf), (THREADS * PER_THREAD) as u8);
    db.unpin(buf, Affinity::Liked);
}

/// Scenario: a redo log far too small to hold every record ever written
/// keeps accepting commits indefinitely because periodic checkpointing
/// advances the firewall and lets old, now-unneeded space be reused.
/// `LogExhausted` itself (writing past the firewall with no checkpoint to
/// save it) is exercised directly against `RedoLogWriter` at the
/// `cooldb-wal` crate level.
#[test]
fn redo_log_wraps_under_periodic_checkpointing() {
    let dir = tempdir().unwrap();
    let mut config = cfg(dir.path());
    config.redo_log_pages = 1;
    let db = Database::open(config).unwrap();
    let page = FilePage::new(0, 6);

    for i in 0..200u32 {
        let trans = db.begin_transaction();
        let mut buf = db.pin(page, LatchMode::Exclusive).unwrap();
        let lsn = db.write_value(&trans, &mut buf, (i % 256) as u8).unwrap();
        db.unpin_dirty(buf, Affinity::Liked, lsn);
        db.commit(&trans).unwrap();
        if i % 10 == 0 {
            db.checkpoint_now().unwrap();
        }
    }

    let buf = db.pin(page, LatchMode::Shared).unwrap();
    assert_eq!(db.read_value(&buf), 199);
    db.unpin(buf, Affinity::Liked);
}

/// Scenario: a segment grows by `nextSize` on each allocation, doubling
/// via `growthRate`, and returns its pages to the free pool when dropped.
/// The fault-injection hooks for this path are unit-tested directly on
/// `SegmentManager` in `cooldb-space`.
#[test]
fn segment_allocation_grows_and_drop_frees_pages() {
    let dir = tempdir().unwrap();
    let db = Database::open(cfg(dir.path())).unwrap();
    let segment_id = FilePage::new(0, 8);
    db.create_segment(segment_id, 2, 4, 4);

    let trans = db.begin_transaction();
    let e1 = db.allocate_extent(&trans, segment_id).unwrap();
    assert_eq!(e1.size, 4);
    let e2 = db.allocate_extent(&trans, segment_id).unwrap();
    assert_eq!(e2.size, 8);

    db.drop_segment(&trans, segment_id).unwrap();
}
