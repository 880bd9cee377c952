use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use cooldb_common::{Lsn, TransId, UndoPointer};

/// One transaction's mutable state: where its undo chain starts and where
/// the walker currently is, plus the rollback-cost counter the deadlock
/// detector uses to pick a victim.
struct TransactionState {
    undo_nxt: UndoPointer,
    /// The earliest undo record this transaction ever wrote — the chain's
    /// tail. Set once, the first time `set_undo_nxt` sees a null chain.
    first_lsn: UndoPointer,
    committed: bool,
}

/// A transaction. Shared via `Arc` across the threads that act on its
/// behalf (the owning connection plus the deadlock detector and recovery).
pub struct Transaction {
    pub trans_id: TransId,
    /// `wal.endOfLog` at `beginTransaction`, used for read-committed
    /// visibility: readers under this transaction's snapshot see every
    /// write committed before `commit_lsn`.
    pub commit_lsn: Lsn,
    cancelled: AtomicBool,
    rollback_cost: AtomicU64,
    state: Mutex<TransactionState>,
}

impl Transaction {
    pub fn new(trans_id: TransId, commit_lsn: Lsn) -> Self {
        Self {
            trans_id,
            commit_lsn,
            cancelled: AtomicBool::new(false),
            rollback_cost: AtomicU64::new(0),
            state: Mutex::new(TransactionState { undo_nxt: UndoPointer::NULL, first_lsn: UndoPointer::NULL, committed: false }),
        }
    }

    pub fn undo_nxt(&self) -> UndoPointer {
        self.state.lock().unwrap().undo_nxt
    }

    /// Advance the undo chain head. The first call (from a null chain)
    /// also stamps `first_lsn`, which never changes afterward.
    pub fn set_undo_nxt(&self, ptr: UndoPointer) {
        let mut state = self.state.lock().unwrap();
        if state.undo_nxt.is_null() {
            state.first_lsn = ptr;
        }
        state.undo_nxt = ptr;
    }

    /// The earliest undo record this transaction ever wrote, or the null
    /// pointer if it has not written one yet.
    pub fn first_lsn(&self) -> UndoPointer {
        self.state.lock().unwrap().first_lsn
    }

    pub fn is_committed(&self) -> bool {
        self.state.lock().unwrap().committed
    }

    pub fn mark_committed(&self) {
        self.state.lock().unwrap().committed = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn rollback_cost(&self) -> u64 {
        self.rollback_cost.load(Ordering::SeqCst)
    }

    pub fn add_rollback_cost(&self, amount: u64) {
        self.rollback_cost.fetch_add(amount, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_observable() {
        let t = Transaction::new(1, 0);
        assert!(!t.is_cancelled());
        t.cancel();
        assert!(t.is_cancelled());
    }

    #[test]
    fn undo_chain_head_updates() {
        let t = Transaction::new(1, 0);
        assert!(t.undo_nxt().is_null());
        let ptr = UndoPointer { page: cooldb_common::FilePage::new(0, 0), offset: 4, lsn: 9 };
        t.set_undo_nxt(ptr);
        assert_eq!(t.undo_nxt(), ptr);
    }

    #[test]
    fn first_lsn_is_stamped_once() {
        let t = Transaction::new(1, 0);
        assert!(t.first_lsn().is_null());
        let first = UndoPointer { page: cooldb_common::FilePage::new(0, 0), offset: 4, lsn: 9 };
        t.set_undo_nxt(first);
        assert_eq!(t.first_lsn(), first);

        let second = UndoPointer { page: cooldb_common::FilePage::new(0, 0), offset: 20, lsn: 11 };
        t.set_undo_nxt(second);
        assert_eq!(t.undo_nxt(), second);
        assert_eq!(t.first_lsn(), first, "first_lsn must not move once a chain has started");
    }
}
