use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use cooldb_common::{Lsn, TransId, UndoPointer};
use tracing::debug;

use crate::transaction::Transaction;

/// A base transaction id `B` plus a compact bitmap of committed states for
/// `[B, B+N)`. `isCommitted(t)` is `true` for every `t < B` and `false` for
/// every `t >= B + N`; the base advances, compacting the bitmap, whenever
/// the lowest outstanding id commits.
pub struct CommitList {
    base: TransId,
    bits: VecDeque<bool>,
}

impl CommitList {
    pub fn new(base: TransId) -> Self {
        Self { base, bits: VecDeque::new() }
    }

    pub fn is_committed(&self, t: TransId) -> bool {
        if t < self.base {
            return true;
        }
        let i = (t - self.base) as usize;
        self.bits.get(i).copied().unwrap_or(false)
    }

    pub fn set_committed(&mut self, t: TransId) {
        if t < self.base {
            return;
        }
        let i = (t - self.base) as usize;
        while self.bits.len() <= i {
            self.bits.push_back(false);
        }
        self.bits[i] = true;
        self.compact();
    }

    fn compact(&mut self) {
        while matches!(self.bits.front(), Some(true)) {
            self.bits.pop_front();
            self.base += 1;
        }
    }

    pub fn base(&self) -> TransId {
        self.base
    }
}

/// Owns transaction id allocation, the master commit list, and the
/// active-transaction table.
pub struct TransactionPool {
    next_trans_id: Mutex<TransId>,
    commit_list: Mutex<CommitList>,
    active: Mutex<HashMap<TransId, Arc<Transaction>>>,
}

impl TransactionPool {
    pub fn new(next_trans_id: TransId) -> Self {
        Self {
            next_trans_id: Mutex::new(next_trans_id),
            commit_list: Mutex::new(CommitList::new(next_trans_id)),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_trans_id(&self) -> TransId {
        *self.next_trans_id.lock().unwrap()
    }

    /// Allocate the next id, enlist it, and stamp its begin-time `wal.endOfLog`.
    pub fn begin_transaction(&self, wal_tail: Lsn) -> Arc<Transaction> {
        let mut next = self.next_trans_id.lock().unwrap();
        let id = *next;
        *next += 1;
        let trans = Arc::new(Transaction::new(id, wal_tail));
        self.active.lock().unwrap().insert(id, trans.clone());
        debug!(trans_id = id, "began transaction");
        trans
    }

    /// Commit the slot in the master list; may advance the compacted base.
    pub fn end_transaction(&self, trans_id: TransId) {
        self.commit_list.lock().unwrap().set_committed(trans_id);
        if let Some(t) = self.active.lock().unwrap().remove(&trans_id) {
            t.mark_committed();
        }
        debug!(trans_id, "ended transaction");
    }

    pub fn is_committed(&self, t: TransId) -> bool {
        self.commit_list.lock().unwrap().is_committed(t)
    }

    pub fn get(&self, trans_id: TransId) -> Option<Arc<Transaction>> {
        self.active.lock().unwrap().get(&trans_id).cloned()
    }

    pub fn active_ids(&self) -> Vec<TransId> {
        self.active.lock().unwrap().keys().copied().collect()
    }

    /// Lower bound for the redo firewall: the earliest `commit_lsn` among
    /// transactions still active.
    pub fn calc_min_commit_lsn(&self) -> Option<Lsn> {
        self.active.lock().unwrap().values().map(|t| t.commit_lsn).min()
    }

    /// Lower bound for undo-log retention: the earliest `first_lsn` among
    /// transactions still active that have actually written one. `None` if
    /// no active transaction has written an undo record, meaning there is
    /// nothing that still needs retaining.
    pub fn calc_min_undo_pointer(&self) -> Option<UndoPointer> {
        self.active
            .lock()
            .unwrap()
            .values()
            .map(|t| t.first_lsn())
            .filter(|ptr| !ptr.is_null())
            .min_by_key(|ptr| (ptr.page.file_id, ptr.page.page_num, ptr.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_list_compacts_contiguous_base() {
        let mut cl = CommitList::new(1);
        cl.set_committed(2);
        assert_eq!(cl.base(), 1);
        assert!(!cl.is_committed(1));
        cl.set_committed(1);
        assert_eq!(cl.base(), 3);
        assert!(cl.is_committed(1));
        assert!(cl.is_committed(2));
        assert!(!cl.is_committed(3));
    }

    #[test]
    fn begin_and_end_transaction() {
        let pool = TransactionPool::new(1);
        let t1 = pool.begin_transaction(0);
        let t2 = pool.begin_transaction(10);
        assert_eq!(t1.trans_id, 1);
        assert_eq!(t2.trans_id, 2);
        assert!(!pool.is_committed(1));
        pool.end_transaction(1);
        assert!(pool.is_committed(1));
        assert_eq!(pool.calc_min_commit_lsn(), Some(10));
    }
}
