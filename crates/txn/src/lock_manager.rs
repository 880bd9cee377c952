use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use cooldb_common::{CoolDbError, LockMode, TransId};
use tracing::trace;

use crate::deadlock::DeadlockDetector;

/// Logical resource identifier. Callers map whatever they are locking
/// (a page, a segment, a catalog row) onto a `u64`.
pub type ResourceId = u64;

#[derive(Clone, Copy, Debug)]
struct LockEntry {
    trans_id: TransId,
    exclusive: bool,
    granted: bool,
}

struct ResourceLock {
    queue: Mutex<VecDeque<LockEntry>>,
    cond: Condvar,
}

impl ResourceLock {
    fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), cond: Condvar::new() }
    }
}

/// Per-resource read-write lock queues with reentrancy, upgrade, and a
/// deadlock detector consulted on every wait.
pub struct LockManager {
    resources: Mutex<HashMap<ResourceId, Arc<ResourceLock>>>,
    deadlock: Arc<DeadlockDetector>,
}

impl LockManager {
    pub fn new(deadlock: Arc<DeadlockDetector>) -> Self {
        Self { resources: Mutex::new(HashMap::new()), deadlock }
    }

    fn resource(&self, id: ResourceId) -> Arc<ResourceLock> {
        self.resources.lock().unwrap().entry(id).or_insert_with(|| Arc::new(ResourceLock::new())).clone()
    }

    /// Garbage-collect entries belonging to transactions that already
    /// finished, lazily, on each access — callers pass `is_active` so the
    /// lock manager need not depend on the transaction pool.
    fn gc(queue: &mut VecDeque<LockEntry>, is_active: &dyn Fn(TransId) -> bool) {
        queue.retain(|e| is_active(e.trans_id));
    }

    pub fn lock(
        &self,
        resource: ResourceId,
        trans_id: TransId,
        mode: LockMode,
        cancelled: &dyn Fn(TransId) -> bool,
        rollback_cost: &dyn Fn(TransId) -> u64,
        is_active: &dyn Fn(TransId) -> bool,
    ) -> Result<(), CoolDbError> {
        let res = self.resource(resource);
        let exclusive = matches!(mode, LockMode::Exclusive);
        let mut queue = res.queue.lock().unwrap();

        loop {
            Self::gc(&mut queue, is_active);

            if let Some(existing) = queue.iter().find(|e| e.trans_id == trans_id) {
                // Reentrancy: already hold an equal-or-stronger lock.
                if existing.granted && (existing.exclusive || !exclusive) {
                    trace!(resource, trans_id, "reentrant lock, no-op");
                    return Ok(());
                }
                // Upgrade: sole holder converts directly.
                if existing.granted && !existing.exclusive && exclusive {
                    let others_granted = queue.iter().any(|e| e.trans_id != trans_id && e.granted);
                    if !others_granted {
                        for e in queue.iter_mut() {
                            if e.trans_id == trans_id {
                                e.exclusive = true;
                            }
                        }
                        return Ok(());
                    }
                }
            } else {
                queue.push_back(LockEntry { trans_id, exclusive, granted: false });
            }

            if Self::can_grant(&queue, trans_id, exclusive) {
                for e in queue.iter_mut() {
                    if e.trans_id == trans_id {
                        e.granted = true;
                        e.exclusive = exclusive;
                    }
                }
                return Ok(());
            }

            // Block: consult the deadlock detector against every current
            // holder before waiting.
            let holders: Vec<TransId> = queue.iter().filter(|e| e.granted && e.trans_id != trans_id).map(|e| e.trans_id).collect();
            for holder in holders {
                if let Some(victim) = self.deadlock.wait_for(trans_id, holder, |t| rollback_cost(t)) {
                    if victim == trans_id {
                        queue.retain(|e| e.trans_id != trans_id);
                        return Err(CoolDbError::TransactionCancelled(trans_id));
                    }
                }
            }

            if cancelled(trans_id) {
                queue.retain(|e| e.trans_id != trans_id);
                return Err(CoolDbError::TransactionCancelled(trans_id));
            }

            let (guard, timeout) = res.cond.wait_timeout(queue, std::time::Duration::from_millis(50)).unwrap();
            queue = guard;
            let _ = timeout;
            if cancelled(trans_id) {
                queue.retain(|e| e.trans_id != trans_id);
                return Err(CoolDbError::TransactionCancelled(trans_id));
            }
        }
    }

    /// Non-blocking: grants immediately or returns `false`, never enqueues.
    pub fn try_lock(&self, resource: ResourceId, trans_id: TransId, mode: LockMode, is_active: &dyn Fn(TransId) -> bool) -> bool {
        let res = self.resource(resource);
        let exclusive = matches!(mode, LockMode::Exclusive);
        let mut queue = res.queue.lock().unwrap();
        Self::gc(&mut queue, is_active);

        if let Some(existing) = queue.iter().find(|e| e.trans_id == trans_id) {
            if existing.granted && (existing.exclusive || !exclusive) {
                return true;
            }
            return false;
        }

        if Self::can_grant(&queue, trans_id, exclusive) {
            queue.push_back(LockEntry { trans_id, exclusive, granted: true });
            true
        } else {
            false
        }
    }

    pub fn unlock_all(&self, resource: ResourceId, trans_id: TransId) {
        let res = self.resource(resource);
        let mut queue = res.queue.lock().unwrap();
        queue.retain(|e| e.trans_id != trans_id);
        res.cond.notify_all();
        self.deadlock.did_commit(trans_id);
    }

    /// A request is granted iff no other transaction holds a conflicting
    /// lock, AND no exclusive request from another transaction precedes it
    /// in the queue — a shared request must not jump ahead of a writer
    /// that is already waiting, or readers can starve it indefinitely.
    fn can_grant(queue: &VecDeque<LockEntry>, trans_id: TransId, exclusive: bool) -> bool {
        for e in queue.iter() {
            if e.trans_id == trans_id {
                break;
            }
            if e.granted {
                if e.exclusive || exclusive {
                    return false;
                }
            } else if e.exclusive {
                return false;
            }
        }
        true
    }
}
