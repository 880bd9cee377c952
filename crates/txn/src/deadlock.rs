use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use cooldb_common::TransId;
use tracing::{info, warn};

/// Directed wait-for graph: an edge `waiter -> holder` means `waiter` is
/// blocked behind a lock `holder` is holding. Held behind one global mutex,
/// locked only for the duration of a cycle check, per the resource policy.
pub struct DeadlockDetector {
    edges: Mutex<HashMap<TransId, HashSet<TransId>>>,
}

impl DeadlockDetector {
    pub fn new() -> Self {
        Self { edges: Mutex::new(HashMap::new()) }
    }

    /// Record that `waiter` is now blocked behind `holder`. If this closes a
    /// cycle, cancel the cheapest transaction on it (by `cost_of`) and
    /// remove its edges so the cycle is broken; returns the cancelled
    /// transaction, if any.
    pub fn wait_for<F>(&self, waiter: TransId, holder: TransId, cost_of: F) -> Option<TransId>
    where
        F: Fn(TransId) -> u64,
    {
        let mut edges = self.edges.lock().unwrap();
        edges.entry(waiter).or_default().insert(holder);

        let cycle = find_cycle(&edges, waiter);
        let Some(cycle) = cycle else { return None };

        let victim = cycle.iter().copied().min_by_key(|&t| cost_of(t)).unwrap();
        warn!(victim, cycle_len = cycle.len(), "deadlock detected, cancelling victim");
        edges.remove(&victim);
        for set in edges.values_mut() {
            set.remove(&victim);
        }
        Some(victim)
    }

    /// `t` finished (committed or rolled back): it can no longer block
    /// anyone, so remove every edge that mentions it.
    pub fn did_commit(&self, t: TransId) {
        let mut edges = self.edges.lock().unwrap();
        edges.remove(&t);
        for set in edges.values_mut() {
            set.remove(&t);
        }
        info!(t, "cleared wait-for edges for finished transaction");
    }
}

impl Default for DeadlockDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-first search for a cycle that includes `start`.
fn find_cycle(edges: &HashMap<TransId, HashSet<TransId>>, start: TransId) -> Option<Vec<TransId>> {
    let mut visited = HashSet::new();
    let mut path = Vec::new();

    fn dfs(
        node: TransId,
        start: TransId,
        edges: &HashMap<TransId, HashSet<TransId>>,
        visited: &mut HashSet<TransId>,
        path: &mut Vec<TransId>,
    ) -> bool {
        path.push(node);
        if let Some(next) = edges.get(&node) {
            for &n in next {
                if n == start {
                    return true;
                }
                if !visited.contains(&n) {
                    visited.insert(n);
                    if dfs(n, start, edges, visited, path) {
                        return true;
                    }
                }
            }
        }
        path.pop();
        false
    }

    visited.insert(start);
    if dfs(start, start, edges, &mut visited, &mut path) {
        Some(path)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_way_cycle_cancels_cheapest() {
        let dd = DeadlockDetector::new();
        let cost = |t: TransId| t; // use trans_id itself as cost: lowest id is cheapest
        assert!(dd.wait_for(1, 2, cost).is_none());
        assert!(dd.wait_for(2, 3, cost).is_none());
        let victim = dd.wait_for(3, 1, cost);
        assert_eq!(victim, Some(1));
    }

    #[test]
    fn no_cycle_no_victim() {
        let dd = DeadlockDetector::new();
        let cost = |t: TransId| t;
        assert!(dd.wait_for(1, 2, cost).is_none());
        assert!(dd.wait_for(2, 3, cost).is_none());
    }

    #[test]
    fn did_commit_clears_edges() {
        let dd = DeadlockDetector::new();
        let cost = |t: TransId| t;
        dd.wait_for(1, 2, cost);
        dd.did_commit(2);
        // 1's wait on 2 is gone, so 2 waiting on 1 no longer closes a cycle
        assert!(dd.wait_for(2, 1, cost).is_none());
    }
}
