//! The wait-for graph: which transaction is blocked on which, with cycle
//! detection run before any thread is put to sleep.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::TransactionId;

/// One node per live transaction. `next` holds the transactions this one
/// is waiting for, `prev` the transactions waiting for it; the two sides
/// are kept symmetric so tearing a node out needs no global sweep.
#[derive(Debug, Default)]
struct WaitNode {
    next: Mutex<HashSet<TransactionId>>,
    prev: Mutex<HashSet<TransactionId>>,
}

/// Directed wait-for graph over transaction ids.
///
/// Nodes are held behind a map rather than linked to each other, so the
/// back-edges never form owning cycles; traversal resolves ids through
/// the map. At most one node mutex is held at a time: an edge insert
/// touches the two endpoint sets one after the other, and [`has_cycle`]
/// clones each successor set it visits. A check can therefore race with
/// concurrent edge changes and miss an edge added mid-traversal; callers
/// re-run the check on every blocking attempt, so a missed cycle is
/// caught the next time around.
///
/// [`has_cycle`]: WaitGraph::has_cycle
#[derive(Debug, Default)]
pub struct WaitGraph {
    nodes: Mutex<HashMap<TransactionId, Arc<WaitNode>>>,
}

impl WaitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, tid: TransactionId) -> Arc<WaitNode> {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.entry(tid).or_default().clone()
    }

    fn get(&self, tid: TransactionId) -> Option<Arc<WaitNode>> {
        self.nodes.lock().unwrap().get(&tid).cloned()
    }

    fn successors(&self, tid: TransactionId) -> Vec<TransactionId> {
        match self.get(tid) {
            Some(node) => node.next.lock().unwrap().iter().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Records that `from` is blocked waiting for `to`.
    pub fn add_wait(&self, from: TransactionId, to: TransactionId) {
        let from_node = self.node(from);
        let to_node = self.node(to);
        from_node.next.lock().unwrap().insert(to);
        to_node.prev.lock().unwrap().insert(from);
    }

    pub fn add_waits(&self, from: TransactionId, tids: impl IntoIterator<Item = TransactionId>) {
        for tid in tids {
            self.add_wait(from, tid);
        }
    }

    /// Drops every edge touching `tid`, in both directions. Called when
    /// the transaction releases a lock or aborts.
    pub fn release(&self, tid: TransactionId) {
        let Some(node) = self.get(tid) else {
            return;
        };
        let nexts: Vec<TransactionId> = node.next.lock().unwrap().drain().collect();
        let prevs: Vec<TransactionId> = node.prev.lock().unwrap().drain().collect();
        for other in nexts {
            if let Some(other_node) = self.get(other) {
                other_node.prev.lock().unwrap().remove(&tid);
            }
        }
        for other in prevs {
            if let Some(other_node) = self.get(other) {
                other_node.next.lock().unwrap().remove(&tid);
            }
        }
    }

    /// True when `tid` sits on a wait cycle: some successor chain leads
    /// back to `tid` itself. Cycles not passing through `tid` are ignored,
    /// since aborting `tid` would not break them.
    pub fn has_cycle(&self, tid: TransactionId) -> bool {
        let mut path = HashSet::new();
        let mut checked = HashSet::new();
        self.successors(tid)
            .into_iter()
            .any(|next| self.reaches(next, tid, &mut path, &mut checked))
    }

    fn reaches(
        &self,
        current: TransactionId,
        target: TransactionId,
        path: &mut HashSet<TransactionId>,
        checked: &mut HashSet<TransactionId>,
    ) -> bool {
        if current == target {
            return true;
        }
        if path.contains(&current) || checked.contains(&current) {
            return false;
        }
        path.insert(current);
        for next in self.successors(current) {
            if self.reaches(next, target, path, checked) {
                return true;
            }
        }
        path.remove(&current);
        checked.insert(current);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn tids(n: usize) -> Vec<TransactionId> {
        (0..n).map(|_| TransactionId::new()).collect()
    }

    fn assert_symmetric(graph: &WaitGraph) {
        let nodes = graph.nodes.lock().unwrap();
        for (tid, node) in nodes.iter() {
            for next in node.next.lock().unwrap().iter() {
                let next_node = &nodes[next];
                assert!(
                    next_node.prev.lock().unwrap().contains(tid),
                    "edge {tid:?} -> {next:?} has no inverse"
                );
            }
            for prev in node.prev.lock().unwrap().iter() {
                let prev_node = &nodes[prev];
                assert!(
                    prev_node.next.lock().unwrap().contains(tid),
                    "inverse edge {prev:?} -> {tid:?} has no forward edge"
                );
            }
        }
    }

    #[test]
    fn self_wait_is_a_cycle() {
        let graph = WaitGraph::new();
        let tid = TransactionId::new();
        graph.add_wait(tid, tid);
        assert!(graph.has_cycle(tid));
        graph.release(tid);
        assert!(!graph.has_cycle(tid));
    }

    #[test]
    fn two_node_cycle_is_seen_from_both_ends() {
        let graph = WaitGraph::new();
        let t = tids(2);
        graph.add_wait(t[0], t[1]);
        graph.add_wait(t[1], t[0]);
        assert_symmetric(&graph);
        assert!(graph.has_cycle(t[0]));
        assert!(graph.has_cycle(t[1]));

        graph.release(t[0]);
        assert_symmetric(&graph);
        assert!(!graph.has_cycle(t[0]));
        assert!(!graph.has_cycle(t[1]));
    }

    #[test]
    fn three_node_chain_cycles_until_an_edge_breaks() {
        let graph = WaitGraph::new();
        let t = tids(3);
        graph.add_wait(t[0], t[1]);
        graph.add_wait(t[1], t[2]);
        graph.add_wait(t[2], t[0]);
        for tid in &t {
            assert!(graph.has_cycle(*tid));
        }
        graph.release(t[1]);
        for tid in &t {
            assert!(!graph.has_cycle(*tid));
        }
    }

    #[test]
    fn thousand_node_ring() {
        let graph = WaitGraph::new();
        let t = tids(1000);
        for pair in t.windows(2) {
            graph.add_wait(pair[1], pair[0]);
        }
        graph.add_wait(t[0], t[999]);
        for tid in &t {
            assert!(graph.has_cycle(*tid));
        }
        graph.release(t[333]);
        for tid in &t {
            assert!(!graph.has_cycle(*tid));
        }
    }

    #[test]
    fn two_cycles_sharing_a_node() {
        let graph = WaitGraph::new();
        let t = tids(5);
        // 0 -> 2 -> 1 -> 0 and 3 -> 2 -> 4 -> 3.
        graph.add_wait(t[0], t[2]);
        graph.add_wait(t[2], t[1]);
        graph.add_wait(t[1], t[0]);
        graph.add_wait(t[3], t[2]);
        graph.add_wait(t[2], t[4]);
        graph.add_wait(t[4], t[3]);
        for tid in &t {
            assert!(graph.has_cycle(*tid));
        }

        graph.release(t[1]);
        assert!(!graph.has_cycle(t[1]));
        // The other cycle through node 2 is still alive.
        assert!(graph.has_cycle(t[2]));
        assert!(graph.has_cycle(t[3]));

        graph.release(t[0]);
        assert!(!graph.has_cycle(t[0]));
        assert!(graph.has_cycle(t[2]));

        graph.release(t[2]);
        for tid in &t {
            assert!(!graph.has_cycle(*tid));
        }
    }

    #[test]
    fn node_off_the_cycle_is_not_reported() {
        let graph = WaitGraph::new();
        let t = tids(3);
        // 0 waits into a 1 <-> 2 cycle but is not itself on it; aborting
        // 0 would not break anything.
        graph.add_wait(t[0], t[1]);
        graph.add_wait(t[1], t[2]);
        graph.add_wait(t[2], t[1]);
        assert!(!graph.has_cycle(t[0]));
        assert!(graph.has_cycle(t[1]));
        assert!(graph.has_cycle(t[2]));
    }

    #[test]
    fn cycle_checks_survive_concurrent_mutation() {
        let graph = Arc::new(WaitGraph::new());
        let t = Arc::new(tids(8));
        let stop = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for worker in 0..4 {
            let graph = graph.clone();
            let t = t.clone();
            let stop = stop.clone();
            handles.push(thread::spawn(move || {
                let mut rng = rand::thread_rng();
                while !stop.load(Ordering::Relaxed) {
                    let from = t[rng.gen_range(0..t.len())];
                    let to = t[rng.gen_range(0..t.len())];
                    graph.add_wait(from, to);
                    if worker % 2 == 0 {
                        graph.release(t[rng.gen_range(0..t.len())]);
                    }
                }
            }));
        }

        // The checker must neither deadlock nor panic while the graph
        // churns underneath it.
        for _ in 0..2000 {
            for tid in t.iter() {
                graph.has_cycle(*tid);
            }
        }
        stop.store(true, Ordering::Relaxed);
        for handle in handles {
            handle.join().unwrap();
        }

        for tid in t.iter() {
            graph.release(*tid);
        }
        assert_symmetric(&graph);
        for tid in t.iter() {
            assert!(!graph.has_cycle(*tid));
        }
    }
}
