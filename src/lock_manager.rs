//! Page-granularity shared/exclusive locks with upgrade, writer
//! anti-starvation, and deadlock detection against the wait-for graph.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};

use log::trace;

use crate::errors::{Error, Result};
use crate::wait_graph::WaitGraph;
use crate::{PageId, TransactionId};

#[derive(Debug, Default)]
struct LockState {
    /// Transactions currently granted shared access.
    shared: HashSet<TransactionId>,
    /// The transaction holding, or reserved for, exclusive access. While
    /// this is set no new transaction is admitted to `shared`.
    exclusive: Option<TransactionId>,
}

/// A shared/exclusive lock on a single page.
///
/// Writers go through two stages: claim the `exclusive` slot as soon as
/// it frees up (from that moment new readers block, so a steady stream of
/// readers cannot starve the writer), then wait for the shared holders
/// that were already in to drain. A transaction upgrading from shared
/// removes its own shared entry between the two stages.
///
/// Every blocking step records its wait edges in the [`WaitGraph`] and
/// checks for a cycle before sleeping, so a deadlock is detected by the
/// transaction that completes it rather than by a watchdog.
#[derive(Debug, Default)]
struct PageLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl PageLock {
    fn shared_lock(&self, graph: &WaitGraph, tid: TransactionId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        // An exclusive lock doubles as a shared lock, and re-acquiring a
        // shared lock is a no-op.
        if state.exclusive == Some(tid) || state.shared.contains(&tid) {
            return Ok(());
        }
        while let Some(holder) = state.exclusive {
            graph.add_wait(tid, holder);
            if graph.has_cycle(tid) {
                return Err(Error::TransactionAborted);
            }
            state = self.cond.wait(state).unwrap();
        }
        state.shared.insert(tid);
        Ok(())
    }

    fn exclusive_lock(&self, graph: &WaitGraph, tid: TransactionId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        // Stage one: claim the exclusive slot.
        while state.exclusive != Some(tid) {
            while let Some(holder) = state.exclusive {
                graph.add_wait(tid, holder);
                if graph.has_cycle(tid) {
                    return Err(Error::TransactionAborted);
                }
                state = self.cond.wait(state).unwrap();
            }
            state.exclusive = Some(tid);
        }
        // An upgrader drops its own shared entry so stage two does not
        // wait on itself.
        state.shared.remove(&tid);
        // Stage two: drain the shared holders that got in before the
        // claim.
        while !state.shared.is_empty() {
            graph.add_waits(tid, state.shared.iter().copied());
            if graph.has_cycle(tid) {
                return Err(Error::TransactionAborted);
            }
            state = self.cond.wait(state).unwrap();
        }
        Ok(())
    }

    fn release_shared(&self, graph: &WaitGraph, tid: TransactionId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.shared.remove(&tid) {
            return Err(Error::NotHeld);
        }
        graph.release(tid);
        if state.shared.is_empty() {
            self.cond.notify_all();
        }
        Ok(())
    }

    fn release_exclusive(&self, graph: &WaitGraph, tid: TransactionId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.exclusive != Some(tid) {
            return Err(Error::NotHeld);
        }
        state.exclusive = None;
        graph.release(tid);
        self.cond.notify_all();
        Ok(())
    }

    /// Releases whatever `tid` holds on this page, if anything.
    fn try_release(&self, graph: &WaitGraph, tid: TransactionId) {
        let mut state = self.state.lock().unwrap();
        if state.shared.remove(&tid) {
            graph.release(tid);
            if state.shared.is_empty() {
                self.cond.notify_all();
            }
        } else if state.exclusive == Some(tid) {
            state.exclusive = None;
            graph.release(tid);
            self.cond.notify_all();
        }
    }

    fn holds(&self, tid: TransactionId) -> bool {
        let state = self.state.lock().unwrap();
        state.shared.contains(&tid) || state.exclusive == Some(tid)
    }
}

/// Process-wide table of page locks plus the wait-for graph they feed.
///
/// The table mutex guards only the map itself; each lock's protocol runs
/// under that lock's own mutex after the map lookup.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<PageId, Arc<PageLock>>>,
    wait_graph: WaitGraph,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait_graph(&self) -> &WaitGraph {
        &self.wait_graph
    }

    fn lock_for(&self, pid: PageId) -> Arc<PageLock> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(pid).or_default().clone()
    }

    fn existing(&self, pid: PageId) -> Option<Arc<PageLock>> {
        self.locks.lock().unwrap().get(&pid).cloned()
    }

    /// Blocks until `tid` holds a shared lock on `pid`. Fails with
    /// [`Error::TransactionAborted`] when waiting would deadlock.
    pub fn acquire_shared(&self, tid: TransactionId, pid: PageId) -> Result<()> {
        trace!("{tid:?} acquiring shared lock on {pid:?}");
        self.lock_for(pid).shared_lock(&self.wait_graph, tid)
    }

    /// Blocks until `tid` holds the exclusive lock on `pid`, upgrading a
    /// shared lock in place. Fails with [`Error::TransactionAborted`]
    /// when waiting would deadlock.
    pub fn acquire_exclusive(&self, tid: TransactionId, pid: PageId) -> Result<()> {
        trace!("{tid:?} acquiring exclusive lock on {pid:?}");
        self.lock_for(pid).exclusive_lock(&self.wait_graph, tid)
    }

    pub fn release_shared(&self, tid: TransactionId, pid: PageId) -> Result<()> {
        let lock = self.existing(pid).ok_or(Error::NotHeld)?;
        lock.release_shared(&self.wait_graph, tid)
    }

    pub fn release_exclusive(&self, tid: TransactionId, pid: PageId) -> Result<()> {
        let lock = self.existing(pid).ok_or(Error::NotHeld)?;
        lock.release_exclusive(&self.wait_graph, tid)
    }

    /// True when `tid` holds `pid` in either mode.
    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.existing(pid).is_some_and(|lock| lock.holds(tid))
    }

    /// Releases whatever `tid` holds on `pid`; no-op when nothing is held.
    pub fn try_release(&self, tid: TransactionId, pid: PageId) {
        if let Some(lock) = self.existing(pid) {
            lock.try_release(&self.wait_graph, tid);
        }
    }

    /// Releases every lock held by `tid` and drops its wait edges. The
    /// table mutex stays held across the sweep so no lock is added or
    /// removed mid-release.
    pub fn release_all(&self, tid: TransactionId) {
        trace!("{tid:?} releasing all locks");
        let locks = self.locks.lock().unwrap();
        for lock in locks.values() {
            lock.try_release(&self.wait_graph, tid);
        }
        drop(locks);
        // A transaction aborted while waiting holds no lock, so the sweep
        // above never reached its node.
        self.wait_graph.release(tid);
    }
}
