//! The buffer pool: a fixed-capacity, LRU-evicted page cache that
//! enforces the page-lock discipline on every access.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::catalog::Catalog;
use crate::errors::{Error, Result};
use crate::heap_page::HeapPage;
use crate::lock_manager::LockTable;
use crate::{PageId, TransactionId};

/// The access mode a transaction requests on a page. `ReadOnly` maps to a
/// shared lock, `ReadWrite` to an exclusive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

/// A cached page, shared between the pool and its borrowers.
pub type PageRef = Arc<RwLock<HeapPage>>;

#[derive(Default)]
struct PoolState {
    cache: HashMap<PageId, PageRef>,
    /// Access order, least recently used at the front.
    lru: VecDeque<PageId>,
}

impl PoolState {
    fn touch(&mut self, pid: PageId) {
        if let Some(pos) = self.lru.iter().position(|p| *p == pid) {
            self.lru.remove(pos);
        }
        self.lru.push_back(pid);
    }

    /// NO-STEAL LRU eviction: drop the least recently used clean page.
    /// Every page dirty means nothing can go.
    fn evict(&mut self) -> Result<()> {
        let victim = self
            .lru
            .iter()
            .copied()
            .find(|pid| self.cache[pid].read().unwrap().dirty_by().is_none())
            .ok_or(Error::CacheFull)?;
        debug!("evicting clean page {victim:?}");
        self.cache.remove(&victim);
        self.lru.retain(|pid| *pid != victim);
        Ok(())
    }
}

/// Caches up to `capacity` pages and owns the lock table that guards
/// them. Pages enter through [`get_page`] only, so every resident page is
/// covered by the caller's lock.
///
/// The pool mutex protects the cache and LRU bookkeeping; it is never
/// held across a lock acquisition or disk I/O.
///
/// [`get_page`]: BufferPool::get_page
pub struct BufferPool {
    capacity: usize,
    lock_table: LockTable,
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lock_table: LockTable::new(),
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lock_table(&self) -> &LockTable {
        &self.lock_table
    }

    /// Retrieves a page on behalf of `tid`, blocking until the matching
    /// lock is granted. A cached page is returned as-is; otherwise the
    /// page is loaded from its heap file, evicting the least recently
    /// used clean page when the pool is full.
    ///
    /// Fails with [`Error::TransactionAborted`] when blocking would
    /// deadlock and [`Error::CacheFull`] when every cached page is dirty;
    /// both are expected to abort the calling transaction.
    pub fn get_page(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> Result<PageRef> {
        match perm {
            Permission::ReadOnly => self.lock_table.acquire_shared(tid, pid)?,
            Permission::ReadWrite => self.lock_table.acquire_exclusive(tid, pid)?,
        }

        {
            let mut state = self.state.lock().unwrap();
            if let Some(page) = state.cache.get(&pid).cloned() {
                state.touch(pid);
                return Ok(page);
            }
        }

        // Miss: do the disk read without the pool mutex.
        let file = catalog.file(pid.table_id)?;
        let page = file.read_page(pid)?;

        let mut state = self.state.lock().unwrap();
        // Another transaction may have loaded the page while we read.
        if let Some(existing) = state.cache.get(&pid).cloned() {
            state.touch(pid);
            return Ok(existing);
        }
        if state.cache.len() >= self.capacity {
            state.evict()?;
        }
        let page = Arc::new(RwLock::new(page));
        state.cache.insert(pid, page.clone());
        state.lru.push_back(pid);
        Ok(page)
    }

    /// Releases `tid`'s lock on one page without completing the
    /// transaction. This breaks strict two-phase locking and can expose
    /// uncommitted state; it exists for tests that need to unwind a
    /// single acquisition.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_table.try_release(tid, pid);
    }

    /// True when `tid` holds a lock on `pid` in either mode.
    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_table.holds_lock(tid, pid)
    }

    /// Commits or aborts `tid`: on commit every page it dirtied is
    /// flushed and re-snapshotted; on abort each such page is rolled back
    /// to its before-image in memory (nothing is evicted). All of `tid`'s
    /// locks are released either way.
    pub fn transaction_complete(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        commit: bool,
    ) -> Result<()> {
        debug!(
            "{tid:?} completing: {}",
            if commit { "commit" } else { "abort" }
        );
        let result = self.complete_pages(catalog, tid, commit);
        self.lock_table.release_all(tid);
        result
    }

    fn complete_pages(&self, catalog: &Catalog, tid: TransactionId, commit: bool) -> Result<()> {
        if commit {
            return self.flush_pages(catalog, tid);
        }
        for page in self.snapshot_pages() {
            if page.read().unwrap().dirty_by() == Some(tid) {
                page.write().unwrap().restore_before_image()?;
            }
        }
        Ok(())
    }

    fn snapshot_pages(&self) -> Vec<PageRef> {
        let state = self.state.lock().unwrap();
        state.cache.values().cloned().collect()
    }

    /// Writes every page dirtied by `tid` to disk and refreshes its
    /// before-image.
    pub fn flush_pages(&self, catalog: &Catalog, tid: TransactionId) -> Result<()> {
        for page in self.snapshot_pages() {
            if page.read().unwrap().dirty_by() == Some(tid) {
                self.flush_page(catalog, &page)?;
            }
        }
        Ok(())
    }

    fn flush_page(&self, catalog: &Catalog, page: &PageRef) -> Result<()> {
        let mut page = page.write().unwrap();
        if page.dirty_by().is_none() {
            return Ok(());
        }
        let file = catalog.file(page.id().table_id)?;
        file.write_page(&page)?;
        page.mark_dirty(None);
        page.set_before_image();
        Ok(())
    }

    /// Flushes every dirty page to disk. Writing uncommitted data breaks
    /// NO-STEAL, so this is for recovery and tests, not the normal path.
    pub fn flush_all(&self, catalog: &Catalog) -> Result<()> {
        for page in self.snapshot_pages() {
            self.flush_page(catalog, &page)?;
        }
        Ok(())
    }

    /// Drops a page from the cache without flushing it.
    pub fn discard_page(&self, pid: PageId) {
        let mut state = self.state.lock().unwrap();
        state.cache.remove(&pid);
        state.lru.retain(|p| *p != pid);
    }

    #[cfg(test)]
    fn cached_ids_in_lru_order(&self) -> Vec<PageId> {
        let state = self.state.lock().unwrap();
        assert_eq!(state.cache.len(), state.lru.len());
        state.lru.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{TupleDesc, Type};
    use std::fs;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 64;

    /// A catalog with one int-column table whose file holds `pages`
    /// zeroed pages.
    fn setup(pages: u32, dir: &std::path::Path) -> (Catalog, u32) {
        let catalog = Catalog::new(PAGE_SIZE);
        let path = dir.join("t.dat");
        fs::write(&path, vec![0u8; PAGE_SIZE * pages as usize]).unwrap();
        let table_id = catalog
            .add_table(&path, TupleDesc::anonymous(&[Type::Int]), "t", None)
            .unwrap();
        (catalog, table_id)
    }

    #[test]
    fn hits_move_pages_to_the_lru_tail() {
        let dir = tempdir().unwrap();
        let (catalog, table_id) = setup(3, dir.path());
        let pool = BufferPool::new(3);
        let tid = TransactionId::new();

        let pids: Vec<PageId> = (0..3).map(|n| PageId::new(table_id, n)).collect();
        for pid in &pids {
            pool.get_page(&catalog, tid, *pid, Permission::ReadOnly)
                .unwrap();
        }
        assert_eq!(pool.cached_ids_in_lru_order(), pids);

        pool.get_page(&catalog, tid, pids[0], Permission::ReadOnly)
            .unwrap();
        assert_eq!(
            pool.cached_ids_in_lru_order(),
            vec![pids[1], pids[2], pids[0]]
        );
    }

    #[test]
    fn full_pool_evicts_the_least_recently_used_clean_page() {
        let dir = tempdir().unwrap();
        let (catalog, table_id) = setup(4, dir.path());
        let pool = BufferPool::new(3);
        let tid = TransactionId::new();

        let pids: Vec<PageId> = (0..4).map(|n| PageId::new(table_id, n)).collect();
        for pid in &pids[..3] {
            pool.get_page(&catalog, tid, *pid, Permission::ReadOnly)
                .unwrap();
        }
        // Touch page 0 so page 1 becomes the eviction victim.
        pool.get_page(&catalog, tid, pids[0], Permission::ReadOnly)
            .unwrap();
        pool.get_page(&catalog, tid, pids[3], Permission::ReadOnly)
            .unwrap();
        assert_eq!(
            pool.cached_ids_in_lru_order(),
            vec![pids[2], pids[0], pids[3]]
        );
    }

    #[test]
    fn dirty_pages_are_never_evicted() {
        let dir = tempdir().unwrap();
        let (catalog, table_id) = setup(3, dir.path());
        let pool = BufferPool::new(2);
        let tid = TransactionId::new();

        let p0 = PageId::new(table_id, 0);
        let p1 = PageId::new(table_id, 1);
        let p2 = PageId::new(table_id, 2);

        let page0 = pool
            .get_page(&catalog, tid, p0, Permission::ReadWrite)
            .unwrap();
        page0.write().unwrap().mark_dirty(Some(tid));
        pool.get_page(&catalog, tid, p1, Permission::ReadOnly)
            .unwrap();

        // p0 is older but dirty; the clean p1 must go instead.
        pool.get_page(&catalog, tid, p2, Permission::ReadOnly)
            .unwrap();
        assert_eq!(pool.cached_ids_in_lru_order(), vec![p0, p2]);
    }

    #[test]
    fn all_dirty_pages_fail_with_cache_full() {
        let dir = tempdir().unwrap();
        let (catalog, table_id) = setup(3, dir.path());
        let pool = BufferPool::new(2);
        let tid = TransactionId::new();

        for n in 0..2 {
            let pid = PageId::new(table_id, n);
            let page = pool
                .get_page(&catalog, tid, pid, Permission::ReadWrite)
                .unwrap();
            page.write().unwrap().mark_dirty(Some(tid));
        }
        let err = pool
            .get_page(&catalog, tid, PageId::new(table_id, 2), Permission::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, Error::CacheFull));
    }

    #[test]
    fn missing_pages_are_reported() {
        let dir = tempdir().unwrap();
        let (catalog, table_id) = setup(1, dir.path());
        let pool = BufferPool::new(2);
        let tid = TransactionId::new();

        let missing = PageId::new(table_id, 7);
        let err = pool
            .get_page(&catalog, tid, missing, Permission::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, Error::BadPageId(pid) if pid == missing));
    }

    #[test]
    fn discard_drops_a_page_from_both_maps() {
        let dir = tempdir().unwrap();
        let (catalog, table_id) = setup(2, dir.path());
        let pool = BufferPool::new(2);
        let tid = TransactionId::new();

        let p0 = PageId::new(table_id, 0);
        pool.get_page(&catalog, tid, p0, Permission::ReadOnly)
            .unwrap();
        pool.discard_page(p0);
        assert!(pool.cached_ids_in_lru_order().is_empty());
    }
}
