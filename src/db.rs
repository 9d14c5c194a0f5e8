//! The engine value: the catalog, the buffer pool, and the operations
//! that tie them together. Everything threads through an explicit
//! [`Database`]; there is no hidden global state.

use std::path::Path;

use crate::buffer_pool::{BufferPool, PageRef, Permission};
use crate::catalog::Catalog;
use crate::errors::{Error, Result};
use crate::tuple::Tuple;
use crate::{PageId, TransactionId, DEFAULT_PAGE_SIZE, DEFAULT_POOL_CAPACITY};

/// Engine-wide tunables.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Size of every page, in bytes.
    pub page_size: usize,
    /// Number of pages the buffer pool may hold.
    pub pool_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

/// The storage engine.
pub struct Database {
    catalog: Catalog,
    buffer_pool: BufferPool,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            catalog: Catalog::new(config.page_size),
            buffer_pool: BufferPool::new(config.pool_capacity),
        }
    }

    /// Builds an engine and loads the text catalog at `path`.
    pub fn open(catalog_path: impl AsRef<Path>, config: DatabaseConfig) -> Result<Self> {
        let db = Self::new(config);
        db.catalog.load_schema(catalog_path)?;
        Ok(db)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    /// Fetches a page through the buffer pool with the matching lock; see
    /// [`BufferPool::get_page`].
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> Result<PageRef> {
        self.buffer_pool.get_page(&self.catalog, tid, pid, perm)
    }

    /// Inserts `tuple` into the named table on behalf of `tid`, marking
    /// every modified page dirty so it survives eviction until the
    /// transaction resolves.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: u32, tuple: Tuple) -> Result<()> {
        let file = self.catalog.file(table_id)?;
        let dirtied = file.insert_tuple(self, tid, tuple)?;
        for page in dirtied {
            page.write().unwrap().mark_dirty(Some(tid));
        }
        Ok(())
    }

    /// Deletes `tuple` from the table its record id points into.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(Error::TupleNotOnPage)?;
        let file = self.catalog.file(rid.page_id.table_id)?;
        let dirtied = file.delete_tuple(self, tid, tuple)?;
        for page in dirtied {
            page.write().unwrap().mark_dirty(Some(tid));
        }
        Ok(())
    }

    /// Commits or aborts `tid`; see [`BufferPool::transaction_complete`].
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        self.buffer_pool
            .transaction_complete(&self.catalog, tid, commit)
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.buffer_pool.holds_lock(tid, pid)
    }

    /// Test-only escape hatch; see [`BufferPool::release_page`].
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.buffer_pool.release_page(tid, pid);
    }

    /// Flushes every dirty page; see [`BufferPool::flush_all`].
    pub fn flush_all(&self) -> Result<()> {
        self.buffer_pool.flush_all(&self.catalog)
    }
}
