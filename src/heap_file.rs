//! Heap files: tuples stored page by page in no particular order, one
//! file per table.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::buffer_pool::{PageRef, Permission};
use crate::db::Database;
use crate::errors::{Error, Result};
use crate::heap_page::HeapPage;
use crate::tuple::{Tuple, TupleDesc};
use crate::{PageId, TransactionId};

/// On-disk storage for one table: a concatenation of fixed-size pages,
/// page `n` at byte offset `n * page_size`.
///
/// Reading and writing raw pages goes straight to the file; tuple-level
/// operations and the scan iterator go through the buffer pool so the
/// caller's transaction holds the right page locks.
pub struct HeapFile {
    file: Mutex<File>,
    path: PathBuf,
    desc: Arc<TupleDesc>,
    table_id: u32,
    page_size: usize,
}

impl HeapFile {
    pub fn open(
        path: impl AsRef<Path>,
        desc: Arc<TupleDesc>,
        table_id: u32,
        page_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        debug!("opened heap file {path:?} for table {table_id}");
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            desc,
            table_id,
            page_size,
        })
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The number of whole pages currently in the file.
    pub fn num_pages(&self) -> Result<u32> {
        let file = self.file.lock().unwrap();
        let len = file.metadata()?.len();
        Ok((len / self.page_size as u64) as u32)
    }

    /// Reads one page from disk. Requesting a page past the end of the
    /// file, or a page of another table, fails with [`Error::BadPageId`].
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        if pid.table_id != self.table_id || pid.page_number >= self.num_pages()? {
            return Err(Error::BadPageId(pid));
        }
        let mut buf = vec![0u8; self.page_size];
        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(
                pid.page_number as u64 * self.page_size as u64,
            ))?;
            file.read_exact(&mut buf)?;
        }
        HeapPage::parse(pid, self.desc.clone(), self.page_size, &buf)
    }

    /// Writes one page back to its slot in the file and syncs.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let pid = page.id();
        if pid.table_id != self.table_id {
            return Err(Error::BadPageId(pid));
        }
        let data = page.serialize();
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(
            pid.page_number as u64 * self.page_size as u64,
        ))?;
        file.write_all(&data)?;
        file.sync_all()?;
        Ok(())
    }

    /// Appends one zeroed page and returns its id.
    fn extend(&self) -> Result<PageId> {
        let page_number = self.num_pages()?;
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(
            page_number as u64 * self.page_size as u64,
        ))?;
        file.write_all(&vec![0u8; self.page_size])?;
        file.sync_all()?;
        debug!(
            "extended table {} to {} pages",
            self.table_id,
            page_number + 1
        );
        Ok(PageId::new(self.table_id, page_number))
    }

    /// Places `tuple` on the first page with a free slot, growing the
    /// file by one page when every existing page is full. Pages are
    /// visited under exclusive locks held by `tid`. Returns the pages the
    /// operation modified.
    pub fn insert_tuple(
        &self,
        db: &Database,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<Vec<PageRef>> {
        for page_number in 0..self.num_pages()? {
            let pid = PageId::new(self.table_id, page_number);
            let page = db.get_page(tid, pid, Permission::ReadWrite)?;
            let has_room = page.read().unwrap().empty_slots() > 0;
            if has_room {
                page.write().unwrap().insert_tuple(tuple)?;
                return Ok(vec![page]);
            }
        }
        let pid = self.extend()?;
        let page = db.get_page(tid, pid, Permission::ReadWrite)?;
        page.write().unwrap().insert_tuple(tuple)?;
        Ok(vec![page])
    }

    /// Removes `tuple` from the page its record id names. Returns the
    /// pages the operation modified.
    pub fn delete_tuple(
        &self,
        db: &Database,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageRef>> {
        let rid = tuple.record_id().ok_or(Error::TupleNotOnPage)?;
        let page = db.get_page(tid, rid.page_id, Permission::ReadWrite)?;
        page.write().unwrap().delete_tuple(rid)?;
        Ok(vec![page])
    }

    /// A lazy scan of every tuple in the file, advancing page by page
    /// through the buffer pool under shared locks held by `tid`.
    pub fn iter<'a>(&'a self, db: &'a Database, tid: TransactionId) -> HeapFileIter<'a> {
        HeapFileIter {
            file: self,
            db,
            tid,
            next_page: 0,
            buffered: Vec::new().into_iter(),
        }
    }
}

/// Iterator over all tuples of a heap file; see [`HeapFile::iter`].
pub struct HeapFileIter<'a> {
    file: &'a HeapFile,
    db: &'a Database,
    tid: TransactionId,
    next_page: u32,
    buffered: std::vec::IntoIter<Tuple>,
}

impl HeapFileIter<'_> {
    /// Restarts the scan from the first page.
    pub fn rewind(&mut self) {
        self.next_page = 0;
        self.buffered = Vec::new().into_iter();
    }
}

impl Iterator for HeapFileIter<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.buffered.next() {
                return Some(Ok(tuple));
            }
            let num_pages = match self.file.num_pages() {
                Ok(n) => n,
                Err(e) => return Some(Err(e)),
            };
            if self.next_page >= num_pages {
                return None;
            }
            let pid = PageId::new(self.file.table_id, self.next_page);
            self.next_page += 1;
            let page = match self.db.get_page(self.tid, pid, Permission::ReadOnly) {
                Ok(page) => page,
                Err(e) => return Some(Err(e)),
            };
            let tuples: Vec<Tuple> = page.read().unwrap().iter().cloned().collect();
            self.buffered = tuples.into_iter();
        }
    }
}
