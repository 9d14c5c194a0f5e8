use std::io;

use crate::PageId;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("releasing a lock that is not held")]
    NotHeld,
    #[error("transaction aborted to break a deadlock")]
    TransactionAborted,
    #[error("all buffered pages are dirty, cannot evict")]
    CacheFull,
    #[error("no such page: table {} page {}", .0.table_id, .0.page_number)]
    BadPageId(PageId),
    #[error("no such table: {0}")]
    TableNotFound(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("page has no free slot")]
    PageFull,
    #[error("tuple is not stored on this page")]
    TupleNotOnPage,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
