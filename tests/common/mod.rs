#![allow(dead_code)] // not every test binary uses every helper

use std::fs;
use std::io::Write;
use std::path::Path;

use stratum::tuple::{Field, Tuple};
use stratum::{Database, DatabaseConfig, TransactionId};
use tempfile::TempDir;

/// 64-byte pages keep the tables small: 15 one-int tuples per page.
pub const PAGE_SIZE: usize = 64;

/// Writes a one-table catalog (`t(v int)`) into a fresh directory and
/// opens an engine over it.
pub fn setup(pool_capacity: usize) -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    write_catalog(dir.path());
    let db = open(dir.path(), pool_capacity);
    (dir, db)
}

pub fn write_catalog(dir: &Path) {
    let mut catalog = fs::File::create(dir.join("catalog.txt")).unwrap();
    writeln!(catalog, "t(v int)").unwrap();
}

/// Reopens the engine over an existing directory, as after a restart.
pub fn open(dir: &Path, pool_capacity: usize) -> Database {
    Database::open(
        dir.join("catalog.txt"),
        DatabaseConfig {
            page_size: PAGE_SIZE,
            pool_capacity,
        },
    )
    .unwrap()
}

pub fn int_tuple(db: &Database, table_id: u32, v: i32) -> Tuple {
    let desc = db.catalog().tuple_desc(table_id).unwrap();
    Tuple::new(desc, vec![Field::Int(v)]).unwrap()
}

/// Scans the table with a fresh transaction and returns the int values.
pub fn scan_values(db: &Database, table_id: u32) -> Vec<i32> {
    let tid = TransactionId::new();
    let file = db.catalog().file(table_id).unwrap();
    let values = file
        .iter(db, tid)
        .map(|t| match t.unwrap().field(0).unwrap() {
            Field::Int(v) => *v,
            other => panic!("unexpected field {other:?}"),
        })
        .collect();
    db.transaction_complete(tid, true).unwrap();
    values
}
