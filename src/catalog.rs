//! The table catalog: schemas, names, and the heap file backing every
//! known table.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use log::debug;

use crate::errors::{Error, Result};
use crate::heap_file::HeapFile;
use crate::tuple::{TdItem, TupleDesc, Type};

/// One registered table.
#[derive(Clone)]
pub struct TableInfo {
    pub file: Arc<HeapFile>,
    pub name: String,
    pub primary_key: Option<String>,
}

#[derive(Default)]
struct Tables {
    by_id: HashMap<u32, TableInfo>,
    by_name: HashMap<String, u32>,
}

/// Registry of every table the engine knows about. Table ids are vended
/// in registration order, so reloading the same catalog file yields the
/// same ids.
pub struct Catalog {
    page_size: usize,
    next_table_id: AtomicU32,
    tables: RwLock<Tables>,
}

impl Catalog {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            next_table_id: AtomicU32::new(0),
            tables: RwLock::new(Tables::default()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Registers a table stored at `path`, vending a fresh table id. On a
    /// name conflict the new table takes over the name.
    pub fn add_table(
        &self,
        path: impl AsRef<Path>,
        desc: TupleDesc,
        name: &str,
        primary_key: Option<&str>,
    ) -> Result<u32> {
        let table_id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        let file = Arc::new(HeapFile::open(
            path,
            Arc::new(desc),
            table_id,
            self.page_size,
        )?);
        let info = TableInfo {
            file,
            name: name.to_string(),
            primary_key: primary_key.map(str::to_string),
        };
        let mut tables = self.tables.write().unwrap();
        tables.by_id.insert(table_id, info);
        tables.by_name.insert(name.to_string(), table_id);
        Ok(table_id)
    }

    pub fn table_id(&self, name: &str) -> Result<u32> {
        self.tables
            .read()
            .unwrap()
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    fn info(&self, table_id: u32) -> Result<TableInfo> {
        self.tables
            .read()
            .unwrap()
            .by_id
            .get(&table_id)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(table_id.to_string()))
    }

    /// The heap file storing the contents of `table_id`.
    pub fn file(&self, table_id: u32) -> Result<Arc<HeapFile>> {
        Ok(self.info(table_id)?.file)
    }

    pub fn tuple_desc(&self, table_id: u32) -> Result<Arc<TupleDesc>> {
        Ok(self.info(table_id)?.file.desc().clone())
    }

    pub fn table_name(&self, table_id: u32) -> Result<String> {
        Ok(self.info(table_id)?.name)
    }

    pub fn primary_key(&self, table_id: u32) -> Result<Option<String>> {
        Ok(self.info(table_id)?.primary_key)
    }

    pub fn table_ids(&self) -> Vec<u32> {
        self.tables.read().unwrap().by_id.keys().copied().collect()
    }

    /// Drops every registered table.
    pub fn clear(&self) {
        let mut tables = self.tables.write().unwrap();
        tables.by_id.clear();
        tables.by_name.clear();
    }

    /// Loads a text catalog: one line per table of the form
    /// `name(col type [pk], col type, ...)` with types `int` and
    /// `string`, each table's data living in `<name>.dat` next to the
    /// catalog file.
    pub fn load_schema(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let text = fs::read_to_string(path)?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, columns, primary_key) = parse_schema_line(line)?;
            let data_path = base.join(format!("{name}.dat"));
            let table_id =
                self.add_table(&data_path, TupleDesc::new(columns), &name, primary_key.as_deref())?;
            debug!("catalog: added table {name} with id {table_id}");
        }
        Ok(())
    }
}

fn parse_schema_line(line: &str) -> Result<(String, Vec<TdItem>, Option<String>)> {
    let malformed = || Error::Schema(format!("malformed catalog line: {line}"));
    let open = line.find('(').ok_or_else(malformed)?;
    let close = line.rfind(')').ok_or_else(malformed)?;
    if close < open {
        return Err(malformed());
    }
    let name = line[..open].trim();
    if name.is_empty() {
        return Err(malformed());
    }

    let mut columns = Vec::new();
    let mut primary_key = None;
    for column in line[open + 1..close].split(',') {
        let mut parts = column.split_whitespace();
        let col_name = parts.next().ok_or_else(malformed)?;
        let col_type = parts.next().ok_or_else(malformed)?;
        let field_type = match col_type.to_ascii_lowercase().as_str() {
            "int" => Type::Int,
            "string" => Type::String,
            other => {
                return Err(Error::Schema(format!("unknown column type: {other}")));
            }
        };
        match parts.next() {
            Some("pk") => primary_key = Some(col_name.to_string()),
            Some(other) => {
                return Err(Error::Schema(format!("unknown column annotation: {other}")));
            }
            None => {}
        }
        columns.push(TdItem::new(field_type, col_name));
    }
    if columns.is_empty() {
        return Err(malformed());
    }
    Ok((name.to_string(), columns, primary_key))
}
