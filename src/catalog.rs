use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    path::Path,
    sync::RwLock,
};

use log::debug;

use crate::{
    btree::table::BTreeTable,
    error::DbError,
    heap_table::HeapTable,
    page::PageId,
    storage::schema::Schema,
    types::{DbResult, Pod},
    utils::HandyRwLock,
};

/// A registered table file, heap storage or B+Tree index.
#[derive(Clone)]
pub enum Table {
    Heap(Pod<HeapTable>),
    BTree(Pod<BTreeTable>),
}

impl Table {
    pub fn get_id(&self) -> u32 {
        match self {
            Table::Heap(t) => t.rl().get_id(),
            Table::BTree(t) => t.rl().get_id(),
        }
    }

    pub fn get_schema(&self) -> Schema {
        match self {
            Table::Heap(t) => t.rl().get_schema(),
            Table::BTree(t) => t.rl().get_schema(),
        }
    }

    pub fn read_page_data(&self, pid: &PageId) -> Result<Vec<u8>, DbError> {
        match self {
            Table::Heap(t) => t.rl().read_page_data(pid),
            Table::BTree(t) => t.rl().read_page_data(pid),
        }
    }

    pub fn write_page_data(&self, pid: &PageId, data: &[u8]) -> DbResult {
        match self {
            Table::Heap(t) => t.rl().write_page_data(pid, data),
            Table::BTree(t) => t.rl().write_page_data(pid, data),
        }
    }
}

pub struct TableItem {
    pub table: Table,
    pub primary_key: String,
    pub name: String,
}

#[derive(Default)]
struct CatalogInner {
    tables: HashMap<u32, TableItem>,
    name_to_id: HashMap<String, u32>,
}

/// The registry of tables, by id and by name. Safe for concurrent readers
/// with rare writers.
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogInner::default()),
        }
    }

    /// Register a table. A table with the same id is overwritten; a table
    /// with the same name but a different file replaces the name mapping.
    pub fn add_table(&self, table: Table, name: &str, primary_key: &str) {
        let id = table.get_id();
        let mut inner = self.inner.wl();

        if let Some(old_id) = inner.name_to_id.get(name).copied() {
            if old_id != id {
                inner.tables.remove(&old_id);
            }
        }

        debug!("table registered, id: {}, name: {}", id, name);
        inner.name_to_id.insert(name.to_string(), id);
        inner.tables.insert(
            id,
            TableItem {
                table,
                primary_key: primary_key.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn get_table(&self, table_id: &u32) -> Result<Table, DbError> {
        self.inner
            .rl()
            .tables
            .get(table_id)
            .map(|item| item.table.clone())
            .ok_or_else(|| DbError::NoSuchTable(format!("table id {}", table_id)))
    }

    pub fn get_table_by_name(&self, name: &str) -> Result<Table, DbError> {
        let inner = self.inner.rl();
        let id = inner
            .name_to_id
            .get(name)
            .ok_or_else(|| DbError::NoSuchTable(name.to_string()))?;
        inner
            .tables
            .get(id)
            .map(|item| item.table.clone())
            .ok_or_else(|| DbError::NoSuchTable(name.to_string()))
    }

    pub fn get_primary_key(&self, table_id: &u32) -> Result<String, DbError> {
        self.inner
            .rl()
            .tables
            .get(table_id)
            .map(|item| item.primary_key.clone())
            .ok_or_else(|| DbError::NoSuchTable(format!("table id {}", table_id)))
    }

    pub fn get_table_ids(&self) -> Vec<u32> {
        self.inner.rl().tables.keys().copied().collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.wl();
        inner.tables.clear();
        inner.name_to_id.clear();
    }
}

/// Table ids are the hash of the backing file's absolute path, so a file
/// keeps its id across registrations.
pub fn hash_table_id(file_path: &str) -> u32 {
    let absolute = std::fs::canonicalize(file_path)
        .unwrap_or_else(|_| Path::new(file_path).to_path_buf());
    let mut hasher = DefaultHasher::new();
    absolute.hash(&mut hasher);
    hasher.finish() as u32
}
