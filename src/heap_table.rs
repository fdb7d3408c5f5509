use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    sync::{Mutex, MutexGuard},
};

use log::debug;

use crate::{
    buffer_pool::{BufferPool, DirtyPages},
    catalog::hash_table_id,
    concurrent_status::Permission,
    database::Database,
    error::DbError,
    page::{empty_page_data, HeapPageIterator, PageCategory, PageId, PagePod},
    storage::{schema::Schema, tuple::Tuple},
    transaction::Transaction,
    types::DbResult,
    utils::{ceil_div, HandyRwLock},
};

/// An unordered table stored as the concatenation of slotted heap pages,
/// numbered from 0.
pub struct HeapTable {
    file_path: String,

    schema: Schema,

    file: Mutex<File>,

    table_id: u32,
}

impl HeapTable {
    pub fn new(file_path: &str, schema: &Schema) -> Result<Self, DbError> {
        File::create(file_path)?;
        let file = Mutex::new(
            OpenOptions::new().write(true).read(true).open(file_path)?,
        );

        let table_id = hash_table_id(file_path);
        debug!("heap table created, path: {}, id: {}", file_path, table_id);

        Ok(Self {
            file_path: file_path.to_string(),
            schema: schema.clone(),
            file,
            table_id,
        })
    }

    pub fn get_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_schema(&self) -> Schema {
        self.schema.clone()
    }

    pub fn get_file_path(&self) -> &str {
        &self.file_path
    }

    fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    /// The number of pages in the file.
    pub fn num_pages(&self) -> usize {
        let len = self.get_file().metadata().map(|m| m.len()).unwrap_or(0) as usize;
        ceil_div(len, BufferPool::get_page_size())
    }

    /// Read one page worth of bytes at the page's offset. A tail shorter
    /// than a full page reads as zero-filled.
    pub fn read_page_data(&self, pid: &PageId) -> Result<Vec<u8>, DbError> {
        let page_size = BufferPool::get_page_size();
        let offset = pid.page_index as usize * page_size;

        let mut buf = vec![0; page_size];
        let mut file = self.get_file();
        let len = file.metadata()?.len() as usize;
        if offset < len {
            file.seek(SeekFrom::Start(offset as u64))?;
            let mut filled = 0;
            while filled < page_size {
                let n = file.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
        }
        Ok(buf)
    }

    /// Overwrite the page's byte range, extending the file if necessary.
    pub fn write_page_data(&self, pid: &PageId, data: &[u8]) -> DbResult {
        let page_size = BufferPool::get_page_size();
        let offset = pid.page_index as usize * page_size;

        let mut file = self.get_file();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Insert the tuple into the first page with an empty slot, creating a
    /// new page at the end of the file when every page is full. The new
    /// page is written through immediately so the page count advances.
    pub fn insert_tuple(
        &self,
        tx: &Transaction,
        tuple: &mut Tuple,
    ) -> Result<DirtyPages, DbError> {
        let mut dirty = HashMap::new();

        for i in 0..self.num_pages() {
            let pid = PageId::new(PageCategory::Heap, self.table_id, i as u32);
            let page_rc =
                Database::buffer_pool().get_heap_page(tx, Permission::ReadWrite, &pid)?;
            if page_rc.rl().empty_slots_count() > 0 {
                page_rc.wl().insert_tuple(tuple)?;
                dirty.insert(pid, PagePod::Heap(page_rc));
                return Ok(dirty);
            }
        }

        // every page is full, extend the file with a fresh page
        let pid = PageId::new(PageCategory::Heap, self.table_id, self.num_pages() as u32);
        self.write_page_data(&pid, &empty_page_data())?;
        debug!("heap file extended, new page: {}", pid);

        let page_rc = Database::buffer_pool().get_heap_page(tx, Permission::ReadWrite, &pid)?;
        page_rc.wl().insert_tuple(tuple)?;
        dirty.insert(pid, PagePod::Heap(page_rc));
        Ok(dirty)
    }

    /// Delete the tuple from the page its record id references.
    pub fn delete_tuple(
        &self,
        tx: &Transaction,
        tuple: &mut Tuple,
    ) -> Result<DirtyPages, DbError> {
        let record_id = tuple.get_record_id().ok_or_else(|| {
            DbError::SlotEmpty("tuple has no record id".to_string())
        })?;

        let pid = record_id.pid;
        let page_rc = Database::buffer_pool().get_heap_page(tx, Permission::ReadWrite, &pid)?;
        page_rc.wl().delete_tuple(tuple)?;

        let mut dirty = HashMap::new();
        dirty.insert(pid, PagePod::Heap(page_rc));
        Ok(dirty)
    }

    /// The number of tuples in the table, requires a shared lock on every
    /// page.
    pub fn tuples_count(&self, tx: &Transaction) -> usize {
        HeapTableIterator::new(tx, self).count()
    }
}

/// A cursor over the pages of a heap table. Advances to the next page only
/// when the current page's tuple iterator is exhausted; all page
/// acquisitions are read-only.
pub struct HeapTableIterator<'t> {
    tx: &'t Transaction,
    table_id: u32,
    num_pages: usize,

    page_cursor: usize,
    page_it: Option<HeapPageIterator>,
}

impl<'t> HeapTableIterator<'t> {
    pub fn new(tx: &'t Transaction, table: &HeapTable) -> Self {
        Self {
            tx,
            table_id: table.get_id(),
            num_pages: table.num_pages(),
            page_cursor: 0,
            page_it: None,
        }
    }

    /// Restart the cursor at page 0.
    pub fn rewind(&mut self) {
        self.page_cursor = 0;
        self.page_it = None;
    }
}

impl Iterator for HeapTableIterator<'_> {
    type Item = Tuple;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(it) = self.page_it.as_mut() {
                if let Some(tuple) = it.next() {
                    return Some(tuple);
                }
            }

            if self.page_cursor >= self.num_pages {
                return None;
            }

            let pid = PageId::new(PageCategory::Heap, self.table_id, self.page_cursor as u32);
            let page_rc = Database::buffer_pool()
                .get_heap_page(self.tx, Permission::ReadOnly, &pid)
                .unwrap();
            self.page_it = Some(HeapPageIterator::new(page_rc));
            self.page_cursor += 1;
        }
    }
}
