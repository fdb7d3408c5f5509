use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, RwLock,
    },
};

use log::debug;

use crate::{
    catalog::Table,
    concurrent_status::Permission,
    database::Database,
    error::DbError,
    page::{
        BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage, BTreePage,
        BTreeRootPointerPage, HeapPage, PageCategory, PageId, PagePod,
    },
    storage::tuple::Tuple,
    transaction::{Transaction, TransactionID},
    types::{DbResult, ResultPod},
    utils::HandyRwLock,
};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_CAPACITY: usize = 50;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);
static CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_CAPACITY);

/// The set of pages dirtied by one mutating call, threaded through the
/// access methods and handed back to the buffer pool, which marks and
/// caches them.
pub type DirtyPages = HashMap<PageId, PagePod>;

struct BufferInner {
    buffer: HashMap<PageId, PagePod>,

    // page ids in insertion order, scanned by the eviction policy
    order: Vec<PageId>,

    // owner of each dirty page; the eviction and flush paths consult this
    // map instead of the page locks
    dirty: HashMap<PageId, Transaction>,

    // the before-image of every page a transaction has touched, in
    // enrollment order; written back on abort
    undo_log: HashMap<TransactionID, Vec<(PageId, Vec<u8>)>>,
}

/// The bounded page cache.
///
/// Access methods never read the disk themselves: they ask for a page with
/// a permission, the pool acquires the matching lock (blocking), loads and
/// caches the page if necessary, and snapshots its before-image for undo.
///
/// Eviction is NO-STEAL: only clean pages leave the pool, so no page of an
/// uncommitted transaction ever reaches disk. When every cached page is
/// dirty the pool refuses with `BufferFull`.
pub struct BufferPool {
    inner: Mutex<BufferInner>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                buffer: HashMap::new(),
                order: Vec::new(),
                dirty: HashMap::new(),
                undo_log: HashMap::new(),
            }),
        }
    }

    pub fn get_page_size() -> usize {
        PAGE_SIZE.load(Ordering::Relaxed)
    }

    pub fn set_page_size(page_size: usize) {
        PAGE_SIZE.store(page_size, Ordering::Relaxed);
    }

    pub fn reset_page_size() {
        PAGE_SIZE.store(DEFAULT_PAGE_SIZE, Ordering::Relaxed);
    }

    pub fn get_capacity() -> usize {
        CAPACITY.load(Ordering::Relaxed)
    }

    pub fn set_capacity(capacity: usize) {
        CAPACITY.store(capacity, Ordering::Relaxed);
    }

    pub fn reset_capacity() {
        CAPACITY.store(DEFAULT_CAPACITY, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.buffer.clear();
        inner.order.clear();
        inner.dirty.clear();
        inner.undo_log.clear();
    }

    /// The number of cached pages, used by tests.
    pub fn pages_count(&self) -> usize {
        self.inner.lock().unwrap().buffer.len()
    }

    pub fn get_heap_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &PageId,
    ) -> ResultPod<HeapPage> {
        match self.get_page(tx, perm, pid)? {
            PagePod::Heap(p) => Ok(p),
            _ => Err(DbError::Internal(format!("page {} is not a heap page", pid))),
        }
    }

    pub fn get_leaf_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &PageId,
    ) -> ResultPod<BTreeLeafPage> {
        match self.get_page(tx, perm, pid)? {
            PagePod::Leaf(p) => Ok(p),
            _ => Err(DbError::Internal(format!("page {} is not a leaf page", pid))),
        }
    }

    pub fn get_internal_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &PageId,
    ) -> ResultPod<BTreeInternalPage> {
        match self.get_page(tx, perm, pid)? {
            PagePod::Internal(p) => Ok(p),
            _ => Err(DbError::Internal(format!(
                "page {} is not an internal page",
                pid
            ))),
        }
    }

    pub fn get_root_ptr_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &PageId,
    ) -> ResultPod<BTreeRootPointerPage> {
        match self.get_page(tx, perm, pid)? {
            PagePod::RootPointer(p) => Ok(p),
            _ => Err(DbError::Internal(format!(
                "page {} is not a root pointer page",
                pid
            ))),
        }
    }

    pub fn get_header_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &PageId,
    ) -> ResultPod<BTreeHeaderPage> {
        match self.get_page(tx, perm, pid)? {
            PagePod::Header(p) => Ok(p),
            _ => Err(DbError::Internal(format!(
                "page {} is not a header page",
                pid
            ))),
        }
    }

    /// Retrieve the page with the given permission. Acquires the matching
    /// lock first and may block until a conflicting holder releases.
    ///
    /// A cached page is returned as is. Otherwise the page is read through
    /// its file, its before-image is captured, and it is cached, evicting
    /// the oldest clean page when the pool is full.
    pub fn get_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &PageId,
    ) -> Result<PagePod, DbError> {
        Database::concurrent_status().request_latch(tx, &perm.to_lock(), pid)?;

        // fast path: the page is cached
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(pod) = inner.buffer.get(pid).cloned() {
                Self::enroll_undo(&mut inner, tx, pid, &pod);
                return Ok(pod);
            }
        }

        // load outside the pool monitor, the read is synchronous but the
        // page locks already serialize conflicting loaders
        let pod = Self::load_page(pid)?;

        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.buffer.get(pid).cloned() {
            // another reader brought the page in meanwhile
            Self::enroll_undo(&mut inner, tx, pid, &existing);
            return Ok(existing);
        }

        Self::evict_if_full(&mut inner)?;
        inner.buffer.insert(*pid, pod.clone());
        inner.order.push(*pid);
        Self::enroll_undo(&mut inner, tx, pid, &pod);
        Ok(pod)
    }

    fn load_page(pid: &PageId) -> Result<PagePod, DbError> {
        let table = Database::catalog().get_table(&pid.get_table_id())?;
        let data = table.read_page_data(pid)?;
        debug!("page loaded from disk, pid: {}", pid);

        let pod = Self::instantiate(&table, pid, &data)?;
        pod.set_before_image();
        Ok(pod)
    }

    /// Build the in-memory page of the right kind from one page worth of
    /// bytes.
    fn instantiate(table: &Table, pid: &PageId, data: &[u8]) -> Result<PagePod, DbError> {
        match pid.category {
            PageCategory::Heap => {
                let schema = table.get_schema();
                let page = HeapPage::new(pid, data, &schema);
                Ok(PagePod::Heap(Arc::new(RwLock::new(page))))
            }
            _ => {
                let (schema, key_field) = match table {
                    Table::BTree(t) => {
                        let t = t.rl();
                        (t.get_schema(), t.key_field)
                    }
                    _ => {
                        return Err(DbError::Internal(format!(
                            "page {} does not belong to a B+Tree file",
                            pid
                        )))
                    }
                };
                match pid.category {
                    PageCategory::Leaf => Ok(PagePod::Leaf(Arc::new(RwLock::new(
                        BTreeLeafPage::new(pid, data, &schema, key_field),
                    )))),
                    PageCategory::Internal => Ok(PagePod::Internal(Arc::new(RwLock::new(
                        BTreeInternalPage::new(pid, data, &schema, key_field),
                    )))),
                    PageCategory::RootPointer => Ok(PagePod::RootPointer(Arc::new(
                        RwLock::new(BTreeRootPointerPage::new(pid, data, &schema, key_field)),
                    ))),
                    PageCategory::Header => Ok(PagePod::Header(Arc::new(RwLock::new(
                        BTreeHeaderPage::new(pid, data, &schema, key_field),
                    )))),
                    PageCategory::Heap => unreachable!(),
                }
            }
        }
    }

    // Capture the page's before-image for the transaction, once per page.
    //
    // Reading the pod here is safe: a page only reaches this point when the
    // requester holds its latch, so no other thread can have it
    // write-locked.
    fn enroll_undo(inner: &mut BufferInner, tx: &Transaction, pid: &PageId, pod: &PagePod) {
        let list = inner.undo_log.entry(tx.get_id()).or_insert_with(Vec::new);
        if !list.iter().any(|(p, _)| p == pid) {
            list.push((*pid, pod.get_before_image()));
        }
    }

    /// Evict the oldest clean page until there is room for one more page.
    /// Dirty pages of uncommitted transactions never leave the pool.
    fn evict_if_full(inner: &mut BufferInner) -> DbResult {
        while inner.buffer.len() >= Self::get_capacity() {
            let victim = inner
                .order
                .iter()
                .position(|pid| !inner.dirty.contains_key(pid));
            match victim {
                Some(i) => {
                    let pid = inner.order.remove(i);
                    inner.buffer.remove(&pid);
                    debug!("page evicted, pid: {}", pid);
                }
                None => return Err(DbError::BufferFull),
            }
        }
        Ok(())
    }

    /// Add a tuple to the specified table on behalf of the transaction.
    /// Every page dirtied by the operation is marked with the transaction
    /// and kept cached.
    pub fn insert_tuple(
        &self,
        tx: &Transaction,
        table_id: u32,
        tuple: &mut Tuple,
    ) -> DbResult {
        let table = Database::catalog().get_table(&table_id)?;
        let dirty = match &table {
            Table::Heap(t) => t.rl().insert_tuple(tx, tuple)?,
            Table::BTree(t) => t.rl().insert_tuple(tx, tuple)?,
        };
        self.mark_dirty(tx, dirty)
    }

    /// Remove a tuple from its table on behalf of the transaction.
    pub fn delete_tuple(
        &self,
        tx: &Transaction,
        table_id: u32,
        tuple: &mut Tuple,
    ) -> DbResult {
        let table = Database::catalog().get_table(&table_id)?;
        let dirty = match &table {
            Table::Heap(t) => t.rl().delete_tuple(tx, tuple)?,
            Table::BTree(t) => t.rl().delete_tuple(tx, tuple)?,
        };
        self.mark_dirty(tx, dirty)
    }

    /// Add an index entry to the specified B+Tree file on behalf of the
    /// transaction.
    pub fn insert_entry(
        &self,
        tx: &Transaction,
        table_id: u32,
        entry: &crate::page::IndexEntry,
    ) -> DbResult {
        let table = Database::catalog().get_table(&table_id)?;
        let dirty = match &table {
            Table::BTree(t) => t.rl().insert_entry(tx, entry)?,
            _ => {
                return Err(DbError::Internal(format!(
                    "table {} is not a B+Tree file",
                    table_id
                )))
            }
        };
        self.mark_dirty(tx, dirty)
    }

    /// Remove an index entry from the specified B+Tree file on behalf of
    /// the transaction.
    pub fn delete_entry(
        &self,
        tx: &Transaction,
        table_id: u32,
        entry: &crate::page::IndexEntry,
    ) -> DbResult {
        let table = Database::catalog().get_table(&table_id)?;
        let dirty = match &table {
            Table::BTree(t) => t.rl().delete_entry(tx, entry)?,
            _ => {
                return Err(DbError::Internal(format!(
                    "table {} is not a B+Tree file",
                    table_id
                )))
            }
        };
        self.mark_dirty(tx, dirty)
    }

    /// Mark the pages dirty with their owning transaction and make sure
    /// each one is cached. Eviction happens before insertion for pages the
    /// access method created itself.
    pub fn mark_dirty(&self, tx: &Transaction, dirty: DirtyPages) -> DbResult {
        for (pid, pod) in dirty {
            pod.set_dirty(Some(tx.clone()));

            let mut inner = self.inner.lock().unwrap();
            inner.dirty.insert(pid, tx.clone());
            if inner.buffer.contains_key(&pid) {
                // the pod in the dirty map is the authoritative version,
                // e.g. for a page index recycled through the free list
                if let Some(slot) = inner.buffer.get_mut(&pid) {
                    *slot = pod.clone();
                }
            } else {
                Self::evict_if_full(&mut inner)?;
                inner.buffer.insert(pid, pod.clone());
                inner.order.push(pid);
            }
            Self::enroll_undo(&mut inner, tx, &pid, &pod);
        }
        Ok(())
    }

    /// Write every dirty page back through its file, clearing the dirty
    /// flags.
    pub fn flush_all_pages(&self) -> DbResult {
        let pids: Vec<PageId> = {
            let inner = self.inner.lock().unwrap();
            inner.dirty.keys().copied().collect()
        };
        for pid in pids {
            self.flush_page(&pid)?;
        }
        Ok(())
    }

    /// Write the transaction's dirty pages back through their files.
    pub fn flush_pages(&self, tx: &Transaction) -> DbResult {
        let pids: Vec<PageId> = {
            let inner = self.inner.lock().unwrap();
            inner
                .dirty
                .iter()
                .filter(|(_, owner)| *owner == tx)
                .map(|(pid, _)| *pid)
                .collect()
        };
        for pid in pids {
            self.flush_page(&pid)?;
        }
        Ok(())
    }

    fn flush_page(&self, pid: &PageId) -> DbResult {
        let pod = {
            let inner = self.inner.lock().unwrap();
            inner.buffer.get(pid).cloned()
        };
        let pod = match pod {
            Some(pod) => pod,
            // a dirty page is always cached under NO-STEAL
            None => {
                return Err(DbError::Internal(format!(
                    "dirty page {} is missing from the pool",
                    pid
                )))
            }
        };

        let table = Database::catalog().get_table(&pid.get_table_id())?;
        table.write_page_data(pid, &pod.get_page_data())?;
        debug!("page flushed, pid: {}", pid);

        pod.set_dirty(None);
        // the flushed content is the baseline for the next transaction
        pod.set_before_image();

        let mut inner = self.inner.lock().unwrap();
        inner.dirty.remove(pid);
        Ok(())
    }

    /// Finish the transaction. On commit its dirty pages are flushed, on
    /// abort their before-images are written back and the cached copies
    /// replaced. Locks are released only after the flush or undo completed.
    pub fn tx_complete(&self, tx: &Transaction, commit: bool) -> DbResult {
        if commit {
            self.flush_pages(tx)?;
        } else {
            self.restore_pages(tx)?;
        }

        {
            let mut inner = self.inner.lock().unwrap();
            inner.undo_log.remove(&tx.get_id());
        }
        Database::concurrent_status().release_latches(tx);
        Ok(())
    }

    /// Undo path of `tx_complete`: every page the transaction touched is
    /// rewritten from its before-image, on disk and in the pool.
    ///
    /// Restoration runs in reverse enrollment order: when the transaction
    /// freed a page and reallocated its index under another kind, the
    /// oldest image is the one that must end up on disk.
    fn restore_pages(&self, tx: &Transaction) -> DbResult {
        let undo: Vec<(PageId, Vec<u8>)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .undo_log
                .get(&tx.get_id())
                .cloned()
                .unwrap_or_default()
        };

        for (pid, before_image) in undo.into_iter().rev() {
            let table = Database::catalog().get_table(&pid.get_table_id())?;
            table.write_page_data(&pid, &before_image)?;

            // replace the cached copy with the before-image; a page no
            // longer in the pool is simply reloaded from disk on the next
            // request
            let cached = {
                let inner = self.inner.lock().unwrap();
                inner.buffer.contains_key(&pid)
            };
            if cached {
                let fresh = Self::instantiate(&table, &pid, &before_image)?;
                fresh.set_before_image();

                let mut inner = self.inner.lock().unwrap();
                if let Some(slot) = inner.buffer.get_mut(&pid) {
                    *slot = fresh;
                }
            }

            let mut inner = self.inner.lock().unwrap();
            inner.dirty.remove(&pid);
            debug!("page restored from its before-image, pid: {}", pid);
        }
        Ok(())
    }

    /// Drop the page from the pool without flushing it. Used by the B+Tree
    /// when a page is returned to the free list.
    pub fn discard_page(&self, pid: &PageId) {
        let mut inner = self.inner.lock().unwrap();
        inner.buffer.remove(pid);
        inner.order.retain(|p| p != pid);
        inner.dirty.remove(pid);
    }
}
