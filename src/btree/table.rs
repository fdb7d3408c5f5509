use core::fmt;
use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, MutexGuard, RwLock,
    },
};

use log::debug;

use crate::{
    buffer_pool::{BufferPool, DirtyPages},
    catalog::hash_table_id,
    concurrent_status::{Lock, Permission},
    database::Database,
    error::DbError,
    page::{
        empty_page_data, BTreeHeaderPage, BTreeInternalPage, BTreeInternalPageIterator,
        BTreeLeafPage, BTreeLeafPageIterator, BTreePage, BTreeRootPointerPage, Entry,
        IndexEntry, Page, PageCategory, PageId, PagePod,
    },
    storage::{
        schema::{Schema, Type},
        tuple::{Cell, Tuple},
    },
    transaction::Transaction,
    types::{DbResult, ResultPod},
    utils::HandyRwLock,
};

pub enum SearchFor {
    Key(Cell),
    LeftMost,
    RightMost,
}

/// A B+Tree index file.
///
/// Page 0 is the root pointer page; data pages follow in allocation order.
/// Freed pages join a free list rooted in the root pointer and are reused
/// in preference to extending the file.
pub struct BTreeTable {
    file_path: String,

    /// the field the index is keyed on
    pub key_field: usize,

    schema: Schema,

    file: Mutex<File>,

    table_id: u32,

    /// The page index of the last page allocated in the file. Page indexes
    /// start from 0 and increase monotonically by 1; index 0 is always the
    /// root pointer page.
    page_index: AtomicU32,
}

impl fmt::Display for BTreeTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<BTreeTable, file: {}, id: {}>", self.file_path, self.table_id)
    }
}

// init functions
impl BTreeTable {
    pub fn new(file_path: &str, key_field: usize, schema: &Schema) -> Result<Self, DbError> {
        File::create(file_path)?;
        let file = Mutex::new(
            OpenOptions::new().write(true).read(true).open(file_path)?,
        );

        let table_id = hash_table_id(file_path);

        Self::file_init(file.lock().unwrap())?;
        debug!("btree table created, path: {}, id: {}", file_path, table_id);

        Ok(Self {
            file_path: file_path.to_string(),
            key_field,
            schema: schema.clone(),
            file,
            table_id,

            // the first leaf page is already allocated
            page_index: AtomicU32::new(1),
        })
    }

    /// A fresh file gets a root pointer page whose root is the empty leaf
    /// page right behind it.
    fn file_init(mut file: MutexGuard<'_, File>) -> DbResult {
        if file.metadata()?.len() == 0 {
            file.write_all(&BTreeRootPointerPage::init_page_data())?;
            file.write_all(&empty_page_data())?;
            file.flush()?;
        }
        Ok(())
    }
}

// read-only accessors
impl BTreeTable {
    pub fn get_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_schema(&self) -> Schema {
        self.schema.clone()
    }

    pub fn get_key_type(&self) -> Type {
        self.schema.fields[self.key_field].field_type
    }

    fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    /// The count of pages in this file, the root pointer page not included.
    pub fn pages_count(&self) -> usize {
        let len = self.get_file().metadata().map(|m| m.len()).unwrap_or(0) as usize;
        (len / BufferPool::get_page_size()).saturating_sub(1)
    }

    /// The count of entries in the index, requires a shared lock on every
    /// leaf page.
    pub fn entries_count(&self, tx: &Transaction) -> usize {
        crate::btree::table_iter::BTreeTableIterator::new(tx, self).count()
    }

    pub fn set_page_index(&self, i: u32) {
        self.page_index.store(i, Ordering::Relaxed);
    }
}

// file io
impl BTreeTable {
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

    pub fn write_page_data(&self, pid: &PageId, data: &[u8]) -> DbResult {
        let page_size = BufferPool::get_page_size();
        let offset = pid.page_index as usize * page_size;

        let mut file = self.get_file();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    pub fn write_empty_page_to_disk(&self, pid: &PageId) -> DbResult {
        self.write_page_data(pid, &empty_page_data())
    }
}

// page fetching through the buffer pool, with the local dirty-page cache
//
// A page fetched with write permission lands in the operation's dirty map,
// so later fetches inside the same operation see the in-flight version and
// the buffer pool can mark and pin the whole set when the operation
// returns.
impl BTreeTable {
    pub(crate) fn get_leaf_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        perm: Permission,
        pid: &PageId,
    ) -> ResultPod<BTreeLeafPage> {
        if let Some(PagePod::Leaf(p)) = dirty.get(pid) {
            return Ok(Arc::clone(p));
        }
        let p = Database::buffer_pool().get_leaf_page(tx, perm, pid)?;
        if perm == Permission::ReadWrite {
            dirty.insert(*pid, PagePod::Leaf(Arc::clone(&p)));
        }
        Ok(p)
    }

    pub(crate) fn get_internal_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        perm: Permission,
        pid: &PageId,
    ) -> ResultPod<BTreeInternalPage> {
        if let Some(PagePod::Internal(p)) = dirty.get(pid) {
            return Ok(Arc::clone(p));
        }
        let p = Database::buffer_pool().get_internal_page(tx, perm, pid)?;
        if perm == Permission::ReadWrite {
            dirty.insert(*pid, PagePod::Internal(Arc::clone(&p)));
        }
        Ok(p)
    }

    pub(crate) fn get_header_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        perm: Permission,
        pid: &PageId,
    ) -> ResultPod<BTreeHeaderPage> {
        if let Some(PagePod::Header(p)) = dirty.get(pid) {
            return Ok(Arc::clone(p));
        }
        let p = Database::buffer_pool().get_header_page(tx, perm, pid)?;
        if perm == Permission::ReadWrite {
            dirty.insert(*pid, PagePod::Header(Arc::clone(&p)));
        }
        Ok(p)
    }

    pub(crate) fn get_root_ptr_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        perm: Permission,
    ) -> ResultPod<BTreeRootPointerPage> {
        let pid = PageId::new(PageCategory::RootPointer, self.table_id, 0);
        if let Some(PagePod::RootPointer(p)) = dirty.get(&pid) {
            return Ok(Arc::clone(p));
        }
        let p = Database::buffer_pool().get_root_ptr_page(tx, perm, &pid)?;
        if perm == Permission::ReadWrite {
            dirty.insert(pid, PagePod::RootPointer(Arc::clone(&p)));
        }
        Ok(p)
    }

    pub(crate) fn get_root_pid(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        perm: Permission,
    ) -> Result<PageId, DbError> {
        let root_ptr_rc = self.get_root_ptr_page(tx, dirty, perm)?;
        let pid = root_ptr_rc.rl().get_root_pid();
        Ok(pid)
    }

    pub(crate) fn set_root_pid(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        root_pid: &PageId,
    ) -> DbResult {
        let root_ptr_rc = self.get_root_ptr_page(tx, dirty, Permission::ReadWrite)?;
        root_ptr_rc.wl().set_root_pid(root_pid);
        Ok(())
    }

    pub(crate) fn set_parent(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        child_pid: &PageId,
        parent_pid: &PageId,
    ) -> DbResult {
        match child_pid.category {
            PageCategory::Internal => {
                let child_rc =
                    self.get_internal_page(tx, dirty, Permission::ReadWrite, child_pid)?;
                child_rc.wl().set_parent_pid(parent_pid);
            }
            PageCategory::Leaf => {
                let child_rc = self.get_leaf_page(tx, dirty, Permission::ReadWrite, child_pid)?;
                child_rc.wl().set_parent_pid(parent_pid);
            }
            _ => {
                return Err(DbError::Internal(format!(
                    "cannot set the parent of page {}",
                    child_pid
                )))
            }
        }
        Ok(())
    }
}

// search
impl BTreeTable {
    /// Recursive function which finds and locks the leaf page corresponding
    /// to the left-most page possibly containing the search key. It locks
    /// all internal nodes along the path with read-only permission, and
    /// locks the leaf node with the given permission.
    pub(crate) fn find_leaf_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        perm: Permission,
        pid: PageId,
        search: &SearchFor,
    ) -> ResultPod<BTreeLeafPage> {
        match pid.category {
            PageCategory::Leaf => self.get_leaf_page(tx, dirty, perm, &pid),
            PageCategory::Internal => {
                let page_rc = self.get_internal_page(tx, dirty, Permission::ReadOnly, &pid)?;
                let child_pid: PageId;

                // hold the internal page
                {
                    let page = page_rc.rl();
                    let mut it = BTreeInternalPageIterator::new(&page);
                    child_pid = match search {
                        SearchFor::Key(cell) => {
                            // the first separator >= the key leads to the
                            // left-most leaf possibly holding the key
                            let mut found = None;
                            let mut last = None;
                            for e in it {
                                if e.get_key() >= *cell {
                                    found = Some(e.get_left_child());
                                    break;
                                }
                                last = Some(e);
                            }
                            match (found, last) {
                                (Some(pid), _) => pid,
                                (None, Some(e)) => e.get_right_child(),
                                (None, None) => {
                                    return Err(DbError::Internal(format!(
                                        "internal page {} has no entries",
                                        pid
                                    )))
                                }
                            }
                        }
                        SearchFor::LeftMost => match it.next() {
                            Some(e) => e.get_left_child(),
                            None => {
                                return Err(DbError::Internal(format!(
                                    "internal page {} has no entries",
                                    pid
                                )))
                            }
                        },
                        SearchFor::RightMost => match it.next_back() {
                            Some(e) => e.get_right_child(),
                            None => {
                                return Err(DbError::Internal(format!(
                                    "internal page {} has no entries",
                                    pid
                                )))
                            }
                        },
                    };
                }
                // release the internal page

                self.find_leaf_page(tx, dirty, perm, child_pid, search)
            }
            _ => Err(DbError::Internal(format!(
                "cannot search through page {}",
                pid
            ))),
        }
    }

    /// The current root of the tree, with a shared lock on the root
    /// pointer page.
    pub fn root_pid(&self, tx: &Transaction) -> Result<PageId, DbError> {
        let mut dirty = HashMap::new();
        self.get_root_pid(tx, &mut dirty, Permission::ReadOnly)
    }

    pub fn get_first_page(&self, tx: &Transaction, perm: Permission) -> ResultPod<BTreeLeafPage> {
        let mut dirty = HashMap::new();
        let root_pid = self.get_root_pid(tx, &mut dirty, Permission::ReadOnly)?;
        self.find_leaf_page(tx, &mut dirty, perm, root_pid, &SearchFor::LeftMost)
    }

    pub fn get_last_page(&self, tx: &Transaction, perm: Permission) -> ResultPod<BTreeLeafPage> {
        let mut dirty = HashMap::new();
        let root_pid = self.get_root_pid(tx, &mut dirty, Permission::ReadOnly)?;
        self.find_leaf_page(tx, &mut dirty, perm, root_pid, &SearchFor::RightMost)
    }
}

// insertion
impl BTreeTable {
    /// Insert an index entry, keeping the entries in sorted order. May cause
    /// pages to split if the target leaf is full.
    ///
    /// Returns the pages dirtied by the operation, for the buffer pool to
    /// mark and keep cached.
    pub fn insert_entry(
        &self,
        tx: &Transaction,
        entry: &IndexEntry,
    ) -> Result<DirtyPages, DbError> {
        let mut dirty = HashMap::new();

        let root_pid = self.get_root_pid(tx, &mut dirty, Permission::ReadWrite)?;

        // find and lock the left-most leaf page for the key, and split it if
        // there are no more slots available
        let key = entry.get_key();
        let mut leaf_rc = self.find_leaf_page(
            tx,
            &mut dirty,
            Permission::ReadWrite,
            root_pid,
            &SearchFor::Key(key.clone()),
        )?;

        if leaf_rc.rl().empty_slots_count() == 0 {
            leaf_rc = self.split_leaf_page(tx, &mut dirty, leaf_rc, &key)?;
        }
        leaf_rc.wl().insert_entry(entry)?;
        Ok(dirty)
    }

    /// Insert an entry derived from the tuple: the key comes from the key
    /// field, the record id from the tuple's on-disk location.
    pub fn insert_tuple(
        &self,
        tx: &Transaction,
        tuple: &Tuple,
    ) -> Result<DirtyPages, DbError> {
        let record_id = tuple.get_record_id().ok_or_else(|| {
            DbError::SlotEmpty("cannot index a tuple without a record id".to_string())
        })?;
        let entry = IndexEntry::new(tuple.get_cell(self.key_field), record_id);
        self.insert_entry(tx, &entry)
    }

    /// Split a leaf page to make room for new entries and recursively split
    /// the parent node as needed to accommodate a new separator. The
    /// separator is the smallest key of the new right page (the key is
    /// "copied up"). Sibling and parent pointers are patched on all the
    /// affected pages.
    ///
    /// Returns the leaf into which the entry with key `key` should be
    /// inserted: the page whose key range contains it, ties going to the
    /// right page.
    pub(crate) fn split_leaf_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        page_rc: Arc<RwLock<BTreeLeafPage>>,
        key: &Cell,
    ) -> ResultPod<BTreeLeafPage> {
        let new_sibling_rc = self.get_empty_leaf_page(tx, dirty)?;
        let parent_pid: PageId;
        let separator: Cell;

        // hold the old page and the new sibling
        {
            let mut new_sibling = new_sibling_rc.wl();
            let mut page = page_rc.wl();

            // move the upper half of the entries to the new right sibling
            let move_count = page.entries_count() / 2;
            let mut delete_slots: Vec<usize> = Vec::new();
            let mut it = BTreeLeafPageIterator::new(&page);
            for e in it.by_ref().rev().take(move_count) {
                delete_slots.push(e.get_slot());
                new_sibling.insert_entry(&e)?;
            }
            for slot in delete_slots {
                page.delete_entry(slot);
            }

            separator = match BTreeLeafPageIterator::new(&new_sibling).next() {
                Some(e) => e.get_key(),
                None => return Err(DbError::internal("split moved no entries")),
            };
            parent_pid = page.get_parent_pid();
        }
        // release the old page and the new sibling
        //
        // The parent is prepared outside the borrow block: splitting it may
        // touch a lot of children, possibly including the current leaf.
        let parent_rc = self.get_parent_with_empty_slots(tx, dirty, parent_pid, key)?;

        // hold the parent, the old page and the new sibling
        {
            let mut parent = parent_rc.wl();
            let mut page = page_rc.wl();
            let mut new_sibling = new_sibling_rc.wl();

            let entry = Entry::new(separator.clone(), &page.get_pid(), &new_sibling.get_pid());
            parent.insert_entry(&entry)?;

            // the old right sibling now points back at the new page
            if let Some(old_right_pid) = page.get_right_pid() {
                let old_right_rc =
                    self.get_leaf_page(tx, dirty, Permission::ReadWrite, &old_right_pid)?;
                old_right_rc.wl().set_left_pid(Some(new_sibling.get_pid()));
            }

            // chain the new page between the old page and its old right
            // sibling
            new_sibling.set_right_pid(page.get_right_pid());
            new_sibling.set_left_pid(Some(page.get_pid()));
            page.set_right_pid(Some(new_sibling.get_pid()));

            page.set_parent_pid(&parent.get_pid());
            new_sibling.set_parent_pid(&parent.get_pid());
        }
        // release the parent, the old page and the new sibling

        // ties go to the right page on leaf splits
        if key < &separator {
            Ok(page_rc)
        } else {
            Ok(new_sibling_rc)
        }
    }

    /// Get a parent page ready to accept a new entry. This may mean
    /// materializing a new internal root, splitting a full parent first, or
    /// simply locking and returning the existing parent.
    pub(crate) fn get_parent_with_empty_slots(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        parent_id: PageId,
        key: &Cell,
    ) -> ResultPod<BTreeInternalPage> {
        match parent_id.category {
            PageCategory::RootPointer => {
                // the split reached the top, a new internal root is needed
                let new_parent_rc = self.get_empty_internal_page(tx, dirty)?;
                let new_parent_pid = new_parent_rc.rl().get_pid();
                self.set_root_pid(tx, dirty, &new_parent_pid)?;
                Ok(new_parent_rc)
            }
            PageCategory::Internal => {
                let parent_rc =
                    self.get_internal_page(tx, dirty, Permission::ReadWrite, &parent_id)?;
                let empty_slots_count = parent_rc.rl().empty_slots_count();
                if empty_slots_count > 0 {
                    Ok(parent_rc)
                } else {
                    self.split_internal_page(tx, dirty, parent_rc, key)
                }
            }
            _ => Err(DbError::Internal(format!(
                "page {} cannot be a parent",
                parent_id
            ))),
        }
    }

    /// Split an internal page and recursively split its parent as needed.
    /// The middle key of the original page is "pushed up" into the parent
    /// (not copied); parent pointers of all moved children are patched.
    ///
    /// Returns the internal page into which an entry with key `key` should
    /// be inserted: ties go to the left page, which keeps the descent
    /// monotone.
    pub(crate) fn split_internal_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        page_rc: Arc<RwLock<BTreeInternalPage>>,
        key: &Cell,
    ) -> ResultPod<BTreeInternalPage> {
        let sibling_rc = self.get_empty_internal_page(tx, dirty)?;
        let mut parent_pid: PageId;
        let separator: Cell;
        let new_entry: Entry;

        // hold the page and the new sibling
        {
            let mut sibling = sibling_rc.wl();
            let mut page = page_rc.wl();

            parent_pid = page.get_parent_pid();
            if parent_pid.category == PageCategory::RootPointer {
                // the page was the root, materialize a new root above it
                let parent_rc = self.get_empty_internal_page(tx, dirty)?;
                parent_pid = parent_rc.rl().get_pid();
                self.set_root_pid(tx, dirty, &parent_pid)?;
            }

            let move_count = page.entries_count() / 2;
            let mut delete_slots: Vec<usize> = Vec::new();
            let mut it = BTreeInternalPageIterator::new(&page);
            for e in it.by_ref().rev().take(move_count) {
                delete_slots.push(e.get_record_id());
                sibling.insert_entry(&e)?;

                // the moved child now lives under the sibling
                self.set_parent(tx, dirty, &e.get_right_child(), &sibling.get_pid())?;
            }

            // the middle entry is pushed up, not copied
            let middle_entry = match it.next_back() {
                Some(e) => e,
                None => return Err(DbError::internal("split moved every entry")),
            };
            delete_slots.push(middle_entry.get_record_id());
            for slot in delete_slots {
                page.delete_key_and_right_child(slot);
            }

            self.set_parent(tx, dirty, &middle_entry.get_right_child(), &sibling.get_pid())?;

            separator = middle_entry.get_key();
            new_entry = Entry::new(separator.clone(), &page.get_pid(), &sibling.get_pid());
        }
        // release the page and the new sibling

        let parent_rc = self.get_parent_with_empty_slots(tx, dirty, parent_pid, key)?;
        parent_pid = parent_rc.rl().get_pid();
        page_rc.wl().set_parent_pid(&parent_pid);
        sibling_rc.wl().set_parent_pid(&parent_pid);

        parent_rc.wl().insert_entry(&new_entry)?;

        // ties go to the left page on internal splits
        if key <= &separator {
            Ok(page_rc)
        } else {
            Ok(sibling_rc)
        }
    }
}

// page allocation
impl BTreeTable {
    /// The index for a fresh page: a page from the free list when one is
    /// available, a new index at the end of the file otherwise.
    pub(crate) fn get_empty_page_index(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
    ) -> Result<u32, DbError> {
        let root_ptr_rc = self.get_root_ptr_page(tx, dirty, Permission::ReadWrite)?;
        let header_pid = root_ptr_rc.rl().get_header_pid();

        if let Some(first_header_pid) = header_pid {
            let mut header_pid = first_header_pid;
            let mut offset: u32 = 0;
            loop {
                let header_rc =
                    self.get_header_page(tx, dirty, Permission::ReadWrite, &header_pid)?;
                let slot = header_rc.rl().get_empty_slot();
                if let Some(slot) = slot {
                    header_rc.wl().mark_slot_status(slot as usize, true);
                    debug!("page {} taken from the free list", offset + slot);
                    return Ok(offset + slot);
                }

                let next = header_rc.rl().get_next_pid();
                match next {
                    Some(next) => {
                        offset += header_rc.rl().get_slots_count() as u32;
                        header_pid = next;
                    }
                    None => break,
                }
            }
        }

        let index = self.page_index.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(index)
    }

    pub(crate) fn get_empty_leaf_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
    ) -> ResultPod<BTreeLeafPage> {
        let page_index = self.get_empty_page_index(tx, dirty)?;
        let pid = PageId::new(PageCategory::Leaf, self.table_id, page_index);
        Database::concurrent_status().request_latch(tx, &Lock::XLock, &pid)?;

        self.write_empty_page_to_disk(&pid)?;
        let mut page = BTreeLeafPage::new(&pid, &empty_page_data(), &self.schema, self.key_field);
        page.set_before_image();

        let page_rc = Arc::new(RwLock::new(page));
        dirty.insert(pid, PagePod::Leaf(Arc::clone(&page_rc)));
        Ok(page_rc)
    }

    pub(crate) fn get_empty_internal_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
    ) -> ResultPod<BTreeInternalPage> {
        let page_index = self.get_empty_page_index(tx, dirty)?;
        let pid = PageId::new(PageCategory::Internal, self.table_id, page_index);
        Database::concurrent_status().request_latch(tx, &Lock::XLock, &pid)?;

        self.write_empty_page_to_disk(&pid)?;
        let mut page =
            BTreeInternalPage::new(&pid, &empty_page_data(), &self.schema, self.key_field);
        page.set_before_image();

        let page_rc = Arc::new(RwLock::new(page));
        dirty.insert(pid, PagePod::Internal(Arc::clone(&page_rc)));
        Ok(page_rc)
    }

    pub(crate) fn get_empty_header_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
    ) -> ResultPod<BTreeHeaderPage> {
        let page_index = self.get_empty_page_index(tx, dirty)?;
        let pid = PageId::new(PageCategory::Header, self.table_id, page_index);
        Database::concurrent_status().request_latch(tx, &Lock::XLock, &pid)?;

        self.write_empty_page_to_disk(&pid)?;
        let mut page = BTreeHeaderPage::new_empty(&pid);
        page.set_before_image();

        let page_rc = Arc::new(RwLock::new(page));
        dirty.insert(pid, PagePod::Header(Arc::clone(&page_rc)));
        Ok(page_rc)
    }
}

// tree-wide validation
impl BTreeTable {
    /// Check the integrity of the tree: parent pointers, sibling chain,
    /// key-range bounds and, when asked, the minimum-occupancy rule.
    /// Requires a shared lock on every page.
    pub fn check_integrity(&self, check_occupancy: bool) -> DbResult {
        let tx = Transaction::new();
        let result = self.check_integrity_with(&tx, check_occupancy);
        tx.commit()?;
        result
    }

    fn check_integrity_with(&self, tx: &Transaction, check_occupancy: bool) -> DbResult {
        let mut dirty = HashMap::new();
        let root_ptr_rc = self.get_root_ptr_page(tx, &mut dirty, Permission::ReadOnly)?;
        let root_pid = root_ptr_rc.rl().get_root_pid();
        let root_ptr_pid = root_ptr_rc.rl().get_pid();

        let summary = self.check_sub_tree(
            tx,
            &root_pid,
            &root_ptr_pid,
            None,
            None,
            check_occupancy,
            0,
        )?;

        if summary.left_ptr.is_some() {
            return Err(DbError::Internal(format!(
                "the left-most leaf has a left sibling: {:?}",
                summary.left_ptr
            )));
        }
        if summary.right_ptr.is_some() {
            return Err(DbError::Internal(format!(
                "the right-most leaf has a right sibling: {:?}",
                summary.right_ptr
            )));
        }
        Ok(())
    }

    fn check_sub_tree(
        &self,
        tx: &Transaction,
        pid: &PageId,
        parent_pid: &PageId,
        mut lower_bound: Option<Cell>,
        upper_bound: Option<Cell>,
        check_occupancy: bool,
        depth: usize,
    ) -> Result<SubtreeSummary, DbError> {
        let mut dirty = HashMap::new();
        match pid.category {
            PageCategory::Leaf => {
                let page_rc = self.get_leaf_page(tx, &mut dirty, Permission::ReadOnly, pid)?;
                let page = page_rc.rl();
                page.check_integrity(
                    parent_pid,
                    lower_bound,
                    upper_bound,
                    check_occupancy,
                    depth,
                )?;

                Ok(SubtreeSummary {
                    depth,
                    left_ptr: page.get_left_pid(),
                    left_most_pid: Some(page.get_pid()),
                    right_ptr: page.get_right_pid(),
                    right_most_pid: Some(page.get_pid()),
                })
            }

            PageCategory::Internal => {
                let page_rc = self.get_internal_page(tx, &mut dirty, Permission::ReadOnly, pid)?;
                let page = page_rc.rl();
                page.check_integrity(
                    parent_pid,
                    lower_bound.clone(),
                    upper_bound.clone(),
                    check_occupancy,
                    depth,
                )?;

                let mut it = BTreeInternalPageIterator::new(&page);
                let first = it.next().ok_or_else(|| {
                    DbError::Internal(format!("internal page {} has no entries", pid))
                })?;

                let mut accumulation = self.check_sub_tree(
                    tx,
                    &first.get_left_child(),
                    pid,
                    lower_bound.clone(),
                    Some(first.get_key()),
                    check_occupancy,
                    depth + 1,
                )?;

                let mut last_entry = first;
                for entry in it {
                    let current = self.check_sub_tree(
                        tx,
                        &entry.get_left_child(),
                        pid,
                        lower_bound.clone(),
                        Some(entry.get_key()),
                        check_occupancy,
                        depth + 1,
                    )?;
                    accumulation = accumulation.check_and_merge(&current)?;

                    lower_bound = Some(entry.get_key());
                    last_entry = entry;
                }

                let last_right = self.check_sub_tree(
                    tx,
                    &last_entry.get_right_child(),
                    pid,
                    lower_bound,
                    upper_bound,
                    check_occupancy,
                    depth + 1,
                )?;
                accumulation = accumulation.check_and_merge(&last_right)?;

                Ok(accumulation)
            }

            // no other page kinds are allowed inside the tree
            _ => Err(DbError::Internal(format!(
                "page {} inside the tree",
                pid
            ))),
        }
    }
}

// debug helpers
impl BTreeTable {
    /// Log an indented depiction of the tree structure.
    ///
    /// `max_level` limits the depth of the dump: 0 prints only the root,
    /// -1 prints all pages.
    pub fn draw_tree(&self, max_level: i32) {
        let tx = Transaction::new();
        let mut depiction = "\n\n----- PRINT TREE STRUCTURE START -----\n\n".to_string();

        let mut dirty = HashMap::new();
        if let Ok(root_pid) = self.get_root_pid(&tx, &mut dirty, Permission::ReadOnly) {
            depiction.push_str(&self.draw_subtree(&tx, &root_pid, 0, max_level));
        }

        depiction.push_str("\n----- PRINT TREE STRUCTURE END   -----\n");
        debug!("{}", depiction);
        let _ = tx.commit();
    }

    fn draw_subtree(&self, tx: &Transaction, pid: &PageId, level: usize, max_level: i32) -> String {
        match pid.category {
            PageCategory::Internal => self.draw_internal_node(tx, pid, level, max_level),
            PageCategory::Leaf => self.draw_leaf_node(tx, pid, level),
            _ => format!("invalid page inside the tree: {}\n", pid),
        }
    }

    fn draw_leaf_node(&self, tx: &Transaction, pid: &PageId, level: usize) -> String {
        let mut dirty = HashMap::new();
        let prefix = "│   ".repeat(level);
        let page_rc = match self.get_leaf_page(tx, &mut dirty, Permission::ReadOnly, pid) {
            Ok(rc) => rc,
            Err(e) => return format!("{}├── leaf: {} (unreadable: {})\n", prefix, pid, e),
        };
        let page = page_rc.rl();

        let mut it = BTreeLeafPageIterator::new(&page);
        let first = it.next();
        let mut it = BTreeLeafPageIterator::new(&page);
        let last = it.next_back();

        let mut depiction = format!(
            "{}├── leaf: {} ({}/{} entries)\n",
            prefix,
            page.get_pid(),
            page.entries_count(),
            page.slot_count,
        );
        let prefix = "│   ".repeat(level + 1);
        if let (Some(first), Some(last)) = (first, last) {
            depiction.push_str(&format!("{}├── first entry: {}\n", prefix, first));
            depiction.push_str(&format!("{}└── last entry:  {}\n", prefix, last));
        }
        depiction
    }

    fn draw_internal_node(
        &self,
        tx: &Transaction,
        pid: &PageId,
        level: usize,
        max_level: i32,
    ) -> String {
        let mut dirty = HashMap::new();
        let prefix = "│   ".repeat(level);
        let page_rc = match self.get_internal_page(tx, &mut dirty, Permission::ReadOnly, pid) {
            Ok(rc) => rc,
            Err(e) => return format!("{}├── internal: {} (unreadable: {})\n", prefix, pid, e),
        };

        let mut depiction = String::new();
        // hold the internal page
        {
            let page = page_rc.rl();
            depiction.push_str(&format!(
                "{}├── internal: {} ({}/{} entries)\n",
                prefix,
                pid,
                page.entries_count(),
                page.get_entry_capacity(),
            ));
            if max_level != -1 && level as i32 == max_level {
                return depiction;
            }

            for (i, entry) in BTreeInternalPageIterator::new(&page).enumerate() {
                if i == 0 {
                    depiction.push_str(&self.draw_subtree(
                        tx,
                        &entry.get_left_child(),
                        level + 1,
                        max_level,
                    ));
                }
                depiction.push_str(&format!(
                    "{}├── key: {:?}\n",
                    "│   ".repeat(level + 1),
                    entry.get_key()
                ));
                depiction.push_str(&self.draw_subtree(
                    tx,
                    &entry.get_right_child(),
                    level + 1,
                    max_level,
                ));
            }
        }
        // release the internal page

        depiction
    }
}

struct SubtreeSummary {
    /// The distance towards the root.
    depth: usize,

    left_ptr: Option<PageId>,
    left_most_pid: Option<PageId>,
    right_ptr: Option<PageId>,
    right_most_pid: Option<PageId>,
}

impl SubtreeSummary {
    /// Merge with the summary of the subtree immediately to the right,
    /// verifying the leaf chain stitches together.
    fn check_and_merge(&self, right: &SubtreeSummary) -> Result<SubtreeSummary, DbError> {
        if self.depth != right.depth {
            return Err(DbError::Internal(format!(
                "leaf depth mismatch: {} vs {}",
                self.depth, right.depth
            )));
        }
        if self.right_ptr != right.left_most_pid {
            return Err(DbError::Internal(format!(
                "broken sibling chain: {:?} -> {:?}",
                self.right_ptr, right.left_most_pid
            )));
        }
        if self.right_most_pid != right.left_ptr {
            return Err(DbError::Internal(format!(
                "broken sibling back-chain: {:?} <- {:?}",
                self.right_most_pid, right.left_ptr
            )));
        }

        Ok(SubtreeSummary {
            depth: self.depth,
            left_ptr: self.left_ptr,
            left_most_pid: self.left_most_pid,
            right_ptr: right.right_ptr,
            right_most_pid: right.right_most_pid,
        })
    }
}
