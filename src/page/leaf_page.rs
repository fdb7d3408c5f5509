use std::{cmp::Ordering, fmt, io::Cursor, io::Read};

use bit_vec::BitVec;

use crate::{
    btree::consts::INDEX_SIZE,
    buffer_pool::BufferPool,
    error::DbError,
    io::{read_bitmap, read_into, write_bitmap, ByteWriter, Serializeable},
    storage::{
        schema::{get_type_length, Schema, Type},
        tuple::{Cell, RecordId},
    },
    transaction::Transaction,
    types::{DbResult, Pod},
    utils::HandyRwLock,
};

use super::{
    BTreeBasePage, BTreePage, Page, PageCategory, PageId, EMPTY_PAGE_INDEX,
};

/// A leaf entry: the indexed key and the location of the row it points at.
/// `slot` is the position of the entry on its page, filled in by the page
/// iterators so callers can address the entry for deletion.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    key: Cell,
    record_id: RecordId,

    slot: usize,
}

impl IndexEntry {
    pub fn new(key: Cell, record_id: RecordId) -> Self {
        Self {
            key,
            record_id,
            slot: 0,
        }
    }

    pub fn get_key(&self) -> Cell {
        self.key.clone()
    }

    pub fn get_record_id(&self) -> RecordId {
        self.record_id
    }

    pub fn get_slot(&self) -> usize {
        self.slot
    }

    pub fn set_slot(&mut self, slot: usize) {
        self.slot = slot;
    }
}

impl PartialEq for IndexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.record_id == other.record_id
    }
}

impl Eq for IndexEntry {}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then(self.record_id.cmp(&other.record_id))
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:?} -> {})", self.key, self.record_id)
    }
}

/// # Format
///
/// key bytes, then the record id as (page-number: 4, slot: 4). The entry
/// body carries no table id; on decode the record id points into the table
/// the index is registered for.
impl Serializeable for IndexEntry {
    type Reference = (Type, u32);

    fn encode(&self, writer: &mut ByteWriter, reference: &(Type, u32)) {
        self.key.encode(writer, &reference.0);
        writer.write(&self.record_id.pid.page_index);
        writer.write(&self.record_id.slot);
    }

    fn decode<R: Read>(reader: &mut R, reference: &(Type, u32)) -> Self {
        let (key_type, table_id) = reference;
        let key = Cell::decode(reader, key_type);
        let page_index: u32 = read_into(reader);
        let slot: u32 = read_into(reader);
        let pid = PageId::new(PageCategory::Heap, *table_id, page_index);
        Self {
            key,
            record_id: RecordId::new(pid, slot),
            slot: 0,
        }
    }
}

/// A B+Tree leaf page: parent and sibling pointers, an occupancy bitmap,
/// and fixed-size index entries kept in key order.
pub struct BTreeLeafPage {
    page: BTreeBasePage,

    pub slot_count: usize,

    // indicate slots' status: true means occupied, false means empty
    header: BitVec,

    // all slots, including the empty ones
    entries: Vec<IndexEntry>,

    key_type: Type,

    // page index 0 means no sibling
    left_sibling_id: u32,
    right_sibling_id: u32,
}

impl std::ops::Deref for BTreeLeafPage {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl std::ops::DerefMut for BTreeLeafPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl BTreeLeafPage {
    /// The maximum number of entries this page can hold.
    pub fn calculate_slots_count(key_type: Type) -> usize {
        let bits_per_entry_including_header = Self::entry_size(key_type) * 8 + 1;
        // extra bytes are the parent, left sibling and right sibling pointers
        let extra_bits = 3 * INDEX_SIZE * 8;
        (BufferPool::get_page_size() * 8 - extra_bits) / bits_per_entry_including_header
    }

    pub fn entry_size(key_type: Type) -> usize {
        get_type_length(key_type) + 2 * INDEX_SIZE
    }

    pub fn get_slots_count(&self) -> usize {
        self.slot_count
    }

    pub fn empty_slots_count(&self) -> usize {
        (0..self.slot_count)
            .filter(|i| !self.is_slot_used(*i))
            .count()
    }

    /// The number of entries currently stored on this page.
    pub fn entries_count(&self) -> usize {
        self.slot_count - self.empty_slots_count()
    }

    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    pub fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    /// Whether the page satisfies the minimum-occupancy rule. The rule is
    /// relaxed for the root.
    pub fn stable(&self) -> bool {
        if self.get_parent_pid().category == PageCategory::RootPointer {
            return true;
        }

        let max_empty_slots = self.slot_count - self.slot_count / 2;
        self.empty_slots_count() <= max_empty_slots
    }

    pub fn set_right_pid(&mut self, pid: Option<PageId>) {
        self.right_sibling_id = match pid {
            Some(pid) => pid.page_index,
            None => EMPTY_PAGE_INDEX,
        };
    }

    pub fn get_right_pid(&self) -> Option<PageId> {
        if self.right_sibling_id == EMPTY_PAGE_INDEX {
            return None;
        }
        Some(PageId::new(
            PageCategory::Leaf,
            self.get_pid().table_id,
            self.right_sibling_id,
        ))
    }

    pub fn set_left_pid(&mut self, pid: Option<PageId>) {
        self.left_sibling_id = match pid {
            Some(pid) => pid.page_index,
            None => EMPTY_PAGE_INDEX,
        };
    }

    pub fn get_left_pid(&self) -> Option<PageId> {
        if self.left_sibling_id == EMPTY_PAGE_INDEX {
            return None;
        }
        Some(PageId::new(
            PageCategory::Leaf,
            self.get_pid().table_id,
            self.left_sibling_id,
        ))
    }

    /// Add the entry to the page keeping all entries sorted by key then
    /// record id.
    pub fn insert_entry(&mut self, entry: &IndexEntry) -> DbResult {
        if self.empty_slots_count() == 0 {
            return Err(DbError::PageFull);
        }

        // find the first empty slot
        let mut first_empty_slot: i32 = 0;
        for i in 0..self.slot_count {
            if !self.is_slot_used(i) {
                first_empty_slot = i as i32;
                break;
            }
        }

        // Find the last entry less than the one being inserted. -1 indicates
        // there is no such entry, so the new entry belongs in slot 0.
        let mut last_less_slot: i32 = -1;
        for i in 0..self.slot_count {
            if self.is_slot_used(i) {
                if self.entries[i] < *entry {
                    last_less_slot = i as i32;
                } else {
                    break;
                }
            }
        }

        // shift entries back or forward to fill the empty slot and make room
        // for the new entry while keeping entries in sorted order
        let good_slot: usize;
        if first_empty_slot < last_less_slot {
            for i in first_empty_slot..last_less_slot {
                self.move_entry((i + 1) as usize, i as usize);
            }
            good_slot = last_less_slot as usize;
        } else {
            for i in (last_less_slot + 1..first_empty_slot).rev() {
                self.move_entry(i as usize, (i + 1) as usize);
            }
            good_slot = (last_less_slot + 1) as usize;
        }

        let mut stored = entry.clone();
        stored.set_slot(good_slot);
        self.entries[good_slot] = stored;
        self.mark_slot_status(good_slot, true);
        Ok(())
    }

    // Move an entry from one slot to another, the destination must be empty.
    fn move_entry(&mut self, from: usize, to: usize) {
        if !self.is_slot_used(from) {
            return;
        }

        let mut moved = self.entries[from].clone();
        moved.set_slot(to);
        self.entries[to] = moved;
        self.mark_slot_status(to, true);
        self.mark_slot_status(from, false);
    }

    pub fn get_entry(&self, slot_index: usize) -> Option<IndexEntry> {
        if self.is_slot_used(slot_index) {
            let mut entry = self.entries[slot_index].clone();
            entry.set_slot(slot_index);
            return Some(entry);
        }
        None
    }

    pub fn delete_entry(&mut self, slot_index: usize) {
        self.mark_slot_status(slot_index, false);
    }

    /// Validate the page against its expected parent and key bounds. Used by
    /// the tree-wide integrity check.
    pub fn check_integrity(
        &self,
        parent_pid: &PageId,
        lower_bound: Option<Cell>,
        upper_bound: Option<Cell>,
        check_occupancy: bool,
        depth: usize,
    ) -> DbResult {
        if self.get_pid().category != PageCategory::Leaf {
            return Err(DbError::internal("page category is not leaf"));
        }
        if &self.get_parent_pid() != parent_pid {
            return Err(DbError::Internal(format!(
                "parent pointer of {} is {}, expect {}",
                self.get_pid(),
                self.get_parent_pid(),
                parent_pid
            )));
        }

        let mut previous: Option<IndexEntry> = None;
        for entry in BTreeLeafPageIterator::new(self) {
            if let Some(previous) = &previous {
                if previous >= &entry {
                    return Err(DbError::Internal(format!(
                        "entries are not strictly sorted, previous: {}, current: {}",
                        previous, entry
                    )));
                }
            }
            if let Some(lower) = &lower_bound {
                if &entry.get_key() < lower {
                    return Err(DbError::Internal(format!(
                        "entry {} below the lower bound {:?}",
                        entry, lower
                    )));
                }
            }
            previous = Some(entry);
        }

        if let (Some(upper), Some(previous)) = (&upper_bound, &previous) {
            if &previous.get_key() > upper {
                return Err(DbError::Internal(format!(
                    "the last entry exceeds the upper bound, entry: {}, bound: {:?}",
                    previous, upper
                )));
            }
        }

        if check_occupancy && depth > 0 && self.entries_count() < self.slot_count / 2 {
            return Err(DbError::Internal(format!(
                "leaf {} below minimum occupancy: {}/{}",
                self.get_pid(),
                self.entries_count(),
                self.slot_count
            )));
        }

        Ok(())
    }
}

impl Page for BTreeLeafPage {
    fn get_pid(&self) -> PageId {
        self.page.get_pid()
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write(&self.page.get_parent_page_index());
        writer.write(&self.left_sibling_id);
        writer.write(&self.right_sibling_id);
        write_bitmap(&mut writer, &self.header);

        let reference = (self.key_type, self.get_pid().table_id);
        let entry_size = Self::entry_size(self.key_type);
        for i in 0..self.slot_count {
            if self.is_slot_used(i) {
                self.entries[i].encode(&mut writer, &reference);
            } else {
                writer.write_bytes(&vec![0; entry_size]);
            }
        }
        writer.to_padded_bytes(BufferPool::get_page_size())
    }

    fn get_before_image(&self) -> Vec<u8> {
        self.page.get_old_data()
    }

    fn set_before_image(&mut self) {
        let data = self.get_page_data();
        self.page.set_old_data(data);
    }

    fn set_dirty(&mut self, tx: Option<Transaction>) {
        self.page.set_dirty(tx);
    }

    fn get_dirtier(&self) -> Option<Transaction> {
        self.page.get_dirtier()
    }
}

impl BTreePage for BTreeLeafPage {
    fn new(pid: &PageId, bytes: &[u8], schema: &Schema, key_field: usize) -> Self {
        let key_type = schema.fields[key_field].field_type;
        let slot_count = Self::calculate_slots_count(key_type);

        let mut reader = Cursor::new(bytes);
        let parent_page_index: u32 = read_into(&mut reader);
        let left_sibling_id: u32 = read_into(&mut reader);
        let right_sibling_id: u32 = read_into(&mut reader);
        let header = read_bitmap(&mut reader, slot_count);

        let reference = (key_type, pid.table_id);
        let mut entries = Vec::with_capacity(slot_count);
        for i in 0..slot_count {
            let mut entry = IndexEntry::decode(&mut reader, &reference);
            entry.set_slot(i);
            entries.push(entry);
        }

        let mut page = BTreeBasePage::new(pid);
        page.set_parent_page_index(parent_page_index);

        Self {
            page,
            slot_count,
            header,
            entries,
            key_type,
            left_sibling_id,
            right_sibling_id,
        }
    }

    fn get_parent_pid(&self) -> PageId {
        self.page.get_parent_pid()
    }

    fn set_parent_pid(&mut self, pid: &PageId) {
        self.page.set_parent_pid(pid);
    }
}

pub struct BTreeLeafPageIterator<'page> {
    page: &'page BTreeLeafPage,
    cursor: i32,
    reverse_cursor: i32,
}

impl<'page> BTreeLeafPageIterator<'page> {
    pub fn new(page: &'page BTreeLeafPage) -> Self {
        Self {
            page,
            cursor: -1,
            reverse_cursor: page.slot_count as i32,
        }
    }
}

impl Iterator for BTreeLeafPageIterator<'_> {
    type Item = IndexEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.cursor += 1;
            let cursor = self.cursor as usize;
            if cursor >= self.page.slot_count {
                return None;
            }

            if self.page.is_slot_used(cursor) {
                return self.page.get_entry(cursor);
            }
        }
    }
}

impl DoubleEndedIterator for BTreeLeafPageIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            self.reverse_cursor -= 1;
            if self.reverse_cursor < 0 {
                return None;
            }

            let cursor = self.reverse_cursor as usize;
            if self.page.is_slot_used(cursor) {
                return self.page.get_entry(cursor);
            }
        }
    }
}

pub struct BTreeLeafPageIteratorRc {
    page: Pod<BTreeLeafPage>,
    cursor: i32,
    reverse_cursor: i32,
}

impl BTreeLeafPageIteratorRc {
    pub fn new(page: Pod<BTreeLeafPage>) -> Self {
        let slot_count = page.rl().get_slots_count();
        Self {
            page,
            cursor: -1,
            reverse_cursor: slot_count as i32,
        }
    }
}

impl Iterator for BTreeLeafPageIteratorRc {
    type Item = IndexEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let page = self.page.rl();
        loop {
            self.cursor += 1;
            let cursor = self.cursor as usize;
            if cursor >= page.slot_count {
                return None;
            }

            if page.is_slot_used(cursor) {
                return page.get_entry(cursor);
            }
        }
    }
}

impl DoubleEndedIterator for BTreeLeafPageIteratorRc {
    fn next_back(&mut self) -> Option<Self::Item> {
        let page = self.page.rl();
        loop {
            self.reverse_cursor -= 1;
            if self.reverse_cursor < 0 {
                return None;
            }

            let cursor = self.reverse_cursor as usize;
            if page.is_slot_used(cursor) {
                return page.get_entry(cursor);
            }
        }
    }
}
