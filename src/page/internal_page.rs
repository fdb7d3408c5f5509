use std::{fmt, io::Cursor};

use bit_vec::BitVec;

use crate::{
    btree::consts::INDEX_SIZE,
    buffer_pool::BufferPool,
    error::DbError,
    io::{read_bitmap, read_into, write_bitmap, ByteWriter, Serializeable},
    storage::{
        schema::{get_type_length, Schema, Type},
        tuple::Cell,
    },
    transaction::Transaction,
    types::DbResult,
    utils::HandyRwLock,
};

use super::{BTreeBasePage, BTreePage, Page, PageCategory, PageId};

/// A B+Tree internal page: the parent pointer, a child-kind indicator, an
/// occupancy bitmap, and m separator keys partitioning m+1 children.
///
/// Slot 0 is reserved: it holds only the left-most child pointer, never a
/// key, since a node with m keys has m+1 children.
pub struct BTreeInternalPage {
    page: BTreeBasePage,

    slot_count: usize,

    // indicate slots' status: true means occupied, false means empty
    header: BitVec,

    keys: Vec<Cell>,

    /// Child page indexes. The left child of the entry in slot n is not
    /// always in slot n-1, but in the nearest lower slot which is marked
    /// used.
    children: Vec<u32>,

    key_type: Type,

    // the kind of all children, leaf or internal
    child_category: PageCategory,
}

impl std::ops::Deref for BTreeInternalPage {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl std::ops::DerefMut for BTreeInternalPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl BTreeInternalPage {
    /// The maximum number of entries (keys) this page can hold.
    pub fn get_max_entries(key_size: usize) -> usize {
        let bits_per_entry_including_header = key_size * 8 + INDEX_SIZE * 8 + 1;
        // extra bytes are the parent pointer, the child-kind byte, and one
        // extra child pointer (a node with m entries has m+1 children)
        let extra_bits = 2 * INDEX_SIZE * 8 + 8;
        (BufferPool::get_page_size() * 8 - extra_bits) / bits_per_entry_including_header
    }

    fn default_key(key_type: Type) -> Cell {
        match key_type {
            Type::Int => Cell::Int(0),
            Type::Char(_) => Cell::String(String::new()),
        }
    }

    pub fn get_slots_count(&self) -> usize {
        self.slot_count
    }

    pub fn get_entry_capacity(&self) -> usize {
        self.slot_count - 1
    }

    pub fn get_children_capacity(&self) -> usize {
        self.slot_count
    }

    pub fn empty_slots_count(&self) -> usize {
        // start from 1 because slot 0 never holds a key
        (1..self.slot_count)
            .filter(|i| !self.is_slot_used(*i))
            .count()
    }

    pub fn entries_count(&self) -> usize {
        self.slot_count - 1 - self.empty_slots_count()
    }

    pub fn children_count(&self) -> usize {
        self.entries_count() + 1
    }

    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    pub fn get_child_category(&self) -> PageCategory {
        self.child_category
    }

    /// Whether the page satisfies the minimum-occupancy rule. The rule is
    /// relaxed for the root.
    pub fn stable(&self) -> bool {
        if self.get_parent_pid().category == PageCategory::RootPointer {
            return true;
        }

        let max_empty_slots = self.get_entry_capacity() - self.get_entry_capacity() / 2;
        self.empty_slots_count() <= max_empty_slots
    }

    fn child_pid(&self, slot_index: usize) -> PageId {
        PageId::new(
            self.child_category,
            self.get_pid().table_id,
            self.children[slot_index],
        )
    }

    pub fn insert_entry(&mut self, e: &Entry) -> DbResult {
        if self.empty_slots_count() == 0 {
            return Err(DbError::PageFull);
        }

        self.child_category = e.get_left_child().category;

        // if this is the first entry, fill slots 0 and 1 and return
        if self.entries_count() == 0 {
            self.children[0] = e.get_left_child().page_index;
            self.children[1] = e.get_right_child().page_index;
            self.keys[1] = e.get_key();
            self.mark_slot_status(0, true);
            self.mark_slot_status(1, true);
            return Ok(());
        }

        // find the first empty slot, starting from 1
        let mut empty_slot: i32 = -1;
        for i in 1..self.slot_count {
            if !self.is_slot_used(i) {
                empty_slot = i as i32;
                break;
            }
        }

        // find the child pointer matching the left or right child of the new
        // entry
        let mut slot_just_ahead: i32 = -1;
        for i in 0..self.slot_count {
            if !self.is_slot_used(i) {
                continue;
            }

            if self.children[i] == e.get_left_child().page_index {
                // the new entry goes right after the current one
                slot_just_ahead = i as i32;
                break;
            }

            if self.children[i] == e.get_right_child().page_index {
                // the new entry splits the current one, so the current slot
                // keeps the new entry's left child
                slot_just_ahead = i as i32;
                self.children[i] = e.get_left_child().page_index;
                break;
            }
        }

        if slot_just_ahead == -1 {
            return Err(DbError::Internal(format!(
                "no slot found for entry {}, page: {}, entries count: {}",
                e,
                self.get_pid(),
                self.entries_count()
            )));
        }

        // shift entries back or forward to fill the empty slot and make room
        // for the new entry while keeping entries in sorted order
        let good_slot: usize;
        if empty_slot < slot_just_ahead {
            for i in empty_slot..slot_just_ahead {
                self.move_entry((i + 1) as usize, i as usize);
            }
            good_slot = slot_just_ahead as usize;
        } else {
            for i in ((slot_just_ahead + 1)..empty_slot).rev() {
                self.move_entry(i as usize, (i + 1) as usize);
            }
            good_slot = (slot_just_ahead + 1) as usize;
        }

        self.keys[good_slot] = e.get_key();
        self.children[good_slot] = e.get_right_child().page_index;
        self.mark_slot_status(good_slot, true);
        Ok(())
    }

    fn move_entry(&mut self, from: usize, to: usize) {
        if self.is_slot_used(from) && !self.is_slot_used(to) {
            self.keys[to] = self.keys[from].clone();

            // the left-child slot need not be touched, it is the nearest
            // *used* slot below, not the adjacent one
            self.children[to] = self.children[from];

            self.mark_slot_status(from, false);
            self.mark_slot_status(to, true);
        }
    }

    /// Delete the key in the given slot together with the child pointer on
    /// its right.
    pub fn delete_key_and_right_child(&mut self, record_id: usize) {
        self.mark_slot_status(record_id, false);
    }

    /// Delete the key in the given slot together with the child pointer on
    /// its left.
    pub fn delete_key_and_left_child(&mut self, record_id: usize) {
        for i in (0..record_id).rev() {
            if self.is_slot_used(i) {
                self.children[i] = self.children[record_id];
                self.mark_slot_status(record_id, false);
                return;
            }
        }
    }

    pub fn update_entry(&mut self, entry: &Entry) {
        let record_id = entry.get_record_id();

        // set left child
        for i in (0..record_id).rev() {
            if self.is_slot_used(i) {
                self.children[i] = entry.get_left_child().page_index;
                break;
            }
        }

        self.children[record_id] = entry.get_right_child().page_index;
        self.keys[record_id] = entry.get_key();
    }

    pub fn get_entry(&self, slot_index: usize) -> Option<Entry> {
        if slot_index == 0 || !self.is_slot_used(slot_index) {
            return None;
        }

        let mut left_slot = 0;
        for i in (0..slot_index).rev() {
            if self.is_slot_used(i) {
                left_slot = i;
                break;
            }
        }

        let mut e = Entry::new(
            self.keys[slot_index].clone(),
            &self.child_pid(left_slot),
            &self.child_pid(slot_index),
        );
        e.set_record_id(slot_index);
        Some(e)
    }

    /// The entry whose children match the given pair, if any.
    pub fn get_entry_by_children(
        &self,
        left_pid: &PageId,
        right_pid: &PageId,
    ) -> Option<Entry> {
        BTreeInternalPageIterator::new(self).find(|e| {
            e.get_left_child() == *left_pid && e.get_right_child() == *right_pid
        })
    }

    pub fn get_first_child_pid(&self) -> PageId {
        let mut it = BTreeInternalPageIterator::new(self);
        it.next().unwrap().get_left_child()
    }

    pub fn get_last_child_pid(&self) -> PageId {
        let mut it = BTreeInternalPageIterator::new(self);
        it.next_back().unwrap().get_right_child()
    }

    pub fn check_integrity(
        &self,
        parent_pid: &PageId,
        lower_bound: Option<Cell>,
        upper_bound: Option<Cell>,
        check_occupancy: bool,
        depth: usize,
    ) -> DbResult {
        if self.get_pid().category != PageCategory::Internal {
            return Err(DbError::internal("page category is not internal"));
        }
        if &self.get_parent_pid() != parent_pid {
            return Err(DbError::Internal(format!(
                "parent pointer of {} is {}, expect {}",
                self.get_pid(),
                self.get_parent_pid(),
                parent_pid
            )));
        }

        let mut previous = lower_bound;
        for e in BTreeInternalPageIterator::new(self) {
            if let Some(previous) = &previous {
                if previous > &e.get_key() {
                    return Err(DbError::Internal(format!(
                        "keys are not in order, previous: {:?}, current: {}",
                        previous, e
                    )));
                }
            }
            previous = Some(e.get_key());
        }

        if let (Some(upper), Some(previous)) = (&upper_bound, &previous) {
            if previous > upper {
                return Err(DbError::Internal(format!(
                    "the last key exceeds the upper bound, key: {:?}, bound: {:?}",
                    previous, upper
                )));
            }
        }

        if check_occupancy && depth > 0 {
            // the page may dip one entry below half full in the process of
            // splitting
            let minimal_stable = self.get_entry_capacity() / 2 - 1;
            if self.entries_count() < minimal_stable {
                return Err(DbError::Internal(format!(
                    "internal {} below minimum occupancy: {}/{}",
                    self.get_pid(),
                    self.entries_count(),
                    self.get_entry_capacity()
                )));
            }
        }

        Ok(())
    }
}

impl Page for BTreeInternalPage {
    fn get_pid(&self) -> PageId {
        self.page.get_pid()
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write(&self.page.get_parent_page_index());
        writer.write_bytes(&[self.child_category.to_byte()]);
        write_bitmap(&mut writer, &self.header);

        let key_size = get_type_length(self.key_type);
        for i in 1..self.slot_count {
            if self.is_slot_used(i) {
                self.keys[i].encode(&mut writer, &self.key_type);
            } else {
                writer.write_bytes(&vec![0; key_size]);
            }
        }
        for i in 0..self.slot_count {
            if self.is_slot_used(i) {
                writer.write(&self.children[i]);
            } else {
                writer.write(&0_u32);
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

impl BTreePage for BTreeInternalPage {
    fn new(pid: &PageId, bytes: &[u8], schema: &Schema, key_field: usize) -> Self {
        let key_type = schema.fields[key_field].field_type;
        let key_size = get_type_length(key_type);
        let slot_count = Self::get_max_entries(key_size) + 1;

        let mut reader = Cursor::new(bytes);
        let parent_page_index: u32 = read_into(&mut reader);
        let child_kind: u8 = read_into(&mut reader);
        let header = read_bitmap(&mut reader, slot_count);

        let mut keys = vec![Self::default_key(key_type)];
        for _ in 1..slot_count {
            keys.push(Cell::decode(&mut reader, &key_type));
        }
        let mut children = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            children.push(read_into::<u32, _>(&mut reader));
        }

        // an empty page carries no meaningful child kind
        let child_category = if header.any() {
            PageCategory::from_byte(child_kind)
        } else {
            PageCategory::Leaf
        };

        let mut page = BTreeBasePage::new(pid);
        page.set_parent_page_index(parent_page_index);

        Self {
            page,
            slot_count,
            header,
            keys,
            children,
            key_type,
            child_category,
        }
    }

    fn get_parent_pid(&self) -> PageId {
        self.page.get_parent_pid()
    }

    fn set_parent_pid(&mut self, pid: &PageId) {
        self.page.set_parent_pid(pid);
    }
}

/// A separator key together with its two adjacent children. Every key in
/// the left subtree is less than or equal to the key, every key in the
/// right subtree is greater than or equal to it.
#[derive(Clone)]
pub struct Entry {
    key: Cell,
    left: PageId,
    right: PageId,

    // position of the key in its page
    record_id: usize,
}

impl Entry {
    pub fn new(key: Cell, left: &PageId, right: &PageId) -> Self {
        Self {
            key,
            left: *left,
            right: *right,
            record_id: 0,
        }
    }

    pub fn get_key(&self) -> Cell {
        self.key.clone()
    }

    pub fn set_key(&mut self, key: Cell) {
        self.key = key;
    }

    pub fn get_left_child(&self) -> PageId {
        self.left
    }

    pub fn get_right_child(&self) -> PageId {
        self.right
    }

    pub fn get_record_id(&self) -> usize {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: usize) {
        self.record_id = record_id;
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:?}, {}, {})", self.key, self.left, self.right)
    }
}

pub struct BTreeInternalPageIterator<'page> {
    page: &'page BTreeInternalPage,

    cursor: usize,
    left_child_position: usize,

    reverse_cursor: usize,
    right_child_position: usize,
}

impl<'page> BTreeInternalPageIterator<'page> {
    pub fn new(page: &'page BTreeInternalPage) -> Self {
        let mut right_child_position = page.slot_count;
        loop {
            right_child_position -= 1;
            if right_child_position == 0 || page.is_slot_used(right_child_position) {
                break;
            }
        }

        Self {
            page,
            cursor: 0,
            left_child_position: 0,
            reverse_cursor: right_child_position,
            right_child_position,
        }
    }
}

impl Iterator for BTreeInternalPageIterator<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.cursor += 1;
            let cursor = self.cursor;
            if cursor >= self.page.slot_count {
                return None;
            }

            if !self.page.is_slot_used(cursor) {
                continue;
            }

            let mut e = Entry::new(
                self.page.keys[cursor].clone(),
                &self.page.child_pid(self.left_child_position),
                &self.page.child_pid(cursor),
            );
            e.set_record_id(cursor);

            // remember the left child for the next iteration
            self.left_child_position = cursor;

            return Some(e);
        }
    }
}

impl DoubleEndedIterator for BTreeInternalPageIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            let left_index = match self.reverse_cursor.checked_sub(1) {
                Some(v) => v,
                None => return None,
            };
            self.reverse_cursor = left_index;

            if self.right_child_position == 0 {
                return None;
            }
            if !self.page.is_slot_used(left_index) {
                continue;
            }

            let mut e = Entry::new(
                self.page.keys[self.right_child_position].clone(),
                &self.page.child_pid(left_index),
                &self.page.child_pid(self.right_child_position),
            );
            e.set_record_id(self.right_child_position);

            // remember the right child for the next iteration
            self.right_child_position = left_index;

            return Some(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{page::empty_page_data, storage::schema::int_schema};

    use super::*;

    fn leaf_pid(page_index: u32) -> PageId {
        PageId::new(PageCategory::Leaf, 1, page_index)
    }

    fn new_test_page() -> BTreeInternalPage {
        let schema = int_schema(2, "t");
        let pid = PageId::new(PageCategory::Internal, 1, 5);
        BTreeInternalPage::new(&pid, &empty_page_data(), &schema, 0)
    }

    #[test]
    fn test_insert_and_iterate() {
        let mut page = new_test_page();

        let e1 = Entry::new(Cell::Int(10), &leaf_pid(1), &leaf_pid(2));
        page.insert_entry(&e1).unwrap();
        let e2 = Entry::new(Cell::Int(20), &leaf_pid(2), &leaf_pid(3));
        page.insert_entry(&e2).unwrap();
        let e3 = Entry::new(Cell::Int(5), &leaf_pid(0), &leaf_pid(1));
        page.insert_entry(&e3).unwrap();

        let entries: Vec<Entry> = BTreeInternalPageIterator::new(&page).collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].get_key(), Cell::Int(5));
        assert_eq!(entries[1].get_key(), Cell::Int(10));
        assert_eq!(entries[2].get_key(), Cell::Int(20));

        // children chain: 0, 1, 2, 3
        assert_eq!(entries[0].get_left_child(), leaf_pid(0));
        assert_eq!(entries[0].get_right_child(), leaf_pid(1));
        assert_eq!(entries[2].get_left_child(), leaf_pid(2));
        assert_eq!(entries[2].get_right_child(), leaf_pid(3));

        assert_eq!(page.children_count(), 4);
        assert_eq!(page.get_first_child_pid(), leaf_pid(0));
        assert_eq!(page.get_last_child_pid(), leaf_pid(3));
    }

    #[test]
    fn test_internal_round_trip() {
        let mut page = new_test_page();
        for i in 0..10 {
            let e = Entry::new(
                Cell::Int(i * 10),
                &leaf_pid(i as u32 + 1),
                &leaf_pid(i as u32 + 2),
            );
            page.insert_entry(&e).unwrap();
        }

        let data = page.get_page_data();
        let schema = int_schema(2, "t");
        let decoded = BTreeInternalPage::new(&page.get_pid(), &data, &schema, 0);

        assert_eq!(decoded.entries_count(), 10);
        assert_eq!(decoded.get_child_category(), PageCategory::Leaf);
        assert_eq!(decoded.get_page_data(), data);
    }

    #[test]
    fn test_reverse_iterator() {
        let mut page = new_test_page();
        for i in 0..5 {
            let e = Entry::new(
                Cell::Int(i),
                &leaf_pid(i as u32 + 1),
                &leaf_pid(i as u32 + 2),
            );
            page.insert_entry(&e).unwrap();
        }

        let keys: Vec<Cell> = BTreeInternalPageIterator::new(&page)
            .rev()
            .map(|e| e.get_key())
            .collect();
        assert_eq!(
            keys,
            vec![
                Cell::Int(4),
                Cell::Int(3),
                Cell::Int(2),
                Cell::Int(1),
                Cell::Int(0)
            ]
        );
    }
}
