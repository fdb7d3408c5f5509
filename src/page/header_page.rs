use std::io::Cursor;

use bit_vec::BitVec;

use crate::{
    btree::consts::INDEX_SIZE,
    buffer_pool::BufferPool,
    io::{read_bitmap, read_into, write_bitmap, ByteWriter},
    storage::schema::Schema,
    transaction::Transaction,
};

use super::{BasePage, BTreePage, Page, PageCategory, PageId, EMPTY_PAGE_INDEX};

/// Tracks which pages of a B+Tree file are allocated (bit set) or free for
/// reuse (bit clear). Header pages chain through a next pointer; header
/// page number k in the chain covers page indexes [k*slots, (k+1)*slots).
pub struct BTreeHeaderPage {
    base: BasePage,

    // page index 0 means no next header page
    next_page_index: u32,

    // bit set = the page is allocated
    header: BitVec,

    slot_count: usize,
}

impl BTreeHeaderPage {
    pub fn calculate_slots_count() -> usize {
        (BufferPool::get_page_size() - INDEX_SIZE) * 8
    }

    /// A fresh header page considers every page it covers allocated; slots
    /// are cleared one by one as pages are returned to the free list.
    pub fn new_empty(pid: &PageId) -> Self {
        let slot_count = Self::calculate_slots_count();
        Self {
            base: BasePage::new(pid),
            next_page_index: EMPTY_PAGE_INDEX,
            header: BitVec::from_elem(slot_count, true),
            slot_count,
        }
    }

    pub fn get_slots_count(&self) -> usize {
        self.slot_count
    }

    pub fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    /// The first free slot, if any.
    pub fn get_empty_slot(&self) -> Option<u32> {
        (0..self.slot_count)
            .find(|i| !self.header[*i])
            .map(|i| i as u32)
    }

    pub fn get_next_pid(&self) -> Option<PageId> {
        if self.next_page_index == EMPTY_PAGE_INDEX {
            return None;
        }
        Some(PageId::new(
            PageCategory::Header,
            self.get_pid().table_id,
            self.next_page_index,
        ))
    }

    pub fn set_next_pid(&mut self, pid: Option<PageId>) {
        self.next_page_index = match pid {
            Some(pid) => pid.page_index,
            None => EMPTY_PAGE_INDEX,
        };
    }
}

impl Page for BTreeHeaderPage {
    fn get_pid(&self) -> PageId {
        self.base.get_pid()
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write(&self.next_page_index);
        write_bitmap(&mut writer, &self.header);
        writer.to_padded_bytes(BufferPool::get_page_size())
    }

    fn get_before_image(&self) -> Vec<u8> {
        self.base.get_old_data()
    }

    fn set_before_image(&mut self) {
        let data = self.get_page_data();
        self.base.set_old_data(data);
    }

    fn set_dirty(&mut self, tx: Option<Transaction>) {
        self.base.set_dirty(tx);
    }

    fn get_dirtier(&self) -> Option<Transaction> {
        self.base.get_dirtier()
    }
}

impl BTreePage for BTreeHeaderPage {
    fn new(pid: &PageId, bytes: &[u8], _schema: &Schema, _key_field: usize) -> Self {
        let slot_count = Self::calculate_slots_count();
        let mut reader = Cursor::new(bytes);
        let next_page_index: u32 = read_into(&mut reader);
        let header = read_bitmap(&mut reader, slot_count);

        Self {
            base: BasePage::new(pid),
            next_page_index,
            header,
            slot_count,
        }
    }

    fn get_parent_pid(&self) -> PageId {
        PageId::new(PageCategory::RootPointer, self.get_pid().table_id, 0)
    }

    fn set_parent_pid(&mut self, _pid: &PageId) {
        panic!("header pages have no parent");
    }
}
