use std::io::Cursor;

use bit_vec::BitVec;

use crate::{
    buffer_pool::BufferPool,
    error::DbError,
    io::{read_bitmap, write_bitmap, ByteWriter, Encodeable},
    storage::{
        schema::Schema,
        tuple::{RecordId, Tuple},
    },
    transaction::Transaction,
    types::{DbResult, Pod},
    utils::{ceil_div, HandyRwLock},
};

use super::{BasePage, Page, PageId};

/// A slotted heap page: an occupancy bitmap (one bit per slot) followed by
/// fixed-size tuple slots.
pub struct HeapPage {
    base: BasePage,

    schema: Schema,

    slot_count: usize,

    // indicate slots' status: true means occupied, false means empty
    header: BitVec,

    // all slots, including the empty ones
    tuples: Vec<Tuple>,
}

impl HeapPage {
    pub fn new(pid: &PageId, bytes: &[u8], schema: &Schema) -> Self {
        let slot_count = Self::calculate_slots_count(schema);
        let mut reader = Cursor::new(bytes);
        let header = read_bitmap(&mut reader, slot_count);

        let mut tuples = Vec::with_capacity(slot_count);
        for i in 0..slot_count {
            let mut tuple = Tuple::read_from(&mut reader, schema);
            if header[i] {
                tuple.set_record_id(Some(RecordId::new(*pid, i as u32)));
            }
            tuples.push(tuple);
        }

        Self {
            base: BasePage::new(pid),
            schema: schema.clone(),
            slot_count,
            header,
            tuples,
        }
    }

    /// The maximum number of tuples this page can hold.
    pub fn calculate_slots_count(schema: &Schema) -> usize {
        let bits_per_tuple_including_header = schema.get_size() * 8 + 1;
        BufferPool::get_page_size() * 8 / bits_per_tuple_including_header
    }

    pub fn calculate_header_size(slot_count: usize) -> usize {
        ceil_div(slot_count, 8)
    }

    pub fn get_slots_count(&self) -> usize {
        self.slot_count
    }

    pub fn empty_slots_count(&self) -> usize {
        (0..self.slot_count)
            .filter(|i| !self.is_slot_used(*i))
            .count()
    }

    /// The number of tuples currently stored on this page.
    pub fn tuples_count(&self) -> usize {
        self.slot_count - self.empty_slots_count()
    }

    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    pub fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    /// Insert the tuple into the lowest-index empty slot and stamp its
    /// record id with this page and that slot.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> DbResult {
        if tuple.get_schema() != &self.schema {
            return Err(DbError::SchemaMismatch(format!(
                "tuple schema does not match the page schema, page: {}",
                self.get_pid()
            )));
        }

        let slot = (0..self.slot_count)
            .find(|i| !self.is_slot_used(*i))
            .ok_or(DbError::PageFull)?;

        tuple.set_record_id(Some(RecordId::new(self.get_pid(), slot as u32)));
        self.tuples[slot] = tuple.clone();
        self.mark_slot_status(slot, true);
        Ok(())
    }

    /// Delete the tuple from this page. The tuple's record id must reference
    /// this page and an occupied slot; the record id is cleared on success.
    pub fn delete_tuple(&mut self, tuple: &mut Tuple) -> DbResult {
        let record_id = tuple.get_record_id().ok_or_else(|| {
            DbError::SlotEmpty("tuple has no record id".to_string())
        })?;

        if record_id.pid != self.get_pid() {
            return Err(DbError::SlotEmpty(format!(
                "record id references page {}, not {}",
                record_id.pid,
                self.get_pid()
            )));
        }

        let slot = record_id.slot as usize;
        if slot >= self.slot_count || !self.is_slot_used(slot) {
            return Err(DbError::SlotEmpty(format!(
                "slot {} of page {} is not marked used",
                slot,
                self.get_pid()
            )));
        }

        self.mark_slot_status(slot, false);
        tuple.set_record_id(None);
        Ok(())
    }

    pub fn get_tuple(&self, slot_index: usize) -> Option<Tuple> {
        if self.is_slot_used(slot_index) {
            return Some(self.tuples[slot_index].clone());
        }
        None
    }
}

impl Page for HeapPage {
    fn get_pid(&self) -> PageId {
        self.base.get_pid()
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        write_bitmap(&mut writer, &self.header);
        let tuple_size = self.schema.get_size();
        for i in 0..self.slot_count {
            if self.is_slot_used(i) {
                writer.write_bytes(&self.tuples[i].to_bytes());
            } else {
                writer.write_bytes(&vec![0; tuple_size]);
            }
        }
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

/// Enumerates the tuples of a page in slot-ascending order, skipping empty
/// slots.
pub struct HeapPageIterator {
    page: Pod<HeapPage>,
    cursor: i32,
}

impl HeapPageIterator {
    pub fn new(page: Pod<HeapPage>) -> Self {
        Self { page, cursor: -1 }
    }
}

impl Iterator for HeapPageIterator {
    type Item = Tuple;

    fn next(&mut self) -> Option<Self::Item> {
        let page = self.page.rl();
        loop {
            self.cursor += 1;
            let cursor = self.cursor as usize;
            if cursor >= page.slot_count {
                return None;
            }

            if page.is_slot_used(cursor) {
                return page.get_tuple(cursor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, RwLock};

    use crate::{
        page::{empty_page_data, PageCategory},
        storage::schema::int_schema,
    };

    use super::*;

    fn new_test_page(schema: &Schema) -> HeapPage {
        let pid = PageId::new(PageCategory::Heap, 1, 0);
        HeapPage::new(&pid, &empty_page_data(), schema)
    }

    #[test]
    fn test_page_round_trip() {
        let schema = int_schema(2, "t");
        let mut page = new_test_page(&schema);
        for i in 0..10 {
            let mut tuple = Tuple::new_int_tuple(i, 2);
            page.insert_tuple(&mut tuple).unwrap();
        }

        let data = page.get_page_data();
        assert_eq!(data.len(), BufferPool::get_page_size());

        let decoded = HeapPage::new(&page.get_pid(), &data, &schema);
        assert_eq!(decoded.tuples_count(), 10);
        assert_eq!(decoded.get_page_data(), data);
    }

    #[test]
    fn test_header_bits_match_iterator() {
        let schema = int_schema(1, "t");
        let mut page = new_test_page(&schema);
        for i in 0..17 {
            let mut tuple = Tuple::new_int_tuple(i, 1);
            page.insert_tuple(&mut tuple).unwrap();
        }

        // delete a few slots in the middle
        for slot in [3_usize, 7, 11].iter() {
            let mut tuple = page.get_tuple(*slot).unwrap();
            page.delete_tuple(&mut tuple).unwrap();
        }

        let used_bits = (0..page.get_slots_count())
            .filter(|i| page.is_slot_used(*i))
            .count();
        let pod = Arc::new(RwLock::new(page));
        let emitted = HeapPageIterator::new(pod).count();
        assert_eq!(used_bits, emitted);
        assert_eq!(emitted, 14);
    }

    #[test]
    fn test_insert_then_delete_restores_image() {
        let schema = int_schema(3, "t");
        let mut page = new_test_page(&schema);
        let before = page.get_page_data();

        let mut tuple = Tuple::new_int_tuple(99, 3);
        page.insert_tuple(&mut tuple).unwrap();
        assert_ne!(page.get_page_data(), before);

        page.delete_tuple(&mut tuple).unwrap();
        assert_eq!(page.get_page_data(), before);
        assert_eq!(tuple.get_record_id(), None);
    }

    #[test]
    fn test_insert_into_full_page() {
        let schema = int_schema(1, "t");
        let mut page = new_test_page(&schema);
        for i in 0..page.get_slots_count() {
            let mut tuple = Tuple::new_int_tuple(i as i32, 1);
            page.insert_tuple(&mut tuple).unwrap();
        }

        let mut extra = Tuple::new_int_tuple(-1, 1);
        match page.insert_tuple(&mut extra) {
            Err(DbError::PageFull) => {}
            other => panic!("expect PageFull, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_schema_mismatch() {
        let schema = int_schema(2, "t");
        let mut page = new_test_page(&schema);
        let mut tuple = Tuple::new_int_tuple(1, 3);
        assert!(page.insert_tuple(&mut tuple).is_err());
    }
}
