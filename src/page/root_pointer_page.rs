use std::io::Cursor;

use crate::{
    buffer_pool::BufferPool,
    io::{read_into, ByteWriter},
    storage::schema::Schema,
    transaction::Transaction,
};

use super::{BasePage, BTreePage, Page, PageCategory, PageId, EMPTY_PAGE_INDEX};

/// The page at index 0 of every B+Tree file: it records where the root
/// lives, what kind the root is, and the head of the header-page chain
/// (the empty-page list).
pub struct BTreeRootPointerPage {
    base: BasePage,

    root_page_index: u32,
    root_category: PageCategory,

    // page index 0 means there are no header pages yet
    header_page_index: u32,
}

impl BTreeRootPointerPage {
    pub fn get_root_pid(&self) -> PageId {
        PageId::new(
            self.root_category,
            self.get_pid().table_id,
            self.root_page_index,
        )
    }

    pub fn set_root_pid(&mut self, pid: &PageId) {
        self.root_page_index = pid.page_index;
        self.root_category = pid.category;
    }

    /// The id of the first header page, if any.
    pub fn get_header_pid(&self) -> Option<PageId> {
        if self.header_page_index == EMPTY_PAGE_INDEX {
            return None;
        }
        Some(PageId::new(
            PageCategory::Header,
            self.get_pid().table_id,
            self.header_page_index,
        ))
    }

    pub fn set_header_pid(&mut self, pid: &PageId) {
        self.header_page_index = pid.page_index;
    }

    /// The on-disk image of a root pointer of a fresh file: the root is the
    /// leaf page at index 1, no header pages.
    pub fn init_page_data() -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write(&1_u32);
        writer.write_bytes(&[PageCategory::Leaf.to_byte()]);
        writer.write(&(EMPTY_PAGE_INDEX as u32));
        writer.to_padded_bytes(BufferPool::get_page_size())
    }
}

impl Page for BTreeRootPointerPage {
    fn get_pid(&self) -> PageId {
        self.base.get_pid()
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write(&self.root_page_index);
        writer.write_bytes(&[self.root_category.to_byte()]);
        writer.write(&self.header_page_index);
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

impl BTreePage for BTreeRootPointerPage {
    fn new(pid: &PageId, bytes: &[u8], _schema: &Schema, _key_field: usize) -> Self {
        let mut reader = Cursor::new(bytes);
        let root_page_index: u32 = read_into(&mut reader);
        let kind: u8 = read_into(&mut reader);
        let header_page_index: u32 = read_into(&mut reader);

        Self {
            base: BasePage::new(pid),
            root_page_index,
            root_category: PageCategory::from_byte(kind),
            header_page_index,
        }
    }

    fn get_parent_pid(&self) -> PageId {
        panic!("the root pointer page has no parent");
    }

    fn set_parent_pid(&mut self, _pid: &PageId) {
        panic!("the root pointer page has no parent");
    }
}
