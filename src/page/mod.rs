mod base_page;
mod header_page;
mod heap_page;
mod internal_page;
mod leaf_page;
mod page_id;
mod root_pointer_page;

pub use base_page::{BTreeBasePage, BasePage};
pub use header_page::BTreeHeaderPage;
pub use heap_page::{HeapPage, HeapPageIterator};
pub use internal_page::{BTreeInternalPage, BTreeInternalPageIterator, Entry};
pub use leaf_page::{
    BTreeLeafPage, BTreeLeafPageIterator, BTreeLeafPageIteratorRc, IndexEntry,
};
pub use page_id::{PageCategory, PageId, EMPTY_PAGE_INDEX};
pub use root_pointer_page::BTreeRootPointerPage;

use crate::{
    buffer_pool::BufferPool, storage::schema::Schema, transaction::Transaction,
    types::Pod, utils::HandyRwLock,
};

/// The capability set every page kind provides: identity, the dirty flag
/// with its owning transaction, the before-image snapshot, and a codec to
/// exactly one page worth of bytes.
pub trait Page {
    fn get_pid(&self) -> PageId;

    /// Serialize to exactly PAGE_SIZE bytes.
    fn get_page_data(&self) -> Vec<u8>;

    fn get_before_image(&self) -> Vec<u8>;

    /// Snapshot the current content as the new before-image.
    fn set_before_image(&mut self);

    fn set_dirty(&mut self, tx: Option<Transaction>);

    fn get_dirtier(&self) -> Option<Transaction>;
}

/// Extra capabilities of the B+Tree page kinds: a uniform constructor (used
/// by the buffer pool to load any tree page) and the parent pointer.
pub trait BTreePage: Page {
    fn new(pid: &PageId, bytes: &[u8], schema: &Schema, key_field: usize) -> Self;

    fn get_parent_pid(&self) -> PageId;

    fn set_parent_pid(&mut self, pid: &PageId);
}

pub fn empty_page_data() -> Vec<u8> {
    vec![0; BufferPool::get_page_size()]
}

macro_rules! dispatch {
    ($self:ident, $p:ident => $body:expr) => {
        match $self {
            PagePod::Heap($p) => $body,
            PagePod::Leaf($p) => $body,
            PagePod::Internal($p) => $body,
            PagePod::RootPointer($p) => $body,
            PagePod::Header($p) => $body,
        }
    };
}

/// The sum of the shared-page handles the buffer pool stores. Pages refer to
/// each other by id only; this enum is the single place live page objects
/// are kept.
#[derive(Clone)]
pub enum PagePod {
    Heap(Pod<HeapPage>),
    Leaf(Pod<BTreeLeafPage>),
    Internal(Pod<BTreeInternalPage>),
    RootPointer(Pod<BTreeRootPointerPage>),
    Header(Pod<BTreeHeaderPage>),
}

impl PagePod {
    pub fn get_pid(&self) -> PageId {
        dispatch!(self, p => p.rl().get_pid())
    }

    pub fn get_page_data(&self) -> Vec<u8> {
        dispatch!(self, p => p.rl().get_page_data())
    }

    pub fn get_before_image(&self) -> Vec<u8> {
        dispatch!(self, p => p.rl().get_before_image())
    }

    pub fn set_before_image(&self) {
        dispatch!(self, p => p.wl().set_before_image())
    }

    pub fn set_dirty(&self, tx: Option<Transaction>) {
        dispatch!(self, p => p.wl().set_dirty(tx))
    }

    pub fn get_dirtier(&self) -> Option<Transaction> {
        dispatch!(self, p => p.rl().get_dirtier())
    }
}
