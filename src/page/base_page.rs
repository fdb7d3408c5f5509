use crate::transaction::Transaction;

use super::{PageCategory, PageId, EMPTY_PAGE_INDEX};

/// State shared by every page kind: the page id, the dirty flag (with the
/// transaction that dirtied the page), and the before-image used for undo on
/// abort.
pub struct BasePage {
    pid: PageId,

    dirtier: Option<Transaction>,

    // the serialized content of the page at the moment the current
    // transaction epoch first observed it
    old_data: Vec<u8>,
}

impl BasePage {
    pub fn new(pid: &PageId) -> Self {
        Self {
            pid: *pid,
            dirtier: None,
            old_data: Vec::new(),
        }
    }

    pub fn get_pid(&self) -> PageId {
        self.pid
    }

    pub fn set_dirty(&mut self, tx: Option<Transaction>) {
        self.dirtier = tx;
    }

    pub fn get_dirtier(&self) -> Option<Transaction> {
        self.dirtier.clone()
    }

    pub fn set_old_data(&mut self, data: Vec<u8>) {
        self.old_data = data;
    }

    pub fn get_old_data(&self) -> Vec<u8> {
        self.old_data.clone()
    }
}

/// Base of the B+Tree page kinds, adds the parent pointer.
pub struct BTreeBasePage {
    base: BasePage,

    parent_page_index: u32,
}

impl std::ops::Deref for BTreeBasePage {
    type Target = BasePage;
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl std::ops::DerefMut for BTreeBasePage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl BTreeBasePage {
    pub fn new(pid: &PageId) -> Self {
        Self {
            base: BasePage::new(pid),
            parent_page_index: EMPTY_PAGE_INDEX,
        }
    }

    /// Parent page index 0 means the parent is the root pointer page, i.e.
    /// this page is the root of the tree.
    pub fn get_parent_pid(&self) -> PageId {
        let category = if self.parent_page_index == EMPTY_PAGE_INDEX {
            PageCategory::RootPointer
        } else {
            PageCategory::Internal
        };
        PageId::new(
            category,
            self.base.get_pid().table_id,
            self.parent_page_index,
        )
    }

    pub fn set_parent_pid(&mut self, pid: &PageId) {
        self.parent_page_index = pid.page_index;
    }

    pub fn get_parent_page_index(&self) -> u32 {
        self.parent_page_index
    }

    pub fn set_parent_page_index(&mut self, index: u32) {
        self.parent_page_index = index;
    }
}
