use std::{
    cmp,
    sync::{Arc, RwLock},
};

use log::debug;

use crate::{
    buffer_pool::DirtyPages,
    concurrent_status::Permission,
    database::Database,
    error::DbError,
    page::{
        BTreeInternalPage, BTreeInternalPageIterator, BTreeLeafPage, BTreeLeafPageIterator,
        BTreePage, Entry, IndexEntry, Page, PageCategory, PageId,
    },
    storage::tuple::Tuple,
    transaction::Transaction,
    types::DbResult,
    utils::HandyRwLock,
};

use super::table::{BTreeTable, SearchFor};

/// delete-related methods
impl BTreeTable {
    /// Remove an entry from the index. May cause pages to redistribute or
    /// merge if they drop below minimum occupancy.
    ///
    /// Returns the pages dirtied by the operation.
    pub fn delete_entry(
        &self,
        tx: &Transaction,
        entry: &IndexEntry,
    ) -> Result<DirtyPages, DbError> {
        let mut dirty = DirtyPages::new();

        let root_pid = self.get_root_pid(tx, &mut dirty, Permission::ReadWrite)?;
        let mut leaf_rc = self.find_leaf_page(
            tx,
            &mut dirty,
            Permission::ReadWrite,
            root_pid,
            &SearchFor::Key(entry.get_key()),
        )?;

        // locate the entry, walking right while duplicates of the key may
        // span further leaves
        loop {
            let found_slot = {
                let leaf = leaf_rc.rl();
                BTreeLeafPageIterator::new(&leaf)
                    .find(|e| e == entry)
                    .map(|e| e.get_slot())
            };
            if let Some(slot) = found_slot {
                leaf_rc.wl().delete_entry(slot);
                break;
            }

            let next_pid = {
                let leaf = leaf_rc.rl();
                let past = BTreeLeafPageIterator::new(&leaf)
                    .next_back()
                    .map(|e| e.get_key() > entry.get_key())
                    .unwrap_or(false);
                if past {
                    None
                } else {
                    leaf.get_right_pid()
                }
            };
            match next_pid {
                Some(pid) => {
                    leaf_rc = self.get_leaf_page(tx, &mut dirty, Permission::ReadWrite, &pid)?;
                }
                None => {
                    return Err(DbError::SlotEmpty(format!(
                        "entry {} not found in the index",
                        entry
                    )))
                }
            }
        }

        if !leaf_rc.rl().stable() {
            self.handle_unstable_leaf_page(tx, &mut dirty, leaf_rc)?;
        }
        Ok(dirty)
    }

    /// Remove the entry derived from the tuple: the key from the key field,
    /// the record id from the tuple's on-disk location.
    pub fn delete_tuple(
        &self,
        tx: &Transaction,
        tuple: &mut Tuple,
    ) -> Result<DirtyPages, DbError> {
        let record_id = tuple.get_record_id().ok_or_else(|| {
            DbError::SlotEmpty("cannot unindex a tuple without a record id".to_string())
        })?;
        let entry = IndexEntry::new(tuple.get_cell(self.key_field), record_id);
        self.delete_entry(tx, &entry)
    }

    /// Both siblings of a page under the same parent, found through the
    /// parent's entries.
    fn internal_siblings(
        parent: &BTreeInternalPage,
        pid: &PageId,
    ) -> (Option<PageId>, Option<PageId>) {
        let mut left = None;
        let mut right = None;
        for e in BTreeInternalPageIterator::new(parent) {
            if e.get_right_child() == *pid {
                left = Some(e.get_left_child());
            }
            if e.get_left_child() == *pid {
                right = Some(e.get_right_child());
            }
        }
        (left, right)
    }

    /// Handle a leaf page which dropped below minimum occupancy: steal
    /// entries from a sibling when it has entries to spare, merge with it
    /// otherwise. The left sibling is preferred.
    fn handle_unstable_leaf_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        page_rc: Arc<RwLock<BTreeLeafPage>>,
    ) -> DbResult {
        let parent_pid = page_rc.rl().get_parent_pid();
        if parent_pid.category == PageCategory::RootPointer {
            return Ok(());
        }

        let parent_rc = self.get_internal_page(tx, dirty, Permission::ReadWrite, &parent_pid)?;
        let pid = page_rc.rl().get_pid();
        let (left_pid, right_pid) = {
            let parent = parent_rc.rl();
            Self::internal_siblings(&parent, &pid)
        };

        if let Some(left_pid) = left_pid {
            let left_rc = self.get_leaf_page(tx, dirty, Permission::ReadWrite, &left_pid)?;
            self.balancing_two_leaf_pages(tx, dirty, parent_rc, left_rc, page_rc)
        } else if let Some(right_pid) = right_pid {
            let right_rc = self.get_leaf_page(tx, dirty, Permission::ReadWrite, &right_pid)?;
            self.balancing_two_leaf_pages(tx, dirty, parent_rc, page_rc, right_rc)
        } else {
            Err(DbError::Internal(format!(
                "page {} has no sibling under its parent",
                pid
            )))
        }
    }

    /// Same as `handle_unstable_leaf_page`, for an internal page.
    fn handle_unstable_internal_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        page_rc: Arc<RwLock<BTreeInternalPage>>,
    ) -> DbResult {
        let parent_pid = page_rc.rl().get_parent_pid();
        if parent_pid.category == PageCategory::RootPointer {
            return Ok(());
        }

        let parent_rc = self.get_internal_page(tx, dirty, Permission::ReadWrite, &parent_pid)?;
        let pid = page_rc.rl().get_pid();
        let (left_pid, right_pid) = {
            let parent = parent_rc.rl();
            Self::internal_siblings(&parent, &pid)
        };

        if let Some(left_pid) = left_pid {
            let left_rc = self.get_internal_page(tx, dirty, Permission::ReadWrite, &left_pid)?;
            self.balancing_two_internal_pages(tx, dirty, parent_rc, left_rc, page_rc)
        } else if let Some(right_pid) = right_pid {
            let right_rc = self.get_internal_page(tx, dirty, Permission::ReadWrite, &right_pid)?;
            self.balancing_two_internal_pages(tx, dirty, parent_rc, page_rc, right_rc)
        } else {
            Err(DbError::Internal(format!(
                "page {} has no sibling under its parent",
                pid
            )))
        }
    }

    /// Merge the two leaves when their entries fit one page, steal entries
    /// so both reach minimum occupancy otherwise. The parent separator is
    /// updated to the smallest key of the right page.
    fn balancing_two_leaf_pages(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        parent_rc: Arc<RwLock<BTreeInternalPage>>,
        left_rc: Arc<RwLock<BTreeLeafPage>>,
        right_rc: Arc<RwLock<BTreeLeafPage>>,
    ) -> DbResult {
        let mut entry = {
            let parent = parent_rc.rl();
            parent
                .get_entry_by_children(&left_rc.rl().get_pid(), &right_rc.rl().get_pid())
                .ok_or_else(|| {
                    DbError::internal("no parent entry covers the two leaf pages")
                })?
        };

        let left_count = left_rc.rl().entries_count();
        let right_count = right_rc.rl().entries_count();
        if left_count + right_count <= left_rc.rl().get_slots_count() {
            return self.merge_leaf_page(tx, dirty, left_rc, right_rc, parent_rc, &entry);
        }

        let move_count =
            (left_count + right_count) / 2 - cmp::min(left_count, right_count);
        if move_count == 0 {
            return self.merge_leaf_page(tx, dirty, left_rc, right_rc, parent_rc, &entry);
        }

        let new_key;
        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            if left_count < right_count {
                // steal the smallest entries of the right page
                let moved: Vec<IndexEntry> =
                    BTreeLeafPageIterator::new(&right).take(move_count).collect();
                for e in &moved {
                    left.insert_entry(e)?;
                }
                for e in &moved {
                    right.delete_entry(e.get_slot());
                }
            } else {
                // steal the largest entries of the left page
                let moved: Vec<IndexEntry> = BTreeLeafPageIterator::new(&left)
                    .rev()
                    .take(move_count)
                    .collect();
                for e in &moved {
                    right.insert_entry(e)?;
                }
                for e in &moved {
                    left.delete_entry(e.get_slot());
                }
            }

            new_key = match BTreeLeafPageIterator::new(&right).next() {
                Some(e) => e.get_key(),
                None => return Err(DbError::internal("redistribution emptied a page")),
            };
        }
        // release the left and right page

        entry.set_key(new_key);
        parent_rc.wl().update_entry(&entry);
        Ok(())
    }

    /// Concatenate the right leaf into the left one, unlink it from the
    /// sibling chain, return it to the free list, and delete the obsolete
    /// parent entry.
    fn merge_leaf_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        left_rc: Arc<RwLock<BTreeLeafPage>>,
        right_rc: Arc<RwLock<BTreeLeafPage>>,
        parent_rc: Arc<RwLock<BTreeInternalPage>>,
        entry: &Entry,
    ) -> DbResult {
        let right_pid;
        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            let moved: Vec<IndexEntry> = BTreeLeafPageIterator::new(&right).collect();
            for e in &moved {
                left.insert_entry(e)?;
            }
            for e in &moved {
                right.delete_entry(e.get_slot());
            }

            // unlink the right page from the sibling chain
            left.set_right_pid(right.get_right_pid());
            if let Some(new_right_pid) = right.get_right_pid() {
                let new_right_rc =
                    self.get_leaf_page(tx, dirty, Permission::ReadWrite, &new_right_pid)?;
                new_right_rc.wl().set_left_pid(Some(left.get_pid()));
            }

            right_pid = right.get_pid();
        }
        // release the left and right page

        self.set_empty_page(tx, dirty, &right_pid)?;
        self.delete_parent_entry(tx, dirty, left_rc, parent_rc, entry)
    }

    /// Merge the two internal pages when their children fit one page, steal
    /// entries otherwise. Keys rotate through the parent: the old separator
    /// is pulled down into the receiving side and the last stolen key is
    /// pushed up as the new separator.
    fn balancing_two_internal_pages(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        parent_rc: Arc<RwLock<BTreeInternalPage>>,
        left_rc: Arc<RwLock<BTreeInternalPage>>,
        right_rc: Arc<RwLock<BTreeInternalPage>>,
    ) -> DbResult {
        let mut entry = {
            let parent = parent_rc.rl();
            parent
                .get_entry_by_children(&left_rc.rl().get_pid(), &right_rc.rl().get_pid())
                .ok_or_else(|| {
                    DbError::internal("no parent entry covers the two internal pages")
                })?
        };

        let left_children = left_rc.rl().children_count();
        let right_children = right_rc.rl().children_count();
        if left_children + right_children <= left_rc.rl().get_children_capacity() {
            return self.merge_internal_page(tx, dirty, left_rc, right_rc, parent_rc, &entry);
        }

        let move_count = (left_children + right_children) / 2
            - cmp::min(left_children, right_children);
        if move_count == 0 {
            return Ok(());
        }

        let mut middle_key = entry.get_key();
        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            if left_children < right_children {
                // rotate the smallest entries of the right page through the
                // parent key
                let moved: Vec<Entry> = BTreeInternalPageIterator::new(&right)
                    .take(move_count)
                    .collect();
                let mut edge_child = left.get_last_child_pid();
                for e in &moved {
                    let new_entry =
                        Entry::new(middle_key.clone(), &edge_child, &e.get_left_child());
                    left.insert_entry(&new_entry)?;
                    self.set_parent(tx, dirty, &e.get_left_child(), &left.get_pid())?;
                    middle_key = e.get_key();
                    edge_child = e.get_left_child();
                }
                for e in &moved {
                    right.delete_key_and_left_child(e.get_record_id());
                }
            } else {
                // rotate the largest entries of the left page through the
                // parent key
                let moved: Vec<Entry> = BTreeInternalPageIterator::new(&left)
                    .rev()
                    .take(move_count)
                    .collect();
                let mut edge_child = right.get_first_child_pid();
                for e in &moved {
                    let new_entry =
                        Entry::new(middle_key.clone(), &e.get_right_child(), &edge_child);
                    right.insert_entry(&new_entry)?;
                    self.set_parent(tx, dirty, &e.get_right_child(), &right.get_pid())?;
                    middle_key = e.get_key();
                    edge_child = e.get_right_child();
                }
                for e in &moved {
                    left.delete_key_and_right_child(e.get_record_id());
                }
            }
        }
        // release the left and right page

        entry.set_key(middle_key);
        parent_rc.wl().update_entry(&entry);
        Ok(())
    }

    /// Concatenate the right internal page into the left one, pulling the
    /// parent separator down between them, then return the emptied page to
    /// the free list and delete the obsolete parent entry.
    fn merge_internal_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        left_rc: Arc<RwLock<BTreeInternalPage>>,
        right_rc: Arc<RwLock<BTreeInternalPage>>,
        parent_rc: Arc<RwLock<BTreeInternalPage>>,
        entry: &Entry,
    ) -> DbResult {
        let right_pid;
        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            // pull the separator down between the two pages
            let edge = Entry::new(
                entry.get_key(),
                &left.get_last_child_pid(),
                &right.get_first_child_pid(),
            );
            self.set_parent(tx, dirty, &right.get_first_child_pid(), &left.get_pid())?;
            left.insert_entry(&edge)?;

            let moved: Vec<Entry> = BTreeInternalPageIterator::new(&right).collect();
            for e in &moved {
                left.insert_entry(e)?;
                self.set_parent(tx, dirty, &e.get_right_child(), &left.get_pid())?;
            }
            for e in &moved {
                right.delete_key_and_right_child(e.get_record_id());
            }

            right_pid = right.get_pid();
        }
        // release the left and right page

        self.set_empty_page(tx, dirty, &right_pid)?;
        self.delete_parent_entry(tx, dirty, left_rc, parent_rc, entry)
    }

    /// Delete an entry (the key and its right child) from a parent node.
    ///
    /// A parent left without keys was the root: its one remaining child is
    /// promoted as the new root. A parent below minimum occupancy is
    /// rebalanced in turn.
    fn delete_parent_entry<PAGE: BTreePage>(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        left_rc: Arc<RwLock<PAGE>>,
        parent_rc: Arc<RwLock<BTreeInternalPage>>,
        entry: &Entry,
    ) -> DbResult {
        // hold the parent and the left page
        {
            let mut parent = parent_rc.wl();
            let mut left = left_rc.wl();

            parent.delete_key_and_right_child(entry.get_record_id());

            if parent.entries_count() == 0 {
                // the parent was the root, its single child becomes the new
                // root
                let root_ptr_rc = self.get_root_ptr_page(tx, dirty, Permission::ReadWrite)?;
                {
                    let mut root_ptr = root_ptr_rc.wl();
                    left.set_parent_pid(&root_ptr.get_pid());
                    root_ptr.set_root_pid(&left.get_pid());
                }
                debug!("root collapsed into {}", left.get_pid());

                let parent_pid = parent.get_pid();
                drop(parent);
                drop(left);
                return self.set_empty_page(tx, dirty, &parent_pid);
            }

            if parent.stable() {
                return Ok(());
            }
        }
        // release the parent and the left page

        self.handle_unstable_internal_page(tx, dirty, parent_rc)
    }

    /// Return a page to this file's free list: discard it from the buffer
    /// pool and clear its bit in the covering header page, creating or
    /// extending the header chain when needed.
    pub(crate) fn set_empty_page(
        &self,
        tx: &Transaction,
        dirty: &mut DirtyPages,
        pid: &PageId,
    ) -> DbResult {
        Database::buffer_pool().discard_page(pid);
        dirty.remove(pid);

        let root_ptr_rc = self.get_root_ptr_page(tx, dirty, Permission::ReadWrite)?;

        let mut offset: u32 = 0;
        let header_rc = match root_ptr_rc.rl().get_header_pid() {
            Some(first_pid) => {
                let mut header_pid = first_pid;
                loop {
                    let rc = self.get_header_page(tx, dirty, Permission::ReadWrite, &header_pid)?;
                    let slots = rc.rl().get_slots_count() as u32;
                    if pid.page_index < offset + slots {
                        break rc;
                    }
                    let next = rc.rl().get_next_pid();
                    match next {
                        Some(next) => {
                            offset += slots;
                            header_pid = next;
                        }
                        None => {
                            let fresh = self.get_empty_header_page(tx, dirty)?;
                            let fresh_pid = fresh.rl().get_pid();
                            rc.wl().set_next_pid(Some(fresh_pid));
                            offset += slots;
                            header_pid = fresh_pid;
                        }
                    }
                }
            }
            None => {
                let fresh = self.get_empty_header_page(tx, dirty)?;
                let fresh_pid = fresh.rl().get_pid();
                root_ptr_rc.wl().set_header_pid(&fresh_pid);
                fresh
            }
        };

        header_rc
            .wl()
            .mark_slot_status((pid.page_index - offset) as usize, false);
        debug!("page {} returned to the free list", pid);
        Ok(())
    }
}
