use crate::{
    concurrent_status::Permission,
    database::Database,
    page::{BTreeLeafPage, BTreeLeafPageIteratorRc, IndexEntry},
    predicate::{Op, Predicate},
    transaction::Transaction,
    types::Pod,
    utils::HandyRwLock,
};

use super::table::{BTreeTable, SearchFor};

use std::collections::HashMap;
use std::sync::Arc;

impl BTreeTable {
    /// Iterate every entry of the index in key order.
    pub fn get_iter<'t>(&self, tx: &'t Transaction) -> BTreeTableIterator<'t> {
        BTreeTableIterator::new(tx, self)
    }

    /// Iterate the entries satisfying the predicate over the key field.
    pub fn search<'t>(
        &self,
        tx: &'t Transaction,
        predicate: &Predicate,
    ) -> BTreeTableSearchIterator<'t> {
        BTreeTableSearchIterator::new(tx, self, predicate)
    }
}

/// Produces the index entries in key order by walking the leaf chain
/// through the right-sibling pointers.
pub struct BTreeTableIterator<'t> {
    tx: &'t Transaction,

    page_rc: Pod<BTreeLeafPage>,
    last_page_rc: Pod<BTreeLeafPage>,
    page_it: BTreeLeafPageIteratorRc,
    last_page_it: BTreeLeafPageIteratorRc,
}

impl<'t> BTreeTableIterator<'t> {
    pub fn new(tx: &'t Transaction, table: &BTreeTable) -> Self {
        let page_rc = table.get_first_page(tx, Permission::ReadOnly).unwrap();
        let last_page_rc = table.get_last_page(tx, Permission::ReadOnly).unwrap();

        Self {
            tx,
            page_rc: Arc::clone(&page_rc),
            last_page_rc: Arc::clone(&last_page_rc),
            page_it: BTreeLeafPageIteratorRc::new(Arc::clone(&page_rc)),
            last_page_it: BTreeLeafPageIteratorRc::new(Arc::clone(&last_page_rc)),
        }
    }
}

impl Iterator for BTreeTableIterator<'_> {
    type Item = IndexEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let v = self.page_it.next();
        if v.is_some() {
            return v;
        }

        let right = self.page_rc.rl().get_right_pid();
        match right {
            Some(right) => {
                let sibling_rc = Database::buffer_pool()
                    .get_leaf_page(self.tx, Permission::ReadOnly, &right)
                    .unwrap();

                self.page_rc = Arc::clone(&sibling_rc);
                self.page_it = BTreeLeafPageIteratorRc::new(sibling_rc);
                self.page_it.next()
            }
            None => None,
        }
    }
}

impl DoubleEndedIterator for BTreeTableIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let v = self.last_page_it.next_back();
        if v.is_some() {
            return v;
        }

        let left = self.last_page_rc.rl().get_left_pid();
        match left {
            Some(left) => {
                let sibling_rc = Database::buffer_pool()
                    .get_leaf_page(self.tx, Permission::ReadOnly, &left)
                    .unwrap();

                self.last_page_rc = Arc::clone(&sibling_rc);
                self.last_page_it = BTreeLeafPageIteratorRc::new(sibling_rc);
                self.last_page_it.next_back()
            }
            None => None,
        }
    }
}

/// A predicate-filtered index iterator. Starts at the left-most leaf that
/// can satisfy the predicate and stops as soon as the predicate becomes
/// monotonically unsatisfiable.
pub struct BTreeTableSearchIterator<'t> {
    tx: &'t Transaction,

    current_page_rc: Pod<BTreeLeafPage>,
    page_it: BTreeLeafPageIteratorRc,
    predicate: Predicate,
}

impl<'t> BTreeTableSearchIterator<'t> {
    pub fn new(tx: &'t Transaction, table: &BTreeTable, predicate: &Predicate) -> Self {
        let mut dirty = HashMap::new();
        let root_pid = table
            .get_root_pid(tx, &mut dirty, Permission::ReadOnly)
            .unwrap();

        let start_rc = match predicate.op {
            Op::Equals | Op::GreaterThan | Op::GreaterThanOrEq => table
                .find_leaf_page(
                    tx,
                    &mut dirty,
                    Permission::ReadOnly,
                    root_pid,
                    &SearchFor::Key(predicate.cell.clone()),
                )
                .unwrap(),
            Op::LessThan | Op::LessThanOrEq | Op::NotEquals => table
                .find_leaf_page(
                    tx,
                    &mut dirty,
                    Permission::ReadOnly,
                    root_pid,
                    &SearchFor::LeftMost,
                )
                .unwrap(),
        };

        Self {
            tx,
            current_page_rc: Arc::clone(&start_rc),
            page_it: BTreeLeafPageIteratorRc::new(start_rc),
            predicate: predicate.clone(),
        }
    }
}

impl Iterator for BTreeTableSearchIterator<'_> {
    type Item = IndexEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.page_it.next() {
                Some(entry) => {
                    let key = entry.get_key();
                    match self.predicate.op {
                        Op::Equals => {
                            if key == self.predicate.cell {
                                return Some(entry);
                            } else if key > self.predicate.cell {
                                return None;
                            }
                        }
                        Op::GreaterThan => {
                            if key > self.predicate.cell {
                                return Some(entry);
                            }
                        }
                        Op::GreaterThanOrEq => {
                            if key >= self.predicate.cell {
                                return Some(entry);
                            }
                        }
                        Op::LessThan => {
                            if key < self.predicate.cell {
                                return Some(entry);
                            } else {
                                return None;
                            }
                        }
                        Op::LessThanOrEq => {
                            if key <= self.predicate.cell {
                                return Some(entry);
                            } else {
                                return None;
                            }
                        }
                        Op::NotEquals => {
                            if key != self.predicate.cell {
                                return Some(entry);
                            }
                        }
                    }
                }
                None => {
                    // move to the next leaf and continue the search
                    let right = self.current_page_rc.rl().get_right_pid();
                    match right {
                        Some(pid) => {
                            let rc = Database::buffer_pool()
                                .get_leaf_page(self.tx, Permission::ReadOnly, &pid)
                                .unwrap();
                            self.current_page_rc = Arc::clone(&rc);
                            self.page_it = BTreeLeafPageIteratorRc::new(rc);
                        }
                        None => return None,
                    }
                }
            }
        }
    }
}
