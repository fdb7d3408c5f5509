#![allow(dead_code)]

use std::{
    cmp,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, RwLock,
    },
};

use once_cell::sync::Lazy;
use rand::Rng;

use mini_db::{
    catalog::Table,
    concurrent_status::Permission,
    page::{
        empty_page_data, BTreeInternalPage, BTreeLeafPage, BTreeLeafPageIterator,
        BTreePage, BTreeRootPointerPage, Entry, IndexEntry, Page, PageCategory, PageId,
    },
    storage::{
        schema::{int_schema, Type},
        tuple::{Cell, RecordId, Tuple},
    },
    transaction::Transaction,
    types::Pod,
    utils::{ceil_div, init_log, HandyRwLock},
    BTreeTable, Database, HeapTable,
};

// The database state is process-global, so the tests of one binary run
// under a single lock.
static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

static PATH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// # Conduct the initialization
///
/// - Setting up log configurations.
/// - Reset the database and its configuration.
///
/// The returned guard serializes the tests of the binary.
pub fn setup() -> MutexGuard<'static, ()> {
    let guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    init_log();
    Database::reset();
    guard
}

pub fn unique_db_path() -> String {
    let n = PATH_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir()
        .join(format!("mini_db_test_{}_{}.db", std::process::id(), n))
        .to_string_lossy()
        .to_string()
}

pub fn leaf_entries_cap() -> usize {
    BTreeLeafPage::calculate_slots_count(Type::Int)
}

pub fn internal_children_cap() -> usize {
    BTreeInternalPage::get_max_entries(4) + 1
}

/// An index entry pointing at a synthesized heap location; `seq` keeps the
/// record ids unique and ordered.
pub fn new_entry(table_id: u32, key: i32, seq: u32) -> IndexEntry {
    let rid = RecordId::new(
        PageId::new(PageCategory::Heap, table_id, seq / 64),
        seq % 64,
    );
    IndexEntry::new(Cell::Int(key), rid)
}

pub fn insert_entry(tx: &Transaction, table_id: u32, entry: &IndexEntry) {
    Database::buffer_pool()
        .insert_entry(tx, table_id, entry)
        .unwrap();
}

pub fn delete_entry(tx: &Transaction, table_id: u32, entry: &IndexEntry) {
    Database::buffer_pool()
        .delete_entry(tx, table_id, entry)
        .unwrap();
}

/// The leaf pages of the tree in key order, walked through the sibling
/// chain.
pub fn leaf_pids(tx: &Transaction, table: &BTreeTable) -> Vec<PageId> {
    let mut pids = Vec::new();
    let mut page_rc = table.get_first_page(tx, Permission::ReadOnly).unwrap();
    loop {
        pids.push(page_rc.rl().get_pid());
        let right = page_rc.rl().get_right_pid();
        match right {
            Some(right) => {
                page_rc = Database::buffer_pool()
                    .get_leaf_page(tx, Permission::ReadOnly, &right)
                    .unwrap();
            }
            None => break,
        }
    }
    pids
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TreeLayout {
    Naturally,
    EvenlyDistributed,
    LastTwoEvenlyDistributed,
}

/// Create a B+Tree table filled with `rows` random-keyed entries.
///
/// With `Naturally` the entries go through the ordinary insert path. The
/// other layouts build the tree directly on disk: `EvenlyDistributed`
/// spreads entries evenly over the minimum number of leaves,
/// `LastTwoEvenlyDistributed` packs every leaf full except the last two,
/// which puts the tree on the verge of splitting.
///
/// Returns the table and all its entries in key order.
pub fn new_random_btree_table(
    rows: usize,
    layout: TreeLayout,
) -> (Pod<BTreeTable>, Vec<IndexEntry>) {
    let schema = int_schema(2, "");
    let path = unique_db_path();
    let table = BTreeTable::new(&path, 0, &schema).unwrap();
    let table_id = table.get_id();
    let table_rc = Arc::new(RwLock::new(table));
    Database::catalog().add_table(Table::BTree(Arc::clone(&table_rc)), &path, "");

    let mut rng = rand::thread_rng();
    let mut entries: Vec<IndexEntry> = (0..rows)
        .map(|i| {
            let key = rng.gen_range(i32::MIN / 2, i32::MAX / 2);
            new_entry(table_id, key, i as u32)
        })
        .collect();
    entries.sort();

    match layout {
        TreeLayout::Naturally => {
            let tx = Transaction::new();
            for e in &entries {
                insert_entry(&tx, table_id, e);
            }
            tx.commit().unwrap();
        }
        _ => {
            build_packed_tree(&table_rc.rl(), &entries, layout);
        }
    }

    (table_rc, entries)
}

fn get_buckets(total: usize, cap: usize, layout: TreeLayout) -> Vec<usize> {
    match layout {
        TreeLayout::Naturally | TreeLayout::EvenlyDistributed => {
            let n = cmp::max(1, ceil_div(total, cap));
            let base = total / n;
            let rem = total % n;
            (0..n).map(|i| base + if i < rem { 1 } else { 0 }).collect()
        }
        TreeLayout::LastTwoEvenlyDistributed => {
            let n = cmp::max(1, ceil_div(total, cap));
            if n <= 2 {
                return get_buckets(total, cap, TreeLayout::EvenlyDistributed);
            }
            let rest = total - (n - 2) * cap;
            let mut buckets = vec![cap; n - 2];
            buckets.push(ceil_div(rest, 2));
            buckets.push(rest / 2);
            buckets
        }
    }
}

/// Write a packed tree straight to disk: leaves first, then the internal
/// tiers bottom-up, then the root pointer.
fn build_packed_tree(table: &BTreeTable, entries: &[IndexEntry], layout: TreeLayout) {
    if entries.is_empty() {
        return;
    }

    let schema = table.get_schema();
    let table_id = table.get_id();
    let leaf_cap = leaf_entries_cap();
    let buckets = get_buckets(entries.len(), leaf_cap, layout);

    let mut next_index: u32 = 0;
    let mut leaves: Vec<BTreeLeafPage> = Vec::new();
    let mut cursor = 0;
    for count in &buckets {
        next_index += 1;
        let pid = PageId::new(PageCategory::Leaf, table_id, next_index);
        let mut leaf = BTreeLeafPage::new(&pid, &empty_page_data(), &schema, 0);
        for _ in 0..*count {
            leaf.insert_entry(&entries[cursor]).unwrap();
            cursor += 1;
        }
        leaves.push(leaf);
    }

    // stitch the sibling chain
    let leaf_ids: Vec<PageId> = leaves.iter().map(|l| l.get_pid()).collect();
    for i in 0..leaves.len() {
        if i > 0 {
            leaves[i].set_left_pid(Some(leaf_ids[i - 1]));
        }
        if i + 1 < leaves.len() {
            leaves[i].set_right_pid(Some(leaf_ids[i + 1]));
        }
    }

    // (pid, smallest key underneath) per node of the current tier
    let mut tier: Vec<(PageId, Cell)> = leaves
        .iter()
        .map(|l| {
            let min_key = BTreeLeafPageIterator::new(l).next().unwrap().get_key();
            (l.get_pid(), min_key)
        })
        .collect();

    let mut internals: Vec<BTreeInternalPage> = Vec::new();
    while tier.len() > 1 {
        let cap = internal_children_cap();
        let n_nodes = ceil_div(tier.len(), cap);
        let base = tier.len() / n_nodes;
        let rem = tier.len() % n_nodes;

        let mut new_tier: Vec<(PageId, Cell)> = Vec::new();
        let mut start = 0;
        for i in 0..n_nodes {
            let count = base + if i < rem { 1 } else { 0 };
            let group = &tier[start..start + count];
            start += count;

            next_index += 1;
            let pid = PageId::new(PageCategory::Internal, table_id, next_index);
            let mut node = BTreeInternalPage::new(&pid, &empty_page_data(), &schema, 0);
            for j in 1..group.len() {
                let entry = Entry::new(group[j].1.clone(), &group[j - 1].0, &group[j].0);
                node.insert_entry(&entry).unwrap();
            }

            for (child_pid, _) in group {
                patch_parent(&mut leaves, &mut internals, child_pid, &pid);
            }

            new_tier.push((pid, group[0].1.clone()));
            internals.push(node);
        }
        tier = new_tier;
    }

    // point the root pointer at the single remaining node
    let root_pid = tier[0].0;
    let root_ptr_pid = PageId::new(PageCategory::RootPointer, table_id, 0);
    let mut root_ptr = BTreeRootPointerPage::new(
        &root_ptr_pid,
        &table.read_page_data(&root_ptr_pid).unwrap(),
        &schema,
        0,
    );
    root_ptr.set_root_pid(&root_pid);
    table
        .write_page_data(&root_ptr_pid, &root_ptr.get_page_data())
        .unwrap();

    for leaf in &leaves {
        table
            .write_page_data(&leaf.get_pid(), &leaf.get_page_data())
            .unwrap();
    }
    for node in &internals {
        table
            .write_page_data(&node.get_pid(), &node.get_page_data())
            .unwrap();
    }
    table.set_page_index(next_index);
}

fn patch_parent(
    leaves: &mut Vec<BTreeLeafPage>,
    internals: &mut Vec<BTreeInternalPage>,
    child_pid: &PageId,
    parent_pid: &PageId,
) {
    match child_pid.category {
        PageCategory::Leaf => {
            let leaf = leaves
                .iter_mut()
                .find(|l| l.get_pid() == *child_pid)
                .unwrap();
            leaf.set_parent_pid(parent_pid);
        }
        PageCategory::Internal => {
            let node = internals
                .iter_mut()
                .find(|n| n.get_pid() == *child_pid)
                .unwrap();
            node.set_parent_pid(parent_pid);
        }
        _ => unreachable!(),
    }
}

/// Create a heap table filled with `rows` random rows of `columns` int
/// columns. Returns the table and the inserted values in insertion order.
pub fn new_random_heap_table(
    columns: usize,
    rows: usize,
) -> (Pod<HeapTable>, Vec<Vec<i32>>) {
    let schema = int_schema(columns, "");
    let path = unique_db_path();
    let table = HeapTable::new(&path, &schema).unwrap();
    let table_id = table.get_id();
    let table_rc = Arc::new(RwLock::new(table));
    Database::catalog().add_table(Table::Heap(Arc::clone(&table_rc)), &path, "");

    let mut rng = rand::thread_rng();
    let mut values: Vec<Vec<i32>> = Vec::new();

    let tx = Transaction::new();
    for _ in 0..rows {
        let row: Vec<i32> = (0..columns).map(|_| rng.gen_range(-10_000, 10_000)).collect();
        let cells: Vec<Cell> = row.iter().map(|v| Cell::Int(*v)).collect();
        let mut tuple = Tuple::new_from_cells(&schema, &cells).unwrap();
        Database::buffer_pool()
            .insert_tuple(&tx, table_id, &mut tuple)
            .unwrap();
        values.push(row);
    }
    tx.commit().unwrap();

    (table_rc, values)
}

/// Tuple equality against a plain row of ints.
pub fn equal_row(tuple: &Tuple, row: &[i32]) -> bool {
    row.iter()
        .enumerate()
        .all(|(i, v)| tuple.get_cell(i) == Cell::Int(*v))
}
