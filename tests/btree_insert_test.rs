mod test_utils;

use mini_db::{
    buffer_pool::BufferPool,
    concurrent_status::Permission,
    page::PageCategory,
    storage::tuple::Cell,
    transaction::Transaction,
    utils::{ceil_div, HandyRwLock},
    Database,
};

use test_utils::{
    insert_entry, internal_children_cap, leaf_entries_cap, leaf_pids, new_entry,
    new_random_btree_table, setup, TreeLayout,
};

#[test]
fn test_insert_entry() {
    let _guard = setup();

    let (table_rc, _) = new_random_btree_table(0, TreeLayout::Naturally);
    let table = table_rc.rl();
    let table_id = table.get_id();

    let cap = leaf_entries_cap();
    let mut seq = 0;

    // fill the first leaf page
    let tx = Transaction::new();
    for _ in 0..cap {
        insert_entry(&tx, table_id, &new_entry(table_id, seq, seq as u32));
        seq += 1;
        assert_eq!(table.pages_count(), 1);
    }

    // the next half page of entries lives on a fresh leaf, the split also
    // materialized an internal root
    for _ in 0..ceil_div(cap, 2) {
        insert_entry(&tx, table_id, &new_entry(table_id, seq, seq as u32));
        seq += 1;
        assert_eq!(table.pages_count(), 3);
    }

    // one more insert splits the second leaf
    insert_entry(&tx, table_id, &new_entry(table_id, seq, seq as u32));
    seq += 1;
    assert_eq!(table.pages_count(), 4);

    // the entries come back in key order
    for (i, entry) in table.get_iter(&tx).enumerate() {
        assert_eq!(entry.get_key(), Cell::Int(i as i32));
    }
    assert_eq!(seq as usize, cap + ceil_div(cap, 2) + 1);

    tx.commit().unwrap();
    table.check_integrity(true).unwrap();
}

#[test]
fn test_split_leaf_page() {
    let _guard = setup();

    let cap = leaf_entries_cap();
    let (table_rc, entries) = new_random_btree_table(cap, TreeLayout::EvenlyDistributed);
    let table = table_rc.rl();
    let table_id = table.get_id();

    // one full leaf so far
    assert_eq!(table.pages_count(), 1);

    // inserting around the middle of the key range splits the leaf
    let middle_key = match entries[cap / 2].get_key() {
        Cell::Int(v) => v,
        _ => unreachable!(),
    };
    let extra = new_entry(table_id, middle_key, cap as u32 + 10);
    let tx = Transaction::new();
    insert_entry(&tx, table_id, &extra);

    assert_eq!(table.pages_count(), 3);

    // the two leaves hold every pre-split entry plus the new one, split
    // about evenly
    let pids = leaf_pids(&tx, &table);
    assert_eq!(pids.len(), 2);
    let mut counts = Vec::new();
    for pid in &pids {
        let leaf_rc = Database::buffer_pool()
            .get_leaf_page(&tx, Permission::ReadOnly, pid)
            .unwrap();
        counts.push(leaf_rc.rl().entries_count());
    }
    assert_eq!(counts[0] + counts[1], cap + 1);
    assert!((counts[0] as i64 - counts[1] as i64).abs() <= 1);

    // the new root holds exactly one separator
    let root_pid = table.root_pid(&tx).unwrap();
    assert_eq!(root_pid.category, PageCategory::Internal);
    let root_rc = Database::buffer_pool()
        .get_internal_page(&tx, Permission::ReadOnly, &root_pid)
        .unwrap();
    assert_eq!(root_rc.rl().entries_count(), 1);

    // union check
    let mut expected = entries.clone();
    expected.push(extra);
    expected.sort();
    let scanned: Vec<_> = table.get_iter(&tx).collect();
    assert_eq!(scanned, expected);

    tx.commit().unwrap();
    table.check_integrity(true).unwrap();
}

#[test]
fn test_split_internal_page() {
    let _guard = setup();

    // a small page size keeps the tree manageable
    BufferPool::set_page_size(1024);

    let leaf_cap = leaf_entries_cap();
    let children_cap = internal_children_cap();
    let entry_cap = children_cap - 1;

    // a full two-level tree: every leaf full, the root internal full
    let rows = children_cap * leaf_cap;
    let (table_rc, entries) = new_random_btree_table(rows, TreeLayout::EvenlyDistributed);
    let table = table_rc.rl();
    let table_id = table.get_id();
    assert_eq!(table.pages_count(), children_cap + 1);

    // one more insert splits a leaf, which splits the root internal and
    // grows the tree by one level
    let middle_key = match entries[rows / 2].get_key() {
        Cell::Int(v) => v,
        _ => unreachable!(),
    };
    let extra = new_entry(table_id, middle_key, rows as u32 + 10);
    let tx = Transaction::new();
    insert_entry(&tx, table_id, &extra);

    // a new leaf, a new internal and a new root
    assert_eq!(table.pages_count(), children_cap + 4);

    let root_pid = table.root_pid(&tx).unwrap();
    assert_eq!(root_pid.category, PageCategory::Internal);
    let root_rc = Database::buffer_pool()
        .get_internal_page(&tx, Permission::ReadOnly, &root_pid)
        .unwrap();
    assert_eq!(root_rc.rl().entries_count(), 1);

    // the split pushed the middle key up: the two halves hold the original
    // entries minus the pushed key, plus the separator of the leaf split
    let root_entry = root_rc.rl().get_entry(1).unwrap();
    let mut half_counts = Vec::new();
    for pid in [root_entry.get_left_child(), root_entry.get_right_child()].iter() {
        assert_eq!(pid.category, PageCategory::Internal);
        let rc = Database::buffer_pool()
            .get_internal_page(&tx, Permission::ReadOnly, pid)
            .unwrap();
        half_counts.push(rc.rl().entries_count());
    }
    assert_eq!(half_counts[0] + half_counts[1], entry_cap);
    assert!(half_counts[0] >= entry_cap / 2 - 1);
    assert!(half_counts[1] >= entry_cap / 2 - 1);

    assert_eq!(table.entries_count(&tx), rows + 1);
    tx.commit().unwrap();
    table.check_integrity(true).unwrap();
}

#[test]
fn test_empty_page_reuse() {
    let _guard = setup();

    BufferPool::set_page_size(1024);

    let cap = leaf_entries_cap();
    let rows = cap + 4;
    let (table_rc, entries) = new_random_btree_table(rows, TreeLayout::EvenlyDistributed);
    let table = table_rc.rl();
    let table_id = table.get_id();

    // two leaves plus the internal root
    assert_eq!(table.pages_count(), 3);

    // deleting the largest entries shrinks the right leaf until the two
    // merge; the merge frees the right leaf, the root collapse frees the
    // internal page, and the first header page gets allocated
    let tx = Transaction::new();
    for entry in entries.iter().rev().take(5) {
        test_utils::delete_entry(&tx, table_id, entry);
    }
    tx.commit().unwrap();

    assert_eq!(table.pages_count(), 4);
    {
        let tx = Transaction::new();
        assert_eq!(table.root_pid(&tx).unwrap().category, PageCategory::Leaf);
        tx.commit().unwrap();
    }
    table.check_integrity(true).unwrap();

    // the next split takes its pages from the free list instead of
    // extending the file
    let tx = Transaction::new();
    let max_key = i32::MAX / 2;
    for i in 0..2 {
        let extra = new_entry(table_id, max_key + i, 7000 + i as u32);
        insert_entry(&tx, table_id, &extra);
    }
    assert_eq!(table.pages_count(), 4);

    let pids = leaf_pids(&tx, &table);
    assert_eq!(pids.len(), 2);
    assert!(pids.iter().any(|pid| pid.page_index == 2 || pid.page_index == 3));

    tx.commit().unwrap();
    table.check_integrity(true).unwrap();
}

#[test]
fn test_insert_duplicate_keys() {
    let _guard = setup();

    let (table_rc, _) = new_random_btree_table(0, TreeLayout::Naturally);
    let table = table_rc.rl();
    let table_id = table.get_id();

    let repetition = 100;
    let tx = Transaction::new();
    let mut seq = 0;
    for key in 0..5 {
        for _ in 0..repetition {
            insert_entry(&tx, table_id, &new_entry(table_id, key, seq));
            seq += 1;
        }
    }
    tx.commit().unwrap();

    use mini_db::{Op, Predicate};
    let tx = Transaction::new();

    let predicate = Predicate::new(0, Op::Equals, &Cell::Int(1));
    assert_eq!(table.search(&tx, &predicate).count(), repetition);

    let predicate = Predicate::new(0, Op::GreaterThanOrEq, &Cell::Int(2));
    assert_eq!(table.search(&tx, &predicate).count(), repetition * 3);

    let predicate = Predicate::new(0, Op::LessThan, &Cell::Int(2));
    assert_eq!(table.search(&tx, &predicate).count(), repetition * 2);

    tx.commit().unwrap();
    table.check_integrity(true).unwrap();
}
