mod test_utils;

use mini_db::{
    buffer_pool::BufferPool,
    storage::tuple::Cell,
    transaction::Transaction,
    utils::HandyRwLock,
    Op, Predicate,
};

use test_utils::{insert_entry, new_entry, new_random_btree_table, setup, TreeLayout};

#[test]
fn test_scan_in_key_order() {
    let _guard = setup();

    BufferPool::set_page_size(1024);

    let (table_rc, entries) = new_random_btree_table(1000, TreeLayout::EvenlyDistributed);
    let table = table_rc.rl();

    let tx = Transaction::new();
    let scanned: Vec<_> = table.get_iter(&tx).collect();
    assert_eq!(scanned, entries);

    // a full left-to-right walk yields non-decreasing keys
    for window in scanned.windows(2) {
        assert!(window[0].get_key() <= window[1].get_key());
    }
    tx.commit().unwrap();
}

#[test]
fn test_reverse_scan() {
    let _guard = setup();

    BufferPool::set_page_size(1024);

    let (table_rc, entries) = new_random_btree_table(1000, TreeLayout::EvenlyDistributed);
    let table = table_rc.rl();

    let tx = Transaction::new();
    let mut backwards: Vec<_> = table.get_iter(&tx).rev().collect();
    backwards.reverse();
    assert_eq!(backwards, entries);
    tx.commit().unwrap();
}

#[test]
fn test_search_operators() {
    let _guard = setup();

    let (table_rc, _) = new_random_btree_table(0, TreeLayout::Naturally);
    let table = table_rc.rl();
    let table_id = table.get_id();

    let rows = 500;
    let tx = Transaction::new();
    for key in 0..rows {
        insert_entry(&tx, table_id, &new_entry(table_id, key, key as u32));
    }
    tx.commit().unwrap();

    let tx = Transaction::new();
    let cases = [
        (Op::Equals, 250, 1),
        (Op::GreaterThan, 250, 249),
        (Op::GreaterThanOrEq, 250, 250),
        (Op::LessThan, 100, 100),
        (Op::LessThanOrEq, 100, 101),
        (Op::NotEquals, 0, 499),
        (Op::Equals, 9999, 0),
        (Op::GreaterThan, 9999, 0),
        (Op::LessThan, -1, 0),
    ];
    for (op, key, expected) in cases.iter() {
        let predicate = Predicate::new(0, *op, &Cell::Int(*key));
        assert_eq!(
            table.search(&tx, &predicate).count(),
            *expected,
            "op: {:?}, key: {}",
            op,
            key
        );
    }
    tx.commit().unwrap();
}

#[test]
fn test_search_returns_sorted_matches() {
    let _guard = setup();

    BufferPool::set_page_size(1024);

    let (table_rc, entries) = new_random_btree_table(500, TreeLayout::EvenlyDistributed);
    let table = table_rc.rl();

    let threshold = entries[250].get_key();
    let tx = Transaction::new();
    let predicate = Predicate::new(0, Op::GreaterThanOrEq, &threshold);
    let matches: Vec<_> = table.search(&tx, &predicate).collect();

    let expected: Vec<_> = entries
        .iter()
        .filter(|e| e.get_key() >= threshold)
        .cloned()
        .collect();
    assert_eq!(matches, expected);
    tx.commit().unwrap();
}

#[test]
fn test_scan_empty_table() {
    let _guard = setup();

    let (table_rc, _) = new_random_btree_table(0, TreeLayout::Naturally);
    let table = table_rc.rl();

    let tx = Transaction::new();
    assert_eq!(table.get_iter(&tx).count(), 0);

    let predicate = Predicate::new(0, Op::GreaterThan, &Cell::Int(0));
    assert_eq!(table.search(&tx, &predicate).count(), 0);
    tx.commit().unwrap();
}
