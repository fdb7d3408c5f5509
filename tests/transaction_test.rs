mod test_utils;

use std::{thread, time::Duration};

use mini_db::{
    buffer_pool::BufferPool,
    storage::tuple::Tuple,
    transaction::Transaction,
    utils::HandyRwLock,
    Database, DbError, SequentialScan,
};

use test_utils::{
    delete_entry, insert_entry, new_entry, new_random_btree_table, new_random_heap_table,
    setup, TreeLayout,
};

#[test]
fn test_abort_undo() {
    let _guard = setup();

    let (table_rc, _) = new_random_heap_table(2, 10);
    let table_id = table_rc.rl().get_id();

    // insert a tuple and observe it inside the same transaction
    let tx = Transaction::new();
    let mut tuple = Tuple::new_int_tuple(42, 2);
    Database::buffer_pool()
        .insert_tuple(&tx, table_id, &mut tuple)
        .unwrap();

    let scan = SequentialScan::new(&tx, table_id).unwrap();
    assert_eq!(scan.count(), 11);

    tx.abort().unwrap();

    // a fresh transaction must not see the aborted insert
    let tx = Transaction::new();
    let scan = SequentialScan::new(&tx, table_id).unwrap();
    assert_eq!(scan.count(), 10);
    tx.commit().unwrap();
}

#[test]
fn test_commit_is_durable() {
    let _guard = setup();

    let (table_rc, values) = new_random_heap_table(2, 5);
    let table_id = table_rc.rl().get_id();

    // drop every cached page, the next scan has to read from disk
    Database::buffer_pool().clear();

    let tx = Transaction::new();
    let scan = SequentialScan::new(&tx, table_id).unwrap();
    let scanned: Vec<Tuple> = scan.collect();
    assert_eq!(scanned.len(), 5);
    for (i, tuple) in scanned.iter().enumerate() {
        assert!(test_utils::equal_row(tuple, &values[i]));
    }
    tx.commit().unwrap();
}

#[test]
fn test_last_committer_wins() {
    let _guard = setup();

    let (table_rc, _) = new_random_heap_table(1, 0);
    let table_id = table_rc.rl().get_id();

    let tx = Transaction::new();
    let mut tuple = Tuple::new_int_tuple(1, 1);
    Database::buffer_pool()
        .insert_tuple(&tx, table_id, &mut tuple)
        .unwrap();
    tx.commit().unwrap();

    let tx = Transaction::new();
    let mut tuple = Tuple::new_int_tuple(2, 1);
    Database::buffer_pool()
        .insert_tuple(&tx, table_id, &mut tuple)
        .unwrap();
    tx.commit().unwrap();

    // the bytes on disk reflect the last commit
    Database::buffer_pool().clear();
    let tx = Transaction::new();
    let scan = SequentialScan::new(&tx, table_id).unwrap();
    assert_eq!(scan.count(), 2);
    tx.commit().unwrap();
}

#[test]
fn test_no_steal_eviction_fails_when_all_pages_are_dirty() {
    let _guard = setup();

    let (table_a, _) = new_random_heap_table(1, 0);
    let (table_b, _) = new_random_heap_table(1, 0);
    let table_a_id = table_a.rl().get_id();
    let table_b_id = table_b.rl().get_id();

    BufferPool::set_capacity(1);

    // the first transaction dirties the only slot of the pool
    let tx_a = Transaction::new();
    let mut tuple = Tuple::new_int_tuple(1, 1);
    Database::buffer_pool()
        .insert_tuple(&tx_a, table_a_id, &mut tuple)
        .unwrap();

    // the second transaction needs the slot, but the page in it is dirty
    let tx_b = Transaction::new();
    let mut tuple = Tuple::new_int_tuple(2, 1);
    let result = Database::buffer_pool().insert_tuple(&tx_b, table_b_id, &mut tuple);
    match result {
        Err(DbError::BufferFull) => {}
        other => panic!("expect BufferFull, got {:?}", other.err()),
    }
    tx_b.abort().unwrap();

    // once the first transaction commits its page is clean and evictable
    tx_a.commit().unwrap();

    let tx_c = Transaction::new();
    let mut tuple = Tuple::new_int_tuple(3, 1);
    Database::buffer_pool()
        .insert_tuple(&tx_c, table_b_id, &mut tuple)
        .unwrap();
    tx_c.commit().unwrap();

    let tx = Transaction::new();
    let scan = SequentialScan::new(&tx, table_b_id).unwrap();
    assert_eq!(scan.count(), 1);
    tx.commit().unwrap();
}

#[test]
fn test_abort_restores_the_btree() {
    let _guard = setup();

    let (table_rc, entries) = new_random_btree_table(100, TreeLayout::Naturally);
    let table = table_rc.rl();
    let table_id = table.get_id();

    let tx = Transaction::new();
    let extra = new_entry(table_id, 12345, 9999);
    insert_entry(&tx, table_id, &extra);
    tx.abort().unwrap();

    let tx = Transaction::new();
    assert_eq!(table.entries_count(&tx), entries.len());
    tx.commit().unwrap();

    table.check_integrity(true).unwrap();
}

#[test]
fn test_write_visible_to_the_next_lock_holder() {
    let _guard = setup();

    let (table_rc, _) = new_random_heap_table(1, 1);
    let table_id = table_rc.rl().get_id();

    // tx_a holds the exclusive lock on page 0
    let tx_a = Transaction::new();
    let mut tuple = Tuple::new_int_tuple(10, 1);
    Database::buffer_pool()
        .insert_tuple(&tx_a, table_id, &mut tuple)
        .unwrap();

    // the reader blocks until tx_a commits, then sees its row
    let reader = thread::spawn(move || {
        let tx = Transaction::new();
        let scan = SequentialScan::new(&tx, table_id).unwrap();
        let count = scan.count();
        tx.commit().unwrap();
        count
    });

    thread::sleep(Duration::from_millis(100));
    tx_a.commit().unwrap();

    assert_eq!(reader.join().unwrap(), 2);
}

#[test]
fn test_concurrent_inserts_and_deletes() {
    let _guard = setup();

    BufferPool::set_page_size(1024);

    let base_rows = 166;
    let (table_rc, _) = new_random_btree_table(base_rows, TreeLayout::EvenlyDistributed);
    let table = table_rc.rl();
    let table_id = table.get_id();
    table.check_integrity(true).unwrap();

    // concurrent inserts, every inserted entry goes through the channel
    let (sender, receiver) = crossbeam::channel::unbounded();
    let threads: usize = 6;
    let inserts_per_thread: usize = 20;

    let mut handles = Vec::new();
    for t in 0..threads {
        let sender = sender.clone();
        handles.push(thread::spawn(move || {
            for i in 0..inserts_per_thread {
                let seq = 1000 + (t * inserts_per_thread + i) as u32;
                let entry = new_entry(table_id, (seq as i32) * 17 % 1000, seq);

                let tx = Transaction::new();
                insert_entry(&tx, table_id, &entry);
                tx.commit().unwrap();

                sender.send(entry).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    drop(sender);

    let inserted = threads * inserts_per_thread;
    let tx = Transaction::new();
    assert_eq!(table.entries_count(&tx), base_rows + inserted);
    tx.commit().unwrap();
    table.check_integrity(true).unwrap();

    // concurrent deletes of half of what was just inserted
    let mut handles = Vec::new();
    for _ in 0..3 {
        let receiver = receiver.clone();
        handles.push(thread::spawn(move || {
            let mut deleted = 0;
            while deleted < inserts_per_thread {
                let entry = match receiver.recv() {
                    Ok(entry) => entry,
                    Err(_) => break,
                };
                let tx = Transaction::new();
                delete_entry(&tx, table_id, &entry);
                tx.commit().unwrap();
                deleted += 1;
            }
            deleted
        }));
    }
    let mut deleted = 0;
    for handle in handles {
        deleted += handle.join().unwrap();
    }

    let tx = Transaction::new();
    assert_eq!(table.entries_count(&tx), base_rows + inserted - deleted);
    tx.commit().unwrap();
    table.check_integrity(true).unwrap();
}
