mod test_utils;

use mini_db::{
    page::HeapPage,
    storage::schema::int_schema,
    transaction::Transaction,
    utils::{ceil_div, HandyRwLock},
    Database, SequentialScan,
};

use test_utils::{equal_row, new_random_heap_table, setup};

#[test]
fn test_insert_grows_file() {
    let _guard = setup();

    let rows = 1000;
    let (table_rc, values) = new_random_heap_table(1, rows);
    let table = table_rc.rl();

    let slots_per_page = HeapPage::calculate_slots_count(&int_schema(1, ""));
    assert_eq!(table.num_pages(), ceil_div(rows, slots_per_page));

    let tx = Transaction::new();
    let mut scan = SequentialScan::new(&tx, table.get_id()).unwrap();
    let mut row_index = 0;
    for tuple in scan.by_ref() {
        assert!(equal_row(&tuple, &values[row_index]));
        row_index += 1;
    }
    assert_eq!(row_index, rows);
    tx.commit().unwrap();
}

#[test]
fn test_scan_small() {
    let _guard = setup();

    let column_sizes = [1, 2, 3];
    let row_sizes = [0, 1, 511, 512, 1000];

    for columns in &column_sizes {
        for rows in &row_sizes {
            let (table_rc, values) = new_random_heap_table(*columns, *rows);
            let table = table_rc.rl();

            let tx = Transaction::new();
            let mut scan = SequentialScan::new(&tx, table.get_id()).unwrap();
            let mut row_index = 0;
            for tuple in scan.by_ref() {
                assert!(equal_row(&tuple, &values[row_index]));
                row_index += 1;
            }
            assert_eq!(row_index, *rows);
            tx.commit().unwrap();
        }
    }
}

#[test]
fn test_rewind() {
    let _guard = setup();

    let (table_rc, values) = new_random_heap_table(2, 1000);
    let table = table_rc.rl();

    let tx = Transaction::new();
    let mut scan = SequentialScan::new(&tx, table.get_id()).unwrap();

    let mut row_index = 0;
    for tuple in scan.by_ref() {
        assert!(equal_row(&tuple, &values[row_index]));
        row_index += 1;
        if row_index >= 100 {
            break;
        }
    }

    scan.rewind();

    let mut row_index = 0;
    for tuple in scan.by_ref() {
        assert!(equal_row(&tuple, &values[row_index]));
        row_index += 1;
    }
    assert_eq!(row_index, 1000);
    tx.commit().unwrap();
}

#[test]
fn test_close_stops_the_scan() {
    let _guard = setup();

    let (table_rc, _) = new_random_heap_table(1, 10);
    let table = table_rc.rl();

    let tx = Transaction::new();
    let mut scan = SequentialScan::new(&tx, table.get_id()).unwrap();
    assert!(scan.next().is_some());
    scan.close();
    assert!(scan.next().is_none());
    tx.commit().unwrap();
}

#[test]
fn test_scan_fills_the_buffer_pool() {
    let _guard = setup();

    let (table_rc, _) = new_random_heap_table(1, 2000);
    let table = table_rc.rl();
    assert!(table.num_pages() > 1);

    let tx = Transaction::new();
    let scan = SequentialScan::new(&tx, table.get_id()).unwrap();
    assert_eq!(scan.count(), 2000);
    tx.commit().unwrap();

    // every page of the table is now cached
    assert_eq!(Database::buffer_pool().pages_count(), table.num_pages());
}

#[test]
fn test_delete_tuple() {
    let _guard = setup();

    let rows = 500;
    let (table_rc, _) = new_random_heap_table(2, rows);
    let table = table_rc.rl();
    let table_id = table.get_id();

    // collect every other tuple of the table
    let tx = Transaction::new();
    let scan = SequentialScan::new(&tx, table_id).unwrap();
    let victims: Vec<_> = scan.enumerate().filter(|(i, _)| i % 2 == 0).collect();
    tx.commit().unwrap();

    let tx = Transaction::new();
    for (_, tuple) in victims {
        let mut tuple = tuple;
        assert!(tuple.get_record_id().is_some());
        Database::buffer_pool()
            .delete_tuple(&tx, table_id, &mut tuple)
            .unwrap();
        assert_eq!(tuple.get_record_id(), None);
    }
    tx.commit().unwrap();

    let tx = Transaction::new();
    let scan = SequentialScan::new(&tx, table_id).unwrap();
    assert_eq!(scan.count(), rows / 2);
    tx.commit().unwrap();
}

#[test]
fn test_deleted_slots_are_reused() {
    let _guard = setup();

    let (table_rc, _) = new_random_heap_table(1, 100);
    let table = table_rc.rl();
    let table_id = table.get_id();
    let pages_before = table.num_pages();

    // delete a tuple, then insert a new one: the file must not grow
    let tx = Transaction::new();
    let mut scan = SequentialScan::new(&tx, table_id).unwrap();
    let mut victim = scan.next().unwrap();
    drop(scan);
    Database::buffer_pool()
        .delete_tuple(&tx, table_id, &mut victim)
        .unwrap();

    let mut tuple = mini_db::storage::tuple::Tuple::new_int_tuple(7, 1);
    Database::buffer_pool()
        .insert_tuple(&tx, table_id, &mut tuple)
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(table.num_pages(), pages_before);
    assert_eq!(tuple.get_record_id().unwrap().pid.page_index, 0);
}
