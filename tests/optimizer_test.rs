mod test_utils;

use mini_db::{
    optimizer::table_stats::{self, TableStats},
    storage::tuple::Cell,
    utils::HandyRwLock,
    Op,
};

use test_utils::{new_random_heap_table, setup};

#[test]
fn test_table_stats_scan_cost() {
    let _guard = setup();

    let (table_rc, _) = new_random_heap_table(1, 2000);
    let table = table_rc.rl();
    let io_cost = 73;

    let stats = TableStats::new(table.get_id(), io_cost).unwrap();
    assert_eq!(stats.total_tuples(), 2000);
    assert_eq!(
        stats.estimate_scan_cost(),
        (table.num_pages() * io_cost) as f64
    );

    assert_eq!(stats.estimate_table_cardinality(0.5), 1000);
    assert_eq!(stats.estimate_table_cardinality(0.0), 0);
}

#[test]
fn test_table_stats_selectivity() {
    let _guard = setup();

    let (table_rc, values) = new_random_heap_table(2, 3000);
    let table = table_rc.rl();

    let stats = TableStats::new(table.get_id(), table_stats::get_io_cost_per_page()).unwrap();

    // compare the estimate of `column > v` against the true fraction
    let threshold = 0;
    let actual = values.iter().filter(|row| row[0] > threshold).count() as f64 / 3000.0;
    let estimated = stats
        .estimate_selectivity(0, Op::GreaterThan, &Cell::Int(threshold))
        .unwrap();
    assert!(
        (actual - estimated).abs() < 0.1,
        "actual: {}, estimated: {}",
        actual,
        estimated
    );

    // the full range selects everything, the empty range nothing
    let all = stats
        .estimate_selectivity(1, Op::GreaterThanOrEq, &Cell::Int(i32::MIN))
        .unwrap();
    assert_eq!(all, 1.0);
    let none = stats
        .estimate_selectivity(1, Op::GreaterThan, &Cell::Int(i32::MAX))
        .unwrap();
    assert_eq!(none, 0.0);
}

#[test]
fn test_table_stats_on_empty_table() {
    let _guard = setup();

    let (table_rc, _) = new_random_heap_table(1, 0);
    let table = table_rc.rl();

    let stats = TableStats::new(table.get_id(), 100).unwrap();
    assert_eq!(stats.total_tuples(), 0);
    assert_eq!(
        stats
            .estimate_selectivity(0, Op::Equals, &Cell::Int(1))
            .unwrap(),
        0.0
    );
}
