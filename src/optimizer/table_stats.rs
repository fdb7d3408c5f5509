use std::{
    cmp,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::debug;

use crate::{
    catalog::Table,
    database::Database,
    error::DbError,
    predicate::Op,
    sequential_scan::SequentialScan,
    storage::{
        schema::{Schema, Type},
        tuple::Cell,
    },
    transaction::Transaction,
    utils::HandyRwLock,
};

use super::histogram::{IntHistogram, StringHistogram};

pub const DEFAULT_IO_COST_PER_PAGE: usize = 1000;
pub const DEFAULT_HISTOGRAM_BINS: usize = 100;

static IO_COST_PER_PAGE: AtomicUsize = AtomicUsize::new(DEFAULT_IO_COST_PER_PAGE);
static HISTOGRAM_BINS: AtomicUsize = AtomicUsize::new(DEFAULT_HISTOGRAM_BINS);

pub fn get_io_cost_per_page() -> usize {
    IO_COST_PER_PAGE.load(Ordering::Relaxed)
}

pub fn set_io_cost_per_page(cost: usize) {
    IO_COST_PER_PAGE.store(cost, Ordering::Relaxed);
}

pub fn reset_io_cost_per_page() {
    IO_COST_PER_PAGE.store(DEFAULT_IO_COST_PER_PAGE, Ordering::Relaxed);
}

pub fn get_histogram_bins() -> usize {
    HISTOGRAM_BINS.load(Ordering::Relaxed)
}

pub fn set_histogram_bins(bins: usize) {
    HISTOGRAM_BINS.store(bins, Ordering::Relaxed);
}

pub fn reset_histogram_bins() {
    HISTOGRAM_BINS.store(DEFAULT_HISTOGRAM_BINS, Ordering::Relaxed);
}

/// Per-table statistics captured in a single scan: row count, page count,
/// and per-column value profiles. Histograms are built on demand when a
/// selectivity estimate is requested.
pub struct TableStats {
    io_cost_per_page: usize,

    ntups: usize,
    num_pages: usize,

    schema: Schema,

    // per int column
    min_values: Vec<Option<i32>>,
    max_values: Vec<Option<i32>>,

    // every value seen, per column
    columns: Vec<Vec<Cell>>,
}

impl TableStats {
    pub fn new(table_id: u32, io_cost_per_page: usize) -> Result<Self, DbError> {
        let table = Database::catalog().get_table(&table_id)?;
        let schema = table.get_schema();
        let num_pages = match &table {
            Table::Heap(t) => t.rl().num_pages(),
            Table::BTree(t) => t.rl().pages_count(),
        };

        let column_count = schema.fields.len();
        let mut min_values: Vec<Option<i32>> = vec![None; column_count];
        let mut max_values: Vec<Option<i32>> = vec![None; column_count];
        let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); column_count];
        let mut ntups = 0;

        let tx = Transaction::new();
        let mut scan = SequentialScan::new(&tx, table_id)?;
        for tuple in scan.by_ref() {
            ntups += 1;
            for i in 0..column_count {
                let cell = tuple.get_cell(i);
                if let Cell::Int(v) = cell {
                    min_values[i] = Some(match min_values[i] {
                        Some(m) => cmp::min(m, v),
                        None => v,
                    });
                    max_values[i] = Some(match max_values[i] {
                        Some(m) => cmp::max(m, v),
                        None => v,
                    });
                }
                columns[i].push(cell);
            }
        }
        scan.close();
        tx.commit()?;

        debug!(
            "table stats captured, table: {}, rows: {}, pages: {}",
            table_id, ntups, num_pages
        );

        Ok(Self {
            io_cost_per_page,
            ntups,
            num_pages,
            schema,
            min_values,
            max_values,
            columns,
        })
    }

    /// Estimated cost of a full sequential scan of the table.
    pub fn estimate_scan_cost(&self) -> f64 {
        (self.num_pages * self.io_cost_per_page) as f64
    }

    /// Estimated number of rows once a predicate with the given selectivity
    /// is applied.
    pub fn estimate_table_cardinality(&self, selectivity: f64) -> usize {
        (self.ntups as f64 * selectivity) as usize
    }

    pub fn total_tuples(&self) -> usize {
        self.ntups
    }

    /// Estimated selectivity of `column op cell`, from a fresh histogram of
    /// the column built with the configured number of bins.
    pub fn estimate_selectivity(
        &self,
        field_index: usize,
        op: Op,
        cell: &Cell,
    ) -> Result<f64, DbError> {
        if field_index >= self.schema.fields.len() {
            return Err(DbError::NoSuchField(format!(
                "field index {} out of range",
                field_index
            )));
        }
        if self.ntups == 0 {
            return Ok(0.0);
        }

        match self.schema.fields[field_index].field_type {
            Type::Int => {
                let v = match cell {
                    Cell::Int(v) => *v,
                    _ => {
                        return Err(DbError::SchemaMismatch(
                            "int column compared against a non-int cell".to_string(),
                        ))
                    }
                };
                let min = self.min_values[field_index].unwrap_or(0);
                let max = self.max_values[field_index].unwrap_or(0);

                let mut hist = IntHistogram::new(get_histogram_bins(), min, max);
                for cell in &self.columns[field_index] {
                    if let Cell::Int(v) = cell {
                        hist.add_value(*v);
                    }
                }
                Ok(hist.estimate_selectivity(op, v))
            }
            Type::Char(_) => {
                let s = match cell {
                    Cell::String(s) => s.clone(),
                    _ => {
                        return Err(DbError::SchemaMismatch(
                            "string column compared against a non-string cell".to_string(),
                        ))
                    }
                };

                let mut hist = StringHistogram::new(get_histogram_bins());
                for cell in &self.columns[field_index] {
                    if let Cell::String(v) = cell {
                        hist.add_value(v);
                    }
                }
                Ok(hist.estimate_selectivity(op, &s))
            }
        }
    }
}
