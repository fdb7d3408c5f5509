use crate::{
    catalog::Table,
    database::Database,
    error::DbError,
    heap_table::HeapTableIterator,
    storage::{schema::Schema, tuple::Tuple},
    transaction::Transaction,
    utils::HandyRwLock,
};

/// The table-scan access operator: opens a heap table cursor and exposes
/// the open/next/rewind/close surface the executor layer drives.
pub struct SequentialScan<'t> {
    pub table_id: u32,

    schema: Schema,

    it: HeapTableIterator<'t>,

    open: bool,
}

impl<'t> SequentialScan<'t> {
    pub fn new(tx: &'t Transaction, table_id: u32) -> Result<Self, DbError> {
        let table = Database::catalog().get_table(&table_id)?;
        let heap = match &table {
            Table::Heap(t) => t.clone(),
            Table::BTree(_) => {
                return Err(DbError::Internal(format!(
                    "table {} is not a heap table",
                    table_id
                )))
            }
        };

        let it = {
            let heap = heap.rl();
            HeapTableIterator::new(tx, &heap)
        };

        Ok(Self {
            table_id,
            schema: table.get_schema(),
            it,
            open: true,
        })
    }

    pub fn get_schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rewind(&mut self) {
        self.it.rewind();
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
    }
}

impl Iterator for SequentialScan<'_> {
    type Item = Tuple;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.open {
            return None;
        }
        self.it.next()
    }
}
