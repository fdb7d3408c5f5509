use once_cell::sync::Lazy;

use crate::{
    buffer_pool::BufferPool, catalog::Catalog, concurrent_status::ConcurrentStatus,
    optimizer::table_stats,
};

static DATABASE: Lazy<Database> = Lazy::new(Database::new);

/// All process-global state lives here: the catalog, the buffer pool and
/// the lock manager. Components are handed out as `&'static` references so
/// no outer lock is ever held across a blocking lock acquisition; each
/// component guards its own state.
pub struct Database {
    catalog: Catalog,
    buffer_pool: BufferPool,
    concurrent_status: ConcurrentStatus,
}

impl Database {
    fn new() -> Self {
        Self {
            catalog: Catalog::new(),
            buffer_pool: BufferPool::new(),
            concurrent_status: ConcurrentStatus::new(),
        }
    }

    pub fn global() -> &'static Database {
        &DATABASE
    }

    pub fn catalog() -> &'static Catalog {
        &Self::global().catalog
    }

    pub fn buffer_pool() -> &'static BufferPool {
        &Self::global().buffer_pool
    }

    pub fn concurrent_status() -> &'static ConcurrentStatus {
        &Self::global().concurrent_status
    }

    /// Reset the in-memory state of the database, used by tests.
    ///
    /// Actions:
    /// - The buffer pool is emptied and its configuration restored.
    /// - The catalog is cleared.
    /// - All locks are dropped.
    /// - The optimizer configuration is restored.
    pub fn reset() {
        Self::buffer_pool().clear();
        Self::catalog().clear();
        Self::concurrent_status().clear();
        BufferPool::reset_page_size();
        BufferPool::reset_capacity();
        table_stats::reset_io_cost_per_page();
        table_stats::reset_histogram_bins();
    }
}
