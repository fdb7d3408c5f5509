use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{database::Database, types::DbResult};

pub type TransactionID = u64;

static TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// A transaction handle. Ids are minted monotonically; the handle is cheap
/// to clone and is what the lock manager and dirty flags key on.
#[derive(Eq, PartialEq, Clone)]
pub struct Transaction {
    // increase monotonically by 1
    id: TransactionID,
}

impl Transaction {
    pub fn new() -> Self {
        let id = TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        Self { id }
    }

    pub fn get_id(&self) -> TransactionID {
        self.id
    }

    /// Flush this transaction's dirty pages to disk, then release all its
    /// locks. The pages are on disk when this returns.
    pub fn commit(&self) -> DbResult {
        Database::buffer_pool().tx_complete(self, true)
    }

    /// Restore the before-image of every page this transaction touched,
    /// then release all its locks.
    pub fn abort(&self) -> DbResult {
        Database::buffer_pool().tx_complete(self, false)
    }
}

impl std::hash::Hash for Transaction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
