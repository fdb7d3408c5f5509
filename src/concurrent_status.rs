use core::fmt;
use std::{
    collections::{HashMap, HashSet},
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use log::debug;

use crate::{error::DbError, page::PageId, transaction::Transaction, types::DbResult};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Lock {
    SLock,
    XLock,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn to_lock(&self) -> Lock {
        match self {
            Permission::ReadOnly => Lock::SLock,
            Permission::ReadWrite => Lock::XLock,
        }
    }
}

#[derive(Default)]
struct LockTables {
    s_latch_map: HashMap<PageId, HashSet<Transaction>>,
    x_latch_map: HashMap<PageId, Transaction>,

    hold_pages: HashMap<Transaction, HashSet<PageId>>,
}

impl LockTables {
    // Try to add a lock on the given page. This api is idempotent.
    //
    // Invariant kept here: a page has at most one exclusive holder, and if
    // there is an exclusive holder it is the only holder.
    //
    // # Return
    //
    // Whether the lock was granted.
    fn add_latch(&mut self, tx: &Transaction, lock: &Lock, pid: &PageId) -> bool {
        if let Some(holder) = self.x_latch_map.get(pid) {
            if holder != tx {
                return false;
            }
        }

        match lock {
            Lock::SLock => {
                self.s_latch_map
                    .entry(*pid)
                    .or_insert_with(HashSet::new)
                    .insert(tx.clone());
            }
            Lock::XLock => {
                if let Some(readers) = self.s_latch_map.get(pid) {
                    if readers.iter().any(|t| t != tx) {
                        return false;
                    }
                }

                // the requester may be the sole reader, upgrade in place
                if let Some(readers) = self.s_latch_map.get_mut(pid) {
                    readers.remove(tx);
                    if readers.is_empty() {
                        self.s_latch_map.remove(pid);
                    }
                }

                self.x_latch_map.insert(*pid, tx.clone());
            }
        }

        self.hold_pages
            .entry(tx.clone())
            .or_insert_with(HashSet::new)
            .insert(*pid);
        true
    }

    fn release_latch(&mut self, tx: &Transaction, pid: &PageId) {
        if let Some(readers) = self.s_latch_map.get_mut(pid) {
            readers.remove(tx);
            if readers.is_empty() {
                self.s_latch_map.remove(pid);
            }
        }

        if self.x_latch_map.get(pid) == Some(tx) {
            self.x_latch_map.remove(pid);
        }
    }
}

/// The page lock manager. Shared/exclusive locks with transaction identity,
/// held until `release_latches` at transaction completion.
///
/// Both latch maps live under a single monitor; blocked acquisitions wait on
/// the condition variable until a conflicting holder releases. There is no
/// deadlock detection, a conflicting schedule runs into the acquisition
/// timeout and gets an abort error.
pub struct ConcurrentStatus {
    tables: Mutex<LockTables>,
    waiters: Condvar,
}

impl ConcurrentStatus {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(LockTables::default()),
            waiters: Condvar::new(),
        }
    }

    /// Acquire a lock on the given page on behalf of the transaction,
    /// blocking while another transaction holds a conflicting lock.
    pub fn request_latch(&self, tx: &Transaction, lock: &Lock, pid: &PageId) -> DbResult {
        let start = Instant::now();
        let mut tables = self.tables.lock().unwrap();
        loop {
            if tables.add_latch(tx, lock, pid) {
                debug!("lock acquired, tx: {}, lock: {:?}, page: {}", tx, lock, pid);
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= ACQUIRE_TIMEOUT {
                return Err(DbError::TransactionAborted(format!(
                    "acquire lock timeout, tx: {}, lock: {:?}, page: {}",
                    tx, lock, pid
                )));
            }

            let (guard, _) = self
                .waiters
                .wait_timeout(tables, ACQUIRE_TIMEOUT - elapsed)
                .unwrap();
            tables = guard;
        }
    }

    pub fn release_latch(&self, tx: &Transaction, pid: &PageId) {
        let mut tables = self.tables.lock().unwrap();
        tables.release_latch(tx, pid);
        if let Some(pages) = tables.hold_pages.get_mut(tx) {
            pages.remove(pid);
        }
        self.waiters.notify_all();
    }

    /// Release every lock the transaction holds and wake all waiters.
    pub fn release_latches(&self, tx: &Transaction) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(pages) = tables.hold_pages.remove(tx) {
            for pid in pages {
                tables.release_latch(tx, &pid);
            }
        }
        self.waiters.notify_all();
    }

    /// Whether the transaction holds any lock on the page.
    pub fn holds_latch(&self, tx: &Transaction, pid: &PageId) -> bool {
        let tables = self.tables.lock().unwrap();

        if let Some(readers) = tables.s_latch_map.get(pid) {
            if readers.contains(tx) {
                return true;
            }
        }
        tables.x_latch_map.get(pid) == Some(tx)
    }

    pub fn clear(&self) {
        let mut tables = self.tables.lock().unwrap();
        tables.s_latch_map.clear();
        tables.x_latch_map.clear();
        tables.hold_pages.clear();
        self.waiters.notify_all();
    }
}

impl fmt::Display for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tables = self.tables.lock().unwrap();

        writeln!(f, "s_latch_map: {{")?;
        for (pid, txs) in tables.s_latch_map.iter() {
            writeln!(f, "\t{} -> {:?}", pid, txs)?;
        }
        writeln!(f, "}}")?;

        writeln!(f, "x_latch_map: {{")?;
        for (pid, tx) in tables.x_latch_map.iter() {
            writeln!(f, "\t{} -> {:?}", pid, tx)?;
        }
        writeln!(f, "}}")?;

        writeln!(f, "hold_pages: {{")?;
        for (tx, pids) in tables.hold_pages.iter() {
            writeln!(f, "\t{:?} -> {:?}", tx, pids)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
