//! Transactions for flatdb
//!
//! A transaction couples the trigger-wrapped row operations with an
//! in-memory undo log and advisory table locks. Every successful mutation
//! appends an undo entry; any failure rolls the whole transaction back and
//! re-raises the error with context. The undo log never persists across a
//! process restart.

use std::fs::{self, File};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use super::locks::locks_of;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::storage::{Row, Table};

/// One entry of the in-memory undo log
#[derive(Debug, Clone)]
enum UndoEntry {
    Insert { table: String, row: usize },
    Update { table: String, row: usize, old: Row },
    Delete { table: String, row: usize },
}

/// A transaction over one database.
///
/// Reusable: after [`Transaction::commit`] or [`Transaction::rollback`]
/// the log is empty, locks are released, and the value can start over.
#[derive(Debug)]
pub struct Transaction {
    /// Wall-clock id, also the shared-lock file name
    id: String,
    /// Undo log, in operation order
    log: Vec<UndoEntry>,
    /// Names of tables this transaction holds locks on
    locked: Vec<String>,
}

impl Transaction {
    /// Start a fresh transaction with a monotonically increasing id
    pub fn new() -> Self {
        Self {
            id: next_id(),
            log: Vec::new(),
            locked: Vec::new(),
        }
    }

    /// The transaction id, formatted as float seconds since the epoch
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire the exclusive lock on `table`.
    ///
    /// Fails with [`Error::LockConflict`] while any other transaction
    /// holds a shared or exclusive lock. A shared lock held by this
    /// transaction is dropped first, then upgraded.
    pub fn e_lock(&mut self, table: &Table) -> Result<()> {
        let locks = locks_of(table)?;
        if let Some(holder) = &locks.exclusive {
            if holder != &self.id {
                return Err(Error::LockConflict {
                    table: table.name().to_string(),
                    holder: holder.clone(),
                });
            }
        }
        if let Some(holder) = locks.shared.iter().find(|h| **h != self.id) {
            return Err(Error::LockConflict {
                table: table.name().to_string(),
                holder: holder.clone(),
            });
        }
        if locks.shared.iter().any(|h| *h == self.id) {
            self.unlock(table)?;
        }

        fs::write(table.exclusive_path(), &self.id)?;
        self.remember(table);
        debug!(table = table.name(), id = %self.id, "exclusive lock acquired");
        Ok(())
    }

    /// Acquire a shared lock on `table`.
    ///
    /// Fails while another transaction holds the exclusive lock; an
    /// exclusive lock held by this transaction is downgraded.
    pub fn s_lock(&mut self, table: &Table) -> Result<()> {
        let locks = locks_of(table)?;
        if let Some(holder) = &locks.exclusive {
            if holder == &self.id {
                self.unlock(table)?;
            } else {
                return Err(Error::LockConflict {
                    table: table.name().to_string(),
                    holder: holder.clone(),
                });
            }
        }

        File::create(table.shared_dir().join(&self.id))?;
        self.remember(table);
        debug!(table = table.name(), id = %self.id, "shared lock acquired");
        Ok(())
    }

    /// Release whichever lock this transaction holds on `table`
    pub fn unlock(&mut self, table: &Table) -> Result<()> {
        let locks = locks_of(table)?;
        if locks.exclusive.as_deref() == Some(self.id.as_str()) {
            fs::remove_file(table.exclusive_path())?;
        } else if locks.shared.iter().any(|h| *h == self.id) {
            fs::remove_file(table.shared_dir().join(&self.id))?;
        }
        self.locked.retain(|name| name != table.name());
        debug!(table = table.name(), id = %self.id, "lock released");
        Ok(())
    }

    /// Insert a row; rolls the transaction back on failure
    pub fn insert(&mut self, db: &Database, table: &str, row: &Row) -> Result<usize> {
        match db.insert(table, row) {
            Ok(n) => {
                self.log.push(UndoEntry::Insert {
                    table: table.to_string(),
                    row: n,
                });
                Ok(n)
            }
            Err(source) => self.abort(db, format!("insert into '{table}'"), source),
        }
    }

    /// Update row `n`; rolls the transaction back on failure
    pub fn update(&mut self, db: &Database, table: &str, n: usize, row: &Row) -> Result<()> {
        // snapshot before the write so rollback can restore it
        let old = match db.table(table).and_then(|t| t.read_row(n)) {
            Ok(old) => old,
            Err(source) => return self.abort(db, format!("update of '{table}'"), source),
        };
        match db.update(table, n, row) {
            Ok(()) => {
                self.log.push(UndoEntry::Update {
                    table: table.to_string(),
                    row: n,
                    old,
                });
                Ok(())
            }
            Err(source) => self.abort(db, format!("update of '{table}'"), source),
        }
    }

    /// Tombstone row `n`; rolls the transaction back on failure
    pub fn delete_row(&mut self, db: &Database, table: &str, n: usize) -> Result<()> {
        match db.delete(table, n) {
            Ok(()) => {
                self.log.push(UndoEntry::Delete {
                    table: table.to_string(),
                    row: n,
                });
                Ok(())
            }
            Err(source) => self.abort(db, format!("delete from '{table}'"), source),
        }
    }

    /// Undo every logged operation in strict reverse order, then commit.
    ///
    /// Inserts are re-tombstoned, updates restored from their old-row
    /// snapshot, deletes revived by clearing the marker.
    pub fn rollback(&mut self, db: &Database) -> Result<()> {
        debug!(id = %self.id, entries = self.log.len(), "rollback");
        let entries = std::mem::take(&mut self.log);
        for entry in entries.iter().rev() {
            trace!(?entry, "undo");
            match entry {
                UndoEntry::Insert { table, row } => db.table(table)?.delete_row(*row)?,
                UndoEntry::Update { table, row, old } => db.table(table)?.update(*row, old)?,
                UndoEntry::Delete { table, row } => db.table(table)?.set_tombstone(*row, false)?,
            }
        }
        self.commit(db)
    }

    /// Release every held lock and clear the undo log
    pub fn commit(&mut self, db: &Database) -> Result<()> {
        debug!(id = %self.id, "commit");
        let locked = std::mem::take(&mut self.locked);
        for name in locked {
            if let Ok(table) = db.table(&name) {
                self.unlock(table)?;
            }
        }
        self.log.clear();
        Ok(())
    }

    fn remember(&mut self, table: &Table) {
        if !self.locked.iter().any(|name| name == table.name()) {
            self.locked.push(table.name().to_string());
        }
    }

    fn abort<T>(&mut self, db: &Database, context: String, source: Error) -> Result<T> {
        self.rollback(db)?;
        Err(Error::Aborted {
            context,
            source: Box::new(source),
        })
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

static LAST_ID_MICROS: AtomicU64 = AtomicU64::new(0);

/// Allocate a wall-clock id in float seconds.
///
/// An atomic high-water mark keeps ids strictly increasing even when two
/// transactions start within the same microsecond.
fn next_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    let mut prev = LAST_ID_MICROS.load(Ordering::Relaxed);
    let micros = loop {
        let candidate = now.max(prev + 1);
        match LAST_ID_MICROS.compare_exchange_weak(
            prev,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break candidate,
            Err(actual) => prev = actual,
        }
    };
    format!("{}.{:06}", micros / 1_000_000, micros % 1_000_000)
}
