//! Advisory filesystem locks for flatdb
//!
//! Lock state lives next to the table files: `<name>.shared/` holds one
//! empty file per shared holder, named by transaction id, and
//! `<name>.exclusive` is a single-line file naming the exclusive holder.
//! The scheme is advisory only; the read-then-create window between
//! surveying and writing a lock file is a known race across processes.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::storage::Table;

/// Locks expire after this long; the next [`locks_of`] sweep reclaims them.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Current lock holders of one table
#[derive(Debug, Clone, Default)]
pub struct TableLocks {
    /// Transaction ids holding shared locks
    pub shared: Vec<String>,
    /// Transaction id holding the exclusive lock, if any
    pub exclusive: Option<String>,
}

/// Survey the lock files of `table`, garbage-collecting expired ones.
///
/// Age is measured from file modification time.
pub fn locks_of(table: &Table) -> Result<TableLocks> {
    let mut locks = TableLocks::default();

    let shared_dir = table.shared_dir();
    if shared_dir.is_dir() {
        for entry in fs::read_dir(&shared_dir)? {
            let entry = entry?;
            let Ok(holder) = entry.file_name().into_string() else {
                continue;
            };
            if expired(&entry.path())? {
                debug!(table = table.name(), holder = %holder, "reclaiming expired shared lock");
                fs::remove_file(entry.path())?;
                continue;
            }
            locks.shared.push(holder);
        }
    }

    let exclusive = table.exclusive_path();
    if exclusive.is_file() {
        if expired(&exclusive)? {
            debug!(table = table.name(), "reclaiming expired exclusive lock");
            fs::remove_file(&exclusive)?;
        } else {
            let holder = fs::read_to_string(&exclusive)?.trim().to_string();
            if !holder.is_empty() {
                locks.exclusive = Some(holder);
            }
        }
    }

    Ok(locks)
}

fn expired(path: &Path) -> Result<bool> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified.elapsed().unwrap_or_default() > LOCK_TIMEOUT)
}
