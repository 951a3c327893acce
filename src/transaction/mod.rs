//! Transaction module
//!
//! This module contains the advisory filesystem locks and the undo-log
//! transaction wrapper.

pub mod locks;
pub mod transaction;

pub use locks::{locks_of, TableLocks, LOCK_TIMEOUT};
pub use transaction::Transaction;
