//! Database module
//!
//! This module contains the database directory handling and the
//! trigger-wrapped row operations.

pub mod database;
mod ops;

pub use database::{Database, AFTER_TABLE, BEFORE_TABLE};
