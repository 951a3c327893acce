//! Error types for flatdb
//!
//! This module defines all error types used throughout the database engine.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for flatdb
#[derive(Error, Debug)]
pub enum Error {
    // ========== Database Errors ==========
    #[error("Database error: '{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("Database error: table '{0}' not found")]
    TableNotFound(String),

    #[error("Database error: table '{0}' already exists")]
    TableAlreadyExists(String),

    // ========== Schema Errors ==========
    #[error("Schema error: column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Schema error: column '{0}' already exists in table '{1}'")]
    ColumnAlreadyExists(String, String),

    #[error("Schema error: name '{0}' exceeds 50 bytes")]
    NameTooLong(String),

    #[error("Schema error: column '{0}' is reserved and cannot be dropped")]
    ReservedColumn(String),

    #[error("Schema error: table '{0}' has no delete-marker column")]
    NoDeleteMarker(String),

    #[error("Schema error: malformed definition line '{0}'")]
    MalformedDefinition(String),

    // ========== Storage Errors ==========
    #[error("Storage error: row {row} out of bounds for table '{table}' ({rows} rows)")]
    RowOutOfBounds {
        table: String,
        row: usize,
        rows: usize,
    },

    #[error("Storage error: row {row} of table '{table}' is deleted")]
    RowDeleted { table: String, row: usize },

    // ========== Algebra Errors ==========
    #[error("Algebra error: table '{0}' is already part of the view")]
    TableAlreadyPrepared(String),

    #[error("Algebra error: the view already has tables; join further tables instead")]
    ViewNotEmpty,

    #[error("Algebra error: unknown column alias '{0}'")]
    AliasNotFound(String),

    #[error("Algebra error: column alias '{0}' already exists")]
    AliasAlreadyExists(String),

    // ========== Constraint Errors ==========
    #[error("Constraint error: duplicate value '{value}' for primary key {table}.{column}")]
    PrimaryKeyViolation {
        table: String,
        column: String,
        value: String,
    },

    #[error(
        "Constraint error: value '{value}' for {table}.{column} \
         has no match in {parent_table}.{parent_column}"
    )]
    ForeignKeyViolation {
        table: String,
        column: String,
        value: String,
        parent_table: String,
        parent_column: String,
    },

    #[error(
        "Constraint error: {operation} on {table}.{column} restricted, \
         value '{value}' is still referenced by {child_table}.{child_column}"
    )]
    RestrictedViolation {
        operation: String,
        table: String,
        column: String,
        value: String,
        child_table: String,
        child_column: String,
    },

    #[error("Constraint error: trigger function '{0}' is not registered")]
    TriggerNotFound(String),

    #[error("Constraint error: trigger '{0}' called with invalid parameters")]
    InvalidTriggerParameters(String),

    // ========== Lock Errors ==========
    #[error("Lock error: table '{table}' is locked by transaction {holder}")]
    LockConflict { table: String, holder: String },

    // ========== Transaction Errors ==========
    #[error("Transaction error: rolled back after failed {context}: {source}")]
    Aborted {
        context: String,
        #[source]
        source: Box<Error>,
    },

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for flatdb operations
pub type Result<T> = std::result::Result<T, Error>;
