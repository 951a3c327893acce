//! Trigger dispatch for flatdb
//!
//! Triggers are rows in the reserved `~before`/`~after` meta-tables; each
//! names a function in the process-wide registry and the table, column and
//! operation it guards. Dispatch runs the meta-table through the
//! relational algebra once per mutated column, so constraint enforcement
//! exercises the same query machinery as user queries.
//!
//! The registry starts out with the four builtin constraint triggers and
//! accepts user registrations under any other key. Persisted trigger rows
//! refer to functions by this string key only.

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

use tracing::trace;

use crate::algebra::View;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::predicate;
use crate::storage::Row;

/// Mutation kind a trigger row is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    Update,
    Delete,
}

impl Op {
    /// The wire form stored in the meta-table `operation` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Insert => "insert",
            Op::Update => "update",
            Op::Delete => "delete",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments handed to every trigger invocation.
///
/// `row1` is the new row on insert and the old row on update/delete;
/// `row2` is the incoming row on update and absent otherwise.
pub struct TriggerParams<'a> {
    pub db: &'a Database,
    pub table: &'a str,
    pub column: &'a str,
    pub op: Op,
    pub row1: &'a Row,
    pub row2: Option<&'a Row>,
}

/// A registered trigger function.
///
/// The slice holds the extra positional parameters from the trigger row's
/// `parameters` column, split on `;`.
pub type TriggerFn = fn(&TriggerParams<'_>, &[String]) -> Result<()>;

static REGISTRY: OnceLock<RwLock<HashMap<String, TriggerFn>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, TriggerFn>> {
    REGISTRY.get_or_init(|| {
        let mut builtins: HashMap<String, TriggerFn> = HashMap::new();
        builtins.insert("pk".to_string(), pk as TriggerFn);
        builtins.insert("fk".to_string(), fk as TriggerFn);
        builtins.insert("update_restricted".to_string(), restricted as TriggerFn);
        builtins.insert("delete_restricted".to_string(), restricted as TriggerFn);
        RwLock::new(builtins)
    })
}

/// Register a trigger function under a key usable in trigger rows
pub fn register(name: &str, function: TriggerFn) {
    registry()
        .write()
        .unwrap()
        .insert(name.to_string(), function);
}

fn lookup(name: &str) -> Option<TriggerFn> {
    registry().read().unwrap().get(name).copied()
}

/// Fire every trigger applicable to one mutation.
///
/// `view` must already be filtered to the mutated table. For each column
/// of `row1` the view is narrowed by column and operation, and every
/// surviving trigger row's function is invoked.
pub fn dispatch(
    db: &Database,
    view: &View<'_>,
    table: &str,
    op: Op,
    row1: &Row,
    row2: Option<&Row>,
) -> Result<()> {
    for column in row1.keys() {
        let mut matches = view.clone();
        matches.select("column", |cell| predicate::equals(cell, column))?;
        matches.select("operation", |cell| predicate::equals(cell, op.as_str()))?;

        for i in 0..matches.number_of_rows() {
            let trigger_row = matches.read_row(i)?;
            let name = trigger_row
                .get("function")
                .map(|f| f.trim())
                .unwrap_or_default();
            let function =
                lookup(name).ok_or_else(|| Error::TriggerNotFound(name.to_string()))?;
            let parameters = split_parameters(
                trigger_row
                    .get("parameters")
                    .map(|p| p.trim())
                    .unwrap_or_default(),
            );
            trace!(table, column = %column, op = %op, trigger = name, "firing trigger");
            function(
                &TriggerParams {
                    db,
                    table,
                    column,
                    op,
                    row1,
                    row2,
                },
                &parameters,
            )?;
        }
    }
    Ok(())
}

fn split_parameters(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(';').map(|p| p.trim().to_string()).collect()
}

/// Primary-key check: the incoming value must not already appear in the
/// column, tombstoned rows included.
fn pk(p: &TriggerParams<'_>, _parameters: &[String]) -> Result<()> {
    let value = match p.op {
        Op::Update => p.row2.and_then(|row| row.get(p.column)),
        _ => p.row1.get(p.column),
    };
    let Some(value) = value else {
        return Ok(());
    };
    let value = value.trim();

    let table = p.db.table(p.table)?;
    for n in 0..table.number_of_rows()? {
        if table.read_column(n, p.column)?.trim() == value {
            return Err(Error::PrimaryKeyViolation {
                table: p.table.to_string(),
                column: p.column.to_string(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

/// Foreign-key check: the incoming value must appear in a live row of the
/// parent column.
fn fk(p: &TriggerParams<'_>, parameters: &[String]) -> Result<()> {
    let [parent_table, parent_column] = parameters else {
        return Err(Error::InvalidTriggerParameters("fk".to_string()));
    };
    let value = match p.row2 {
        Some(new_row) => new_row.get(p.column),
        None => p.row1.get(p.column),
    };
    let Some(value) = value else {
        return Ok(());
    };
    let value = value.trim();

    let parent = p.db.table(parent_table)?;
    for n in 0..parent.number_of_rows()? {
        if parent.tombstoned(n)? {
            continue;
        }
        if parent.read_column(n, parent_column)?.trim() == value {
            return Ok(());
        }
    }
    Err(Error::ForeignKeyViolation {
        table: p.table.to_string(),
        column: p.column.to_string(),
        value: value.to_string(),
        parent_table: parent_table.clone(),
        parent_column: parent_column.clone(),
    })
}

/// Referential restriction: the outgoing value must not still be
/// referenced by a live row of the child column. Covers both
/// `update_restricted` and `delete_restricted`.
fn restricted(p: &TriggerParams<'_>, parameters: &[String]) -> Result<()> {
    let [child_table, child_column] = parameters else {
        return Err(Error::InvalidTriggerParameters(format!(
            "{}_restricted",
            p.op
        )));
    };
    let Some(value) = p.row1.get(p.column) else {
        return Ok(());
    };
    let value = value.trim();

    let child = p.db.table(child_table)?;
    for n in 0..child.number_of_rows()? {
        if child.tombstoned(n)? {
            continue;
        }
        if child.read_column(n, child_column)?.trim() == value {
            return Err(Error::RestrictedViolation {
                operation: p.op.to_string(),
                table: p.table.to_string(),
                column: p.column.to_string(),
                value: value.to_string(),
                child_table: child_table.clone(),
                child_column: child_column.clone(),
            });
        }
    }
    Ok(())
}
