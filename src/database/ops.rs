//! Row operations for flatdb
//!
//! Insert, update and delete wrap the physical table mutation in the
//! trigger pipeline: a view over `~before` filtered to the target table is
//! dispatched first, then the mutation, then the same pass over `~after`.
//! A failing before-trigger aborts the operation before anything touches
//! the data file.
//!
//! The meta-tables themselves mutate through this same path; they carry no
//! triggers of their own, so the recursion terminates after one level.

use crate::algebra::View;
use crate::error::{Error, Result};
use crate::predicate;
use crate::storage::Row;
use crate::trigger::{self, Op};

use super::database::{Database, AFTER_TABLE, BEFORE_TABLE};

impl Database {
    /// Insert a row through the trigger pipeline. Returns the row number.
    pub fn insert(&self, table: &str, row: &Row) -> Result<usize> {
        self.fire_triggers(BEFORE_TABLE, table, Op::Insert, row, None)?;
        let n = self.table(table)?.insert(row)?;
        self.fire_triggers(AFTER_TABLE, table, Op::Insert, row, None)?;
        Ok(n)
    }

    /// Update row `n` through the trigger pipeline.
    ///
    /// Triggers see the old row as `row1` and the incoming cells as `row2`.
    pub fn update(&self, table: &str, n: usize, row: &Row) -> Result<()> {
        let old = self.live_row(table, n)?;
        self.fire_triggers(BEFORE_TABLE, table, Op::Update, &old, Some(row))?;
        self.table(table)?.update(n, row)?;
        self.fire_triggers(AFTER_TABLE, table, Op::Update, &old, Some(row))?;
        Ok(())
    }

    /// Tombstone row `n` through the trigger pipeline.
    pub fn delete(&self, table: &str, n: usize) -> Result<()> {
        let old = self.live_row(table, n)?;
        self.fire_triggers(BEFORE_TABLE, table, Op::Delete, &old, None)?;
        self.table(table)?.delete_row(n)?;
        self.fire_triggers(AFTER_TABLE, table, Op::Delete, &old, None)?;
        Ok(())
    }

    /// Snapshot row `n`, rejecting tombstoned targets before any trigger
    /// gets to run
    fn live_row(&self, table: &str, n: usize) -> Result<Row> {
        let t = self.table(table)?;
        if t.tombstoned(n)? {
            return Err(Error::RowDeleted {
                table: table.to_string(),
                row: n,
            });
        }
        t.read_row(n)
    }

    /// Dispatch the triggers registered for `table` in the given meta-table
    fn fire_triggers(
        &self,
        meta: &str,
        table: &str,
        op: Op,
        row1: &Row,
        row2: Option<&Row>,
    ) -> Result<()> {
        let mut view = View::new();
        view.prepare_table(self.table(meta)?)?;
        view.select("table", |cell| predicate::equals(cell, table))?;
        trigger::dispatch(self, &view, table, op, row1, row2)
    }
}
