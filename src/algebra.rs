//! Relational algebra for flatdb
//!
//! A [`View`] is a lazy composition of row indices over one or more
//! tables; no intermediate rows are materialised. The load-bearing
//! invariant is positional alignment: the view keeps one index tuple per
//! result row, with one slot per referenced table, so every transformation
//! (select, cross, join, project) reshapes all tables together. Cells are
//! only read from disk while filtering and in [`View::read_row`].

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::storage::{Row, Table};

/// An alias's backing table and column
#[derive(Debug, Clone)]
pub struct ColumnRef {
    /// Name of the backing table
    pub table: String,
    /// Column name within that table
    pub column: String,
}

/// One table referenced by a view
#[derive(Debug, Clone)]
struct ViewTable<'a> {
    name: String,
    table: &'a Table,
}

/// A lazy row-index view over one or more tables.
///
/// Cloning a view yields an independent copy; transformations on one never
/// disturb the other.
#[derive(Debug, Clone)]
pub struct View<'a> {
    /// Referenced tables, in the order they joined the view
    tables: Vec<ViewTable<'a>>,
    /// Aligned index tuples: `rows[i][t]` is the row number of result `i`
    /// in table `t`
    rows: Vec<Vec<usize>>,
    /// Column aliases
    columns: HashMap<String, ColumnRef>,
}

impl<'a> View<'a> {
    /// Create an empty view
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            rows: Vec::new(),
            columns: HashMap::new(),
        }
    }

    /// Start the view on `table`, keeping every row and importing every
    /// column as an alias of the same name.
    ///
    /// Only valid on an empty view; further tables join through
    /// [`View::cross`] or [`View::nl_join`].
    pub fn prepare_table(&mut self, table: &'a Table) -> Result<()> {
        if !self.tables.is_empty() {
            if self.table_index(table.name()).is_some() {
                return Err(Error::TableAlreadyPrepared(table.name().to_string()));
            }
            return Err(Error::ViewNotEmpty);
        }
        let n = table.number_of_rows()?;
        self.register(table)?;
        self.rows = (0..n).map(|rn| vec![rn]).collect();
        Ok(())
    }

    /// Number of result rows
    pub fn number_of_rows(&self) -> usize {
        self.rows.len()
    }

    /// The kept row numbers of `table`, in result order
    pub fn row_numbers(&self, table: &str) -> Result<Vec<usize>> {
        let t = self
            .table_index(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;
        Ok(self.rows.iter().map(|tuple| tuple[t]).collect())
    }

    /// Keep only the result rows whose trimmed cell under `alias`
    /// satisfies the predicate. Tombstoned rows of the alias's table are
    /// dropped regardless.
    ///
    /// The surviving positions re-index every table in the view, so joined
    /// tables stay aligned.
    pub fn select<F>(&mut self, alias: &str, predicate: F) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        let colref = self
            .columns
            .get(alias)
            .cloned()
            .ok_or_else(|| Error::AliasNotFound(alias.to_string()))?;
        let t = self
            .table_index(&colref.table)
            .ok_or_else(|| Error::TableNotFound(colref.table.clone()))?;
        let table = self.tables[t].table;

        let mut kept = Vec::with_capacity(self.rows.len());
        for tuple in &self.rows {
            let rn = tuple[t];
            if table.tombstoned(rn)? {
                continue;
            }
            let cell = table.read_column(rn, &colref.column)?;
            if predicate(cell.trim()) {
                kept.push(tuple.clone());
            }
        }
        self.rows = kept;
        Ok(())
    }

    /// Drop every alias not in `keep`; tables left without aliases leave
    /// the view entirely.
    pub fn project(&mut self, keep: &[&str]) -> Result<()> {
        for alias in keep {
            if !self.columns.contains_key(*alias) {
                return Err(Error::AliasNotFound(alias.to_string()));
            }
        }
        self.columns.retain(|alias, _| keep.contains(&alias.as_str()));

        let used: HashSet<String> = self.columns.values().map(|c| c.table.clone()).collect();
        let kept_slots: Vec<usize> = self
            .tables
            .iter()
            .enumerate()
            .filter(|(_, vt)| used.contains(&vt.name))
            .map(|(i, _)| i)
            .collect();
        if kept_slots.len() == self.tables.len() {
            return Ok(());
        }

        self.rows = self
            .rows
            .iter()
            .map(|tuple| kept_slots.iter().map(|&i| tuple[i]).collect())
            .collect();
        let mut slot = 0;
        self.tables.retain(|_| {
            let keep = kept_slots.contains(&slot);
            slot += 1;
            keep
        });
        Ok(())
    }

    /// Rename an alias
    pub fn redefine(&mut self, old: &str, new: &str) -> Result<()> {
        if self.columns.contains_key(new) {
            return Err(Error::AliasAlreadyExists(new.to_string()));
        }
        let colref = self
            .columns
            .remove(old)
            .ok_or_else(|| Error::AliasNotFound(old.to_string()))?;
        self.columns.insert(new.to_string(), colref);
        Ok(())
    }

    /// Cartesian product with `table`.
    ///
    /// Each existing index tuple is repeated once per row of `table`, block
    /// by block: the existing sequences repeat whole, while each new row
    /// number runs over one full block of them.
    pub fn cross(&mut self, table: &'a Table) -> Result<()> {
        let m = table.number_of_rows()?;
        let first = self.tables.is_empty();
        self.register(table)?;
        if first {
            self.rows = (0..m).map(|rn| vec![rn]).collect();
            return Ok(());
        }

        let old = std::mem::take(&mut self.rows);
        let mut rows = Vec::with_capacity(m * old.len());
        for rn in 0..m {
            for tuple in &old {
                let mut next = tuple.clone();
                next.push(rn);
                rows.push(next);
            }
        }
        self.rows = rows;
        Ok(())
    }

    /// Nested-loop equi-join: keep each pairing of a current result row
    /// with a row of `table` whose trimmed `column` cell equals the trimmed
    /// cell under `alias`. Tombstoned rows on either side never pair.
    pub fn nl_join(&mut self, alias: &str, table: &'a Table, column: &str) -> Result<()> {
        if self.table_index(table.name()).is_some() {
            return Err(Error::TableAlreadyPrepared(table.name().to_string()));
        }
        let colref = self
            .columns
            .get(alias)
            .cloned()
            .ok_or_else(|| Error::AliasNotFound(alias.to_string()))?;
        let t = self
            .table_index(&colref.table)
            .ok_or_else(|| Error::TableNotFound(colref.table.clone()))?;
        if !table.schema().contains(column) {
            return Err(Error::ColumnNotFound(
                column.to_string(),
                table.name().to_string(),
            ));
        }
        let left = self.tables[t].table;
        let m = table.number_of_rows()?;

        let mut rows = Vec::new();
        for tuple in &self.rows {
            let rn1 = tuple[t];
            if left.tombstoned(rn1)? {
                continue;
            }
            let cell = left.read_column(rn1, &colref.column)?;
            let cell = cell.trim();
            for rn2 in 0..m {
                if table.tombstoned(rn2)? {
                    continue;
                }
                if cell == table.read_column(rn2, column)?.trim() {
                    let mut next = tuple.clone();
                    next.push(rn2);
                    rows.push(next);
                }
            }
        }
        self.register(table)?;
        self.rows = rows;
        Ok(())
    }

    /// Assemble result row `i` by reading one cell per alias.
    ///
    /// Panics if `i` is out of range; see [`View::number_of_rows`].
    pub fn read_row(&self, i: usize) -> Result<Row> {
        let tuple = &self.rows[i];
        let mut row = Row::new();
        for (alias, colref) in &self.columns {
            let t = self
                .table_index(&colref.table)
                .expect("aliased table is in the view");
            let cell = self.tables[t].table.read_column(tuple[t], &colref.column)?;
            row.insert(alias.clone(), cell);
        }
        Ok(row)
    }

    /// Add a table slot and import its columns as aliases. A colliding
    /// alias is silently rebound to the newer table.
    fn register(&mut self, table: &'a Table) -> Result<()> {
        if self.table_index(table.name()).is_some() {
            return Err(Error::TableAlreadyPrepared(table.name().to_string()));
        }
        self.tables.push(ViewTable {
            name: table.name().to_string(),
            table,
        });
        for column in table.schema().order() {
            self.columns.insert(
                column.clone(),
                ColumnRef {
                    table: table.name().to_string(),
                    column: column.clone(),
                },
            );
        }
        Ok(())
    }

    fn table_index(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|vt| vt.name == name)
    }
}

impl Default for View<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::predicate;
    use crate::storage::DELETE_MARKER;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn create_test_db(dir: &std::path::Path) -> Database {
        let mut db = Database::open(dir).unwrap();
        db.new_table("FRIEND").unwrap();
        db.add_column("FRIEND", "NAME", 20).unwrap();
        db.add_column("FRIEND", "AGE", 2).unwrap();
        db.new_table("CONTACT").unwrap();
        db.add_column("CONTACT", "NAME", 20).unwrap();
        db.add_column("CONTACT", "WEB", 12).unwrap();
        db
    }

    fn populate(db: &Database) {
        let friend = db.table("FRIEND").unwrap();
        friend.insert(&row(&[("NAME", "Buzz"), ("AGE", "18")])).unwrap();
        friend.insert(&row(&[("NAME", "Woody"), ("AGE", "30")])).unwrap();
        friend.insert(&row(&[("NAME", "Rex"), ("AGE", "9")])).unwrap();

        let contact = db.table("CONTACT").unwrap();
        contact
            .insert(&row(&[("NAME", "Buzz"), ("WEB", "Twitter")]))
            .unwrap();
        contact
            .insert(&row(&[("NAME", "Buzz"), ("WEB", "FB")]))
            .unwrap();
        contact
            .insert(&row(&[("NAME", "Woody"), ("WEB", "FB")]))
            .unwrap();
    }

    #[test]
    fn test_prepare_table_imports_all_rows_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());
        populate(&db);

        let mut view = View::new();
        view.prepare_table(db.table("FRIEND").unwrap()).unwrap();
        assert_eq!(view.number_of_rows(), 3);
        assert_eq!(view.row_numbers("FRIEND").unwrap(), vec![0, 1, 2]);

        let first = view.read_row(0).unwrap();
        assert_eq!(first["NAME"].trim(), "Buzz");
        assert_eq!(first[DELETE_MARKER], " ");
    }

    #[test]
    fn test_prepare_table_rejects_duplicates_and_nonempty_views() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());

        let mut view = View::new();
        let friend = db.table("FRIEND").unwrap();
        view.prepare_table(friend).unwrap();
        assert!(matches!(
            view.prepare_table(friend),
            Err(Error::TableAlreadyPrepared(_))
        ));
        assert!(matches!(
            view.prepare_table(db.table("CONTACT").unwrap()),
            Err(Error::ViewNotEmpty)
        ));
    }

    #[test]
    fn test_select_filters_and_drops_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());
        populate(&db);
        db.table("FRIEND").unwrap().delete_row(1).unwrap();

        let mut view = View::new();
        view.prepare_table(db.table("FRIEND").unwrap()).unwrap();
        view.select("AGE", |cell| predicate::less_than(cell, "100"))
            .unwrap();
        // Woody is tombstoned and must not appear despite matching
        assert_eq!(view.row_numbers("FRIEND").unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_select_unknown_alias() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());

        let mut view = View::new();
        view.prepare_table(db.table("FRIEND").unwrap()).unwrap();
        assert!(matches!(
            view.select("EMAIL", |_| true),
            Err(Error::AliasNotFound(_))
        ));
    }

    #[test]
    fn test_cross_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());
        populate(&db);

        let mut view = View::new();
        view.prepare_table(db.table("FRIEND").unwrap()).unwrap();
        view.cross(db.table("CONTACT").unwrap()).unwrap();

        assert_eq!(view.number_of_rows(), 9);
        // existing sequence repeats whole, one block per CONTACT row
        assert_eq!(
            view.row_numbers("FRIEND").unwrap(),
            vec![0, 1, 2, 0, 1, 2, 0, 1, 2]
        );
        assert_eq!(
            view.row_numbers("CONTACT").unwrap(),
            vec![0, 0, 0, 1, 1, 1, 2, 2, 2]
        );
    }

    #[test]
    fn test_nl_join_pairs_matching_live_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());
        populate(&db);

        let mut view = View::new();
        view.prepare_table(db.table("CONTACT").unwrap()).unwrap();
        view.nl_join("NAME", db.table("FRIEND").unwrap(), "NAME")
            .unwrap();

        assert_eq!(view.row_numbers("CONTACT").unwrap(), vec![0, 1, 2]);
        assert_eq!(view.row_numbers("FRIEND").unwrap(), vec![0, 0, 1]);

        // select on the joined view keeps both tables aligned
        view.select("WEB", |cell| predicate::equals(cell, "FB"))
            .unwrap();
        assert_eq!(view.row_numbers("CONTACT").unwrap(), vec![1, 2]);
        assert_eq!(view.row_numbers("FRIEND").unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_view_alignment_invariant() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());
        populate(&db);

        let mut view = View::new();
        view.prepare_table(db.table("CONTACT").unwrap()).unwrap();
        view.nl_join("NAME", db.table("FRIEND").unwrap(), "NAME")
            .unwrap();
        view.select("WEB", |cell| predicate::equals(cell, "FB"))
            .unwrap();

        assert_eq!(
            view.row_numbers("CONTACT").unwrap().len(),
            view.row_numbers("FRIEND").unwrap().len()
        );
        assert_eq!(
            view.number_of_rows(),
            view.row_numbers("CONTACT").unwrap().len()
        );
    }

    #[test]
    fn test_project_drops_aliases_and_orphaned_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());
        populate(&db);

        let mut view = View::new();
        view.prepare_table(db.table("CONTACT").unwrap()).unwrap();
        view.nl_join("NAME", db.table("FRIEND").unwrap(), "NAME")
            .unwrap();
        view.project(&["WEB"]).unwrap();

        assert!(matches!(
            view.row_numbers("FRIEND"),
            Err(Error::TableNotFound(_))
        ));
        let first = view.read_row(0).unwrap();
        assert_eq!(first.len(), 1);
        assert!(first.contains_key("WEB"));

        assert!(matches!(
            view.project(&["NAME"]),
            Err(Error::AliasNotFound(_))
        ));
    }

    #[test]
    fn test_redefine() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());
        populate(&db);

        let mut view = View::new();
        view.prepare_table(db.table("FRIEND").unwrap()).unwrap();
        view.redefine("NAME", "FRIEND_NAME").unwrap();

        assert!(view.read_row(0).unwrap().contains_key("FRIEND_NAME"));
        assert!(matches!(
            view.redefine("NAME", "X"),
            Err(Error::AliasNotFound(_))
        ));
        assert!(matches!(
            view.redefine("AGE", "FRIEND_NAME"),
            Err(Error::AliasAlreadyExists(_))
        ));
    }

    #[test]
    fn test_clone_is_independent() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());
        populate(&db);

        let mut view = View::new();
        view.prepare_table(db.table("FRIEND").unwrap()).unwrap();

        let mut filtered = view.clone();
        filtered
            .select("NAME", |cell| predicate::equals(cell, "Buzz"))
            .unwrap();

        assert_eq!(filtered.number_of_rows(), 1);
        assert_eq!(view.number_of_rows(), 3);
    }
}
