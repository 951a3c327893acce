//! Database directory management for flatdb
//!
//! A database is a directory of tables. Opening it scans for table file
//! triples and instantiates a [`Table`] per distinct name; first-time
//! initialisation creates the two reserved trigger meta-tables `~before`
//! and `~after` and drops a `.init` flag file, so re-opening is idempotent.
//!
//! The database owns its tables by name. Schema mutation lives here rather
//! than on [`Table`] because changing a populated table runs the rebuild
//! protocol, which creates, swaps and renames sibling tables.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::storage::{Table, DELETE_MARKER, MAX_NAME_LEN};

/// Reserved meta-table holding before-triggers
pub const BEFORE_TABLE: &str = "~before";

/// Reserved meta-table holding after-triggers
pub const AFTER_TABLE: &str = "~after";

/// Flag file marking an initialised database directory
const INIT_FLAG: &str = ".init";

/// Columns every user table starts with
const DEFAULT_COLUMNS: &[(&str, usize)] = &[(DELETE_MARKER, 1)];

/// Schema of the two trigger meta-tables, `~del` excluded
const TRIGGER_COLUMNS: &[(&str, usize)] = &[
    ("table", 50),
    ("column", 50),
    ("operation", 6),
    ("function", 50),
    ("parameters", 50),
];

/// A directory-scoped set of tables
#[derive(Debug)]
pub struct Database {
    /// Database directory
    path: PathBuf,
    /// Tables by name
    tables: HashMap<String, Table>,
}

impl Database {
    /// Open a database directory, creating the trigger meta-tables on
    /// first use. The path must be an existing directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(Error::NotADirectory(path));
        }
        let mut db = Self {
            path,
            tables: HashMap::new(),
        };
        db.scan()?;
        db.init_dir()?;
        Ok(db)
    }

    /// Instantiate a table per distinct `<name>.(data|log|def)` file,
    /// skipping dotfiles
    fn scan(&mut self) -> Result<()> {
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            for ext in [".data", ".log", ".def"] {
                if let Some(stem) = file_name.strip_suffix(ext) {
                    names.insert(stem.to_string());
                }
            }
        }
        for name in names {
            let table = Table::open(&self.path, &name)?;
            self.tables.insert(name, table);
        }
        Ok(())
    }

    /// Create the reserved meta-tables unless the `.init` flag is present
    fn init_dir(&mut self) -> Result<()> {
        let flag = self.path.join(INIT_FLAG);
        if flag.exists() {
            return Ok(());
        }
        info!(path = %self.path.display(), "initialising database directory");
        for name in [BEFORE_TABLE, AFTER_TABLE] {
            self.new_table(name)?;
            for (column, length) in TRIGGER_COLUMNS {
                self.add_column(name, column, *length)?;
            }
        }
        fs::write(flag, "")?;
        Ok(())
    }

    /// Get a table by name
    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Check if a table exists
    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// List all table names
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Get the database directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a new empty table with the default columns
    pub fn new_table(&mut self, name: &str) -> Result<()> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong(name.to_string()));
        }
        if self.tables.contains_key(name) {
            return Err(Error::TableAlreadyExists(name.to_string()));
        }
        for ext in ["data", "log", "def"] {
            if self.path.join(format!("{name}.{ext}")).exists() {
                return Err(Error::TableAlreadyExists(name.to_string()));
            }
        }

        debug!(table = name, "create table");
        let mut table = Table::create(&self.path, name)?;
        fs::create_dir_all(table.shared_dir())?;
        for (column, length) in DEFAULT_COLUMNS {
            table.add_column_in_place(column, *length)?;
        }
        self.tables.insert(name.to_string(), table);
        Ok(())
    }

    /// Delete a table: unlink its files and lock directory
    pub fn delete_table(&mut self, name: &str) -> Result<()> {
        let table = self
            .tables
            .remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        debug!(table = name, "delete table");
        let data = table.data_path();
        let def = table.def_path();
        let log = table.log_path();
        let shared = table.shared_dir();
        let exclusive = table.exclusive_path();
        drop(table);

        fs::remove_file(data)?;
        fs::remove_file(def)?;
        fs::remove_file(log)?;
        if shared.is_dir() {
            fs::remove_dir_all(shared)?;
        }
        if exclusive.is_file() {
            fs::remove_file(exclusive)?;
        }
        Ok(())
    }

    /// Rename a table, moving every filesystem entry that belongs to it
    pub fn rename_table(&mut self, old: &str, new: &str) -> Result<()> {
        if new.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong(new.to_string()));
        }
        if self.tables.contains_key(new) {
            return Err(Error::TableAlreadyExists(new.to_string()));
        }
        let table = self
            .tables
            .remove(old)
            .ok_or_else(|| Error::TableNotFound(old.to_string()))?;
        debug!(from = old, to = new, "rename table");
        let shared = table.shared_dir();
        let exclusive = table.exclusive_path();
        drop(table);

        for ext in ["data", "log", "def"] {
            fs::rename(
                self.path.join(format!("{old}.{ext}")),
                self.path.join(format!("{new}.{ext}")),
            )?;
        }
        if shared.is_dir() {
            fs::rename(shared, self.path.join(format!("{new}.shared")))?;
        }
        if exclusive.is_file() {
            fs::rename(exclusive, self.path.join(format!("{new}.exclusive")))?;
        }

        let table = Table::open(&self.path, new)?;
        self.tables.insert(new.to_string(), table);
        Ok(())
    }

    /// Add a column to a table.
    ///
    /// An empty table is extended in place; a populated one goes through
    /// the rebuild protocol so existing records pick up the new layout.
    pub fn add_column(&mut self, table: &str, column: &str, length: usize) -> Result<()> {
        if column.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong(column.to_string()));
        }
        let rows = {
            let t = self.table(table)?;
            if t.schema().contains(column) {
                return Err(Error::ColumnAlreadyExists(
                    column.to_string(),
                    table.to_string(),
                ));
            }
            t.number_of_rows()?
        };

        debug!(table, column, length, "add column");
        if rows == 0 {
            self.tables
                .get_mut(table)
                .expect("table presence checked above")
                .add_column_in_place(column, length)
        } else {
            self.rebuild(table, Some((column, length)), None)
        }
    }

    /// Drop a column from a table. Reserved columns cannot be dropped.
    pub fn delete_column(&mut self, table: &str, column: &str) -> Result<()> {
        if DEFAULT_COLUMNS.iter().any(|(c, _)| *c == column) {
            return Err(Error::ReservedColumn(column.to_string()));
        }
        let rows = {
            let t = self.table(table)?;
            if !t.schema().contains(column) {
                return Err(Error::ColumnNotFound(column.to_string(), table.to_string()));
            }
            t.number_of_rows()?
        };

        debug!(table, column, "delete column");
        if rows == 0 {
            self.tables
                .get_mut(table)
                .expect("table presence checked above")
                .remove_column_in_place(column)
        } else {
            self.rebuild(table, None, Some(column))
        }
    }

    /// Rebuild a table's data file under a changed column layout.
    ///
    /// Creates a throwaway sibling table named `~<timestamp>`, copies the
    /// surviving column definitions (plus `add`, minus `drop_column`),
    /// re-inserts every live row, then deletes the original and renames
    /// the temp table into its place. Tombstoned records do not survive a
    /// rebuild, and the audit log starts over.
    fn rebuild(
        &mut self,
        table: &str,
        add: Option<(&str, usize)>,
        drop_column: Option<&str>,
    ) -> Result<()> {
        let (layout, rows) = {
            let t = self.table(table)?;
            let schema = t.schema();
            let mut layout = Vec::with_capacity(schema.len());
            for name in schema.order() {
                if DEFAULT_COLUMNS.iter().any(|(c, _)| c == name) {
                    continue;
                }
                if drop_column == Some(name.as_str()) {
                    continue;
                }
                let length = schema.column(name).expect("ordered column exists").length;
                layout.push((name.clone(), length));
            }
            if let Some((name, length)) = add {
                layout.push((name.to_string(), length));
            }

            let mut rows = Vec::new();
            for n in 0..t.number_of_rows()? {
                if t.tombstoned(n)? {
                    continue;
                }
                rows.push(t.read_row(n)?);
            }
            (layout, rows)
        };

        let tmp = format!("~{}", unix_micros());
        debug!(table, tmp = %tmp, live_rows = rows.len(), "rebuild data file");
        self.new_table(&tmp)?;
        {
            let t = self
                .tables
                .get_mut(&tmp)
                .expect("temp table was just created");
            for (column, length) in &layout {
                t.add_column_in_place(column, *length)?;
            }
        }
        {
            let t = self.table(&tmp)?;
            for row in &rows {
                t.insert(row)?;
            }
        }
        self.delete_table(table)?;
        self.rename_table(&tmp, table)?;
        Ok(())
    }
}

fn unix_micros() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros()
}
