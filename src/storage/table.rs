//! Table storage for flatdb
//!
//! A table is three files in the database directory: `<name>.data` holds
//! fixed-width records (cells padded to their declared byte width, one
//! newline per record), `<name>.def` holds the schema, and `<name>.log` is
//! an append-only audit trail of mutations. The data file is always exactly
//! `number_of_rows * row_length` bytes; deletion is logical, via the
//! reserved `~del` marker column.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::trace;

use super::schema::{Column, Schema, DELETE_MARKER};
use crate::error::{Error, Result};

/// A row as a column-name to cell-value mapping.
///
/// Cells read back from disk keep their padding; writers may pass unpadded
/// values and partial rows.
pub type Row = BTreeMap<String, String>;

/// A table backed by fixed-width records on disk
#[derive(Debug)]
pub struct Table {
    /// Table name (also the file stem)
    name: String,
    /// Database directory containing the table files
    dir: PathBuf,
    /// Column layout
    schema: Schema,
    /// Data file handle; guarded so reads can share `&self`
    data: Mutex<File>,
    /// Audit log handle
    log: Mutex<File>,
}

impl Table {
    /// Create a new empty table. The three files must not exist yet.
    pub(crate) fn create(dir: &Path, name: &str) -> Result<Self> {
        let dir = dir.to_path_buf();
        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(dir.join(format!("{name}.data")))?;
        let log = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(dir.join(format!("{name}.log")))?;
        fs::write(dir.join(format!("{name}.def")), "")?;

        Ok(Self {
            name: name.to_string(),
            dir,
            schema: Schema::new(),
            data: Mutex::new(data),
            log: Mutex::new(log),
        })
    }

    /// Open an existing table, parsing its schema from the `.def` file
    pub(crate) fn open(dir: &Path, name: &str) -> Result<Self> {
        let dir = dir.to_path_buf();
        let def = fs::read_to_string(dir.join(format!("{name}.def")))?;
        let schema = Schema::parse(&def)?;
        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join(format!("{name}.data")))?;
        let log = OpenOptions::new()
            .append(true)
            .create(true)
            .open(dir.join(format!("{name}.log")))?;

        Ok(Self {
            name: name.to_string(),
            dir,
            schema,
            data: Mutex::new(data),
            log: Mutex::new(log),
        })
    }

    /// Get the table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the table schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Path of the data file
    pub fn data_path(&self) -> PathBuf {
        self.dir.join(format!("{}.data", self.name))
    }

    /// Path of the schema file
    pub fn def_path(&self) -> PathBuf {
        self.dir.join(format!("{}.def", self.name))
    }

    /// Path of the audit log file
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.name))
    }

    /// Directory holding shared-lock marker files
    pub fn shared_dir(&self) -> PathBuf {
        self.dir.join(format!("{}.shared", self.name))
    }

    /// Path of the exclusive-lock file
    pub fn exclusive_path(&self) -> PathBuf {
        self.dir.join(format!("{}.exclusive", self.name))
    }

    /// Number of records in the data file, tombstoned rows included
    pub fn number_of_rows(&self) -> Result<usize> {
        let len = self.data.lock().unwrap().metadata()?.len() as usize;
        Ok(len / self.schema.row_length())
    }

    /// Read row `n` as a mapping of column name to raw, untrimmed cell
    pub fn read_row(&self, n: usize) -> Result<Row> {
        self.check_row(n)?;
        let mut buf = vec![0u8; self.schema.row_length()];
        {
            let mut file = self.data.lock().unwrap();
            self.seek_row(&mut file, n)?;
            file.read_exact(&mut buf)?;
        }

        let mut row = Row::new();
        for name in self.schema.order() {
            let col = self.schema.column(name).expect("ordered column exists");
            let cell = &buf[col.offset..col.offset + col.length];
            row.insert(name.clone(), String::from_utf8_lossy(cell).into_owned());
        }
        Ok(row)
    }

    /// Read a single raw cell
    pub fn read_column(&self, n: usize, column: &str) -> Result<String> {
        self.check_row(n)?;
        let col = self.column(column)?;
        let mut buf = vec![0u8; col.length];
        let mut file = self.data.lock().unwrap();
        self.seek_column(&mut file, n, &col)?;
        file.read_exact(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// True when row `n` carries the delete marker
    pub fn tombstoned(&self, n: usize) -> Result<bool> {
        if !self.schema.contains(DELETE_MARKER) {
            return Ok(false);
        }
        Ok(!self.read_column(n, DELETE_MARKER)?.trim().is_empty())
    }

    /// Append a row. Missing columns are written empty; every cell is
    /// padded or truncated to its declared width. Returns the new row number.
    pub fn insert(&self, row: &Row) -> Result<usize> {
        let mut record = Vec::with_capacity(self.schema.row_length());
        for name in self.schema.order() {
            let col = self.schema.column(name).expect("ordered column exists");
            let value = row.get(name).map(String::as_str).unwrap_or("");
            record.extend_from_slice(&pad_cell(value, col.length));
        }
        record.push(b'\n');

        let n = {
            let mut file = self.data.lock().unwrap();
            let end = file.seek(SeekFrom::End(0))?;
            file.write_all(&record)?;
            file.flush()?;
            end as usize / self.schema.row_length()
        };

        trace!(table = %self.name, row = n, "insert");
        self.log_op("Insert", &row_json(row)?)?;
        Ok(n)
    }

    /// Overwrite the cells of row `n` named in `row`; other columns keep
    /// their current contents. Unknown keys are ignored.
    pub fn update(&self, n: usize, row: &Row) -> Result<()> {
        self.check_row(n)?;
        if self.tombstoned(n)? {
            return Err(Error::RowDeleted {
                table: self.name.clone(),
                row: n,
            });
        }

        {
            let mut file = self.data.lock().unwrap();
            for (name, value) in row {
                if let Some(col) = self.schema.column(name) {
                    let col = col.clone();
                    self.seek_column(&mut file, n, &col)?;
                    file.write_all(&pad_cell(value, col.length))?;
                }
            }
            file.flush()?;
        }

        trace!(table = %self.name, row = n, "update");
        self.log_op("Update", &format!("{} {}", n, row_json(row)?))?;
        Ok(())
    }

    /// Mark row `n` as deleted by writing `'y'` to the delete marker
    pub fn delete_row(&self, n: usize) -> Result<()> {
        if !self.schema.contains(DELETE_MARKER) {
            return Err(Error::NoDeleteMarker(self.name.clone()));
        }
        self.check_row(n)?;
        if self.tombstoned(n)? {
            return Err(Error::RowDeleted {
                table: self.name.clone(),
                row: n,
            });
        }

        self.write_marker(n, b"y")?;
        trace!(table = %self.name, row = n, "delete");
        self.log_op("Delete", &n.to_string())?;
        Ok(())
    }

    /// Set or clear the delete marker without the tombstone check.
    ///
    /// Used by transaction rollback to re-tombstone inserts and revive
    /// deletes; idempotent, and not recorded in the audit log.
    pub(crate) fn set_tombstone(&self, n: usize, deleted: bool) -> Result<()> {
        if !self.schema.contains(DELETE_MARKER) {
            return Err(Error::NoDeleteMarker(self.name.clone()));
        }
        self.check_row(n)?;
        self.write_marker(n, if deleted { b"y" } else { b" " })
    }

    /// Append a column to the schema and `.def` file in place.
    ///
    /// Only valid while the table has no rows; otherwise the record layout
    /// on disk would no longer match the schema. [`Database::add_column`]
    /// routes non-empty tables through the rebuild protocol instead.
    ///
    /// [`Database::add_column`]: crate::database::Database::add_column
    pub(crate) fn add_column_in_place(&mut self, name: &str, length: usize) -> Result<()> {
        let mut def = OpenOptions::new().append(true).open(self.def_path())?;
        writeln!(def, "{name}:{length}")?;
        def.flush()?;
        self.schema.push(name, length);
        self.log_op("AddColumn", &format!("{name}:{length}"))
    }

    /// Drop a column from the schema, rewriting the `.def` file.
    ///
    /// Like [`Table::add_column_in_place`], only valid for empty tables.
    pub(crate) fn remove_column_in_place(&mut self, name: &str) -> Result<()> {
        self.schema.remove(name);
        fs::write(self.def_path(), self.schema.render())?;
        self.log_op("DeleteColumn", name)
    }

    fn column(&self, name: &str) -> Result<Column> {
        self.schema
            .column(name)
            .cloned()
            .ok_or_else(|| Error::ColumnNotFound(name.to_string(), self.name.clone()))
    }

    fn check_row(&self, n: usize) -> Result<()> {
        let rows = self.number_of_rows()?;
        if n >= rows {
            return Err(Error::RowOutOfBounds {
                table: self.name.clone(),
                row: n,
                rows,
            });
        }
        Ok(())
    }

    fn write_marker(&self, n: usize, marker: &[u8; 1]) -> Result<()> {
        let col = self.column(DELETE_MARKER)?;
        let mut file = self.data.lock().unwrap();
        self.seek_column(&mut file, n, &col)?;
        file.write_all(marker)?;
        file.flush()?;
        Ok(())
    }

    /// Position the cursor at the start of row `n`
    fn seek_row(&self, file: &mut File, n: usize) -> Result<()> {
        file.seek(SeekFrom::Start((n * self.schema.row_length()) as u64))?;
        Ok(())
    }

    /// Position the cursor at column `col` of row `n`
    fn seek_column(&self, file: &mut File, n: usize, col: &Column) -> Result<()> {
        file.seek(SeekFrom::Start(
            (n * self.schema.row_length() + col.offset) as u64,
        ))?;
        Ok(())
    }

    /// Append one `<unix_seconds>\t<kind>\t<details>` line to the audit log
    fn log_op(&self, kind: &str, details: &str) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        writeln!(log, "{}\t{}\t{}", unix_seconds(), kind, details)?;
        log.flush()?;
        Ok(())
    }
}

/// Pad or truncate a cell value to its declared byte width
fn pad_cell(value: &str, length: usize) -> Vec<u8> {
    let mut cell = value.as_bytes().to_vec();
    cell.truncate(length);
    cell.resize(length, b' ');
    cell
}

fn row_json(row: &Row) -> Result<String> {
    serde_json::to_string(row).map_err(|e| Error::Internal(e.to_string()))
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
