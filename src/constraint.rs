//! Constraint registration for flatdb
//!
//! Constraints are nothing but trigger rows in the reserved `~before`
//! meta-table; registering one inserts rows, removing one deletes them by
//! attribute match. Enforcement happens in [`crate::trigger`] when the
//! guarded table mutates.

use crate::algebra::View;
use crate::database::{Database, BEFORE_TABLE};
use crate::error::Result;
use crate::predicate;
use crate::storage::Row;

/// Register a primary-key constraint on `table.column`
pub fn pk(db: &Database, table: &str, column: &str) -> Result<()> {
    for operation in ["insert", "update"] {
        db.insert(BEFORE_TABLE, &trigger_row(table, column, operation, "pk", ""))?;
    }
    Ok(())
}

/// Remove a primary-key constraint.
///
/// Matches every `pk` trigger row for the column regardless of operation.
pub fn remove_pk(db: &Database, table: &str, column: &str) -> Result<()> {
    remove_matching(
        db,
        &[("table", table), ("column", column), ("function", "pk")],
    )
}

/// Register a foreign-key constraint: `table.column` references
/// `parent_table.parent_column`.
///
/// Besides the forward checks on the child, this guards the parent against
/// updates and deletes that would strand references.
pub fn fk(
    db: &Database,
    table: &str,
    column: &str,
    parent_table: &str,
    parent_column: &str,
) -> Result<()> {
    for (t, c, operation, function, parameters) in fk_rows(table, column, parent_table, parent_column)
    {
        db.insert(
            BEFORE_TABLE,
            &trigger_row(&t, &c, &operation, &function, &parameters),
        )?;
    }
    Ok(())
}

/// Remove a foreign-key constraint, deleting exactly the four rows its
/// registration inserted.
pub fn remove_fk(
    db: &Database,
    table: &str,
    column: &str,
    parent_table: &str,
    parent_column: &str,
) -> Result<()> {
    for (t, c, operation, function, parameters) in fk_rows(table, column, parent_table, parent_column)
    {
        remove_matching(
            db,
            &[
                ("table", &t),
                ("column", &c),
                ("operation", &operation),
                ("function", &function),
                ("parameters", &parameters),
            ],
        )?;
    }
    Ok(())
}

/// The four trigger rows a foreign key registers
fn fk_rows(
    table: &str,
    column: &str,
    parent_table: &str,
    parent_column: &str,
) -> Vec<(String, String, String, String, String)> {
    let forward = format!("{parent_table};{parent_column}");
    let backward = format!("{table};{column}");
    vec![
        (
            table.to_string(),
            column.to_string(),
            "insert".to_string(),
            "fk".to_string(),
            forward.clone(),
        ),
        (
            table.to_string(),
            column.to_string(),
            "update".to_string(),
            "fk".to_string(),
            forward,
        ),
        (
            parent_table.to_string(),
            parent_column.to_string(),
            "update".to_string(),
            "update_restricted".to_string(),
            backward.clone(),
        ),
        (
            parent_table.to_string(),
            parent_column.to_string(),
            "delete".to_string(),
            "delete_restricted".to_string(),
            backward,
        ),
    ]
}

fn trigger_row(table: &str, column: &str, operation: &str, function: &str, parameters: &str) -> Row {
    [
        ("table", table),
        ("column", column),
        ("operation", operation),
        ("function", function),
        ("parameters", parameters),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Delete every live `~before` row matching all given attributes
fn remove_matching(db: &Database, attributes: &[(&str, &str)]) -> Result<()> {
    let rows = {
        let mut view = View::new();
        view.prepare_table(db.table(BEFORE_TABLE)?)?;
        for (column, value) in attributes {
            view.select(column, |cell| predicate::equals(cell, value))?;
        }
        view.row_numbers(BEFORE_TABLE)?
    };
    for n in rows {
        db.delete(BEFORE_TABLE, n)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

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
        db.new_table("CONTACT").unwrap();
        db.add_column("CONTACT", "NAME", 20).unwrap();
        db
    }

    fn live_trigger_rows(db: &Database) -> usize {
        let table = db.table(BEFORE_TABLE).unwrap();
        let mut live = 0;
        for n in 0..table.number_of_rows().unwrap() {
            if !table.tombstoned(n).unwrap() {
                live += 1;
            }
        }
        live
    }

    #[test]
    fn test_pk_registers_two_trigger_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());

        pk(&db, "FRIEND", "NAME").unwrap();
        assert_eq!(live_trigger_rows(&db), 2);

        db.insert("FRIEND", &row(&[("NAME", "Buzz")])).unwrap();
        assert!(matches!(
            db.insert("FRIEND", &row(&[("NAME", "Buzz")])),
            Err(Error::PrimaryKeyViolation { .. })
        ));
    }

    #[test]
    fn test_remove_pk_lifts_the_constraint() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());

        pk(&db, "FRIEND", "NAME").unwrap();
        db.insert("FRIEND", &row(&[("NAME", "Buzz")])).unwrap();

        remove_pk(&db, "FRIEND", "NAME").unwrap();
        assert_eq!(live_trigger_rows(&db), 0);
        db.insert("FRIEND", &row(&[("NAME", "Buzz")])).unwrap();
    }

    #[test]
    fn test_fk_registers_four_trigger_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());

        fk(&db, "CONTACT", "NAME", "FRIEND", "NAME").unwrap();
        assert_eq!(live_trigger_rows(&db), 4);

        assert!(matches!(
            db.insert("CONTACT", &row(&[("NAME", "Nobody")])),
            Err(Error::ForeignKeyViolation { .. })
        ));

        db.table("FRIEND")
            .unwrap()
            .insert(&row(&[("NAME", "Buzz")]))
            .unwrap();
        db.insert("CONTACT", &row(&[("NAME", "Buzz")])).unwrap();

        // the parent side is guarded too
        assert!(matches!(
            db.delete("FRIEND", 0),
            Err(Error::RestrictedViolation { .. })
        ));
    }

    #[test]
    fn test_remove_fk_deletes_exactly_its_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = create_test_db(dir.path());

        pk(&db, "FRIEND", "NAME").unwrap();
        fk(&db, "CONTACT", "NAME", "FRIEND", "NAME").unwrap();
        assert_eq!(live_trigger_rows(&db), 6);

        remove_fk(&db, "CONTACT", "NAME", "FRIEND", "NAME").unwrap();
        // the pk rows survive
        assert_eq!(live_trigger_rows(&db), 2);
        db.insert("CONTACT", &row(&[("NAME", "Joshua")])).unwrap();
    }
}
