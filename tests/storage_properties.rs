//! Property tests over the storage and algebra invariants.

use std::fs;

use proptest::prelude::*;

use flatdb::algebra::View;
use flatdb::database::Database;
use flatdb::predicate;
use flatdb::storage::Row;
use flatdb::transaction::Transaction;

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn setup(dir: &std::path::Path) -> Database {
    let mut db = Database::open(dir).unwrap();
    db.new_table("FRIEND").unwrap();
    db.add_column("FRIEND", "NAME", 20).unwrap();
    db.add_column("FRIEND", "AGE", 2).unwrap();
    db
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_insert_read_round_trip(names in proptest::collection::vec("[A-Za-z0-9-]{1,20}", 1..8)) {
        let dir = tempfile::tempdir().unwrap();
        let db = setup(dir.path());
        let table = db.table("FRIEND").unwrap();

        for name in &names {
            db.insert("FRIEND", &row(&[("NAME", name)])).unwrap();
        }

        prop_assert_eq!(table.number_of_rows().unwrap(), names.len());
        let size = fs::metadata(table.data_path()).unwrap().len() as usize;
        prop_assert_eq!(size, names.len() * table.schema().row_length());
        for (n, name) in names.iter().enumerate() {
            let row = table.read_row(n).unwrap();
            prop_assert_eq!(row["NAME"].trim(), name.as_str());
        }
    }

    #[test]
    fn prop_cells_truncate_to_declared_width(name in "[ -~]{0,40}") {
        let dir = tempfile::tempdir().unwrap();
        let db = setup(dir.path());
        let table = db.table("FRIEND").unwrap();

        db.insert("FRIEND", &row(&[("NAME", &name)])).unwrap();

        let stored = table.read_row(0).unwrap();
        prop_assert_eq!(stored["NAME"].len(), 20);
        let mut expected: Vec<u8> = name.as_bytes().iter().copied().take(20).collect();
        expected.resize(20, b' ');
        prop_assert_eq!(stored["NAME"].as_bytes(), expected.as_slice());
    }

    #[test]
    fn prop_select_keeps_matching_rows_in_order(
        ages in proptest::collection::vec(0u32..100, 1..10),
        threshold in 0u32..100,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db = setup(dir.path());
        for age in &ages {
            db.insert("FRIEND", &row(&[("NAME", "x"), ("AGE", &age.to_string())])).unwrap();
        }

        let mut view = View::new();
        view.prepare_table(db.table("FRIEND").unwrap()).unwrap();
        let bound = threshold.to_string();
        view.select("AGE", |cell| predicate::less_than(cell, &bound)).unwrap();

        let expected: Vec<usize> = ages
            .iter()
            .enumerate()
            .filter(|(_, &age)| age < threshold)
            .map(|(n, _)| n)
            .collect();
        prop_assert_eq!(view.row_numbers("FRIEND").unwrap(), expected);
        prop_assert_eq!(view.number_of_rows(), view.row_numbers("FRIEND").unwrap().len());
    }

    #[test]
    fn prop_rollback_restores_the_pre_transaction_rows(
        names in proptest::collection::vec("[A-Za-z]{1,10}", 1..6),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db = setup(dir.path());
        db.insert("FRIEND", &row(&[("NAME", "keeper"), ("AGE", "1")])).unwrap();

        let live_rows = |db: &Database| -> Vec<Row> {
            let table = db.table("FRIEND").unwrap();
            (0..table.number_of_rows().unwrap())
                .filter(|&n| !table.tombstoned(n).unwrap())
                .map(|n| table.read_row(n).unwrap())
                .collect()
        };
        let before = live_rows(&db);

        let mut txn = Transaction::new();
        for name in &names {
            txn.insert(&db, "FRIEND", &row(&[("NAME", name)])).unwrap();
        }
        txn.update(&db, "FRIEND", 0, &row(&[("AGE", "99")])).unwrap();
        txn.rollback(&db).unwrap();

        prop_assert_eq!(live_rows(&db), before);
    }
}
