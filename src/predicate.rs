//! Filter predicates for flatdb
//!
//! Pure two-argument comparators over trimmed cell values. Cells are
//! whitespace-padded on disk, so every comparison trims both sides first.
//! Predicates are plain functions; callers hand them to
//! [`View::select`](crate::algebra::View::select) as closures capturing the
//! right-hand parameter.

/// Trimmed textual equality.
pub fn equals(cell: &str, other: &str) -> bool {
    cell.trim() == other.trim()
}

/// Numeric `<` on trimmed values.
///
/// A side that does not parse as a number compares false.
pub fn less_than(cell: &str, other: &str) -> bool {
    match (cell.trim().parse::<f64>(), other.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a < b,
        _ => false,
    }
}

/// True when the trimmed cell equals any trimmed element of `options`.
pub fn any_of(cell: &str, options: &[&str]) -> bool {
    options.iter().any(|o| equals(cell, o))
}
