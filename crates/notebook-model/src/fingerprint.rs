//! Content fingerprints for detecting notebook changes.
//!
//! A fingerprint is the SHA-256 of a canonical serialization of the cell
//! sequence. It covers order, cell type, id, source and execution count.
//! Outputs and metadata are left out: they change on scroll, collapse and
//! re-render without the cell content changing.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cell::{Cell, CellType};

/// A content fingerprint representing notebook state at the time it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

#[derive(Serialize)]
struct CanonicalCell<'a> {
    index: usize,
    cell_type: CellType,
    id: Option<&'a str>,
    source: String,
    execution_count: Option<i64>,
}

impl Fingerprint {
    /// Compute the fingerprint of an ordered cell sequence.
    pub fn of_cells(cells: &[Cell]) -> Self {
        let canonical: Vec<CanonicalCell<'_>> = cells
            .iter()
            .enumerate()
            .map(|(index, cell)| CanonicalCell {
                index,
                cell_type: cell.cell_type,
                id: cell.id.as_deref(),
                source: cell.source_text(),
                execution_count: cell.execution_count,
            })
            .collect();

        let mut hasher = Sha256::new();
        // Serializing plain structs and strings into a Vec cannot fail.
        if let Ok(bytes) = serde_json::to_vec(&canonical) {
            hasher.update(&bytes);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cells(sources: &[&str]) -> Vec<Cell> {
        sources.iter().map(|s| Cell::code(*s)).collect()
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = Fingerprint::of_cells(&cells(&["x = 1", "print(x)"]));
        let b = Fingerprint::of_cells(&cells(&["x = 1", "print(x)"]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let a = Fingerprint::of_cells(&cells(&["a", "b"]));
        let b = Fingerprint::of_cells(&cells(&["b", "a"]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_sees_source_and_type_changes() {
        let base = Fingerprint::of_cells(&cells(&["x = 1"]));
        assert_ne!(base, Fingerprint::of_cells(&cells(&["x = 2"])));
        assert_ne!(base, Fingerprint::of_cells(&[Cell::markdown("x = 1")]));
    }

    #[test]
    fn test_fingerprint_sees_execution_count() {
        let mut cell = Cell::code("x = 1");
        let before = Fingerprint::of_cells(std::slice::from_ref(&cell));
        cell.execution_count = Some(7);
        assert_ne!(before, Fingerprint::of_cells(&[cell]));
    }

    #[test]
    fn test_fingerprint_ignores_outputs_and_metadata() {
        let mut cell = Cell::code("plot()");
        let before = Fingerprint::of_cells(std::slice::from_ref(&cell));
        cell.outputs = vec![json!({"output_type": "display_data", "data": {}})];
        cell.metadata.insert("collapsed".to_string(), json!(true));
        assert_eq!(before, Fingerprint::of_cells(&[cell]));
    }

    #[test]
    fn test_line_and_text_sources_fingerprint_equally() {
        let mut lines = Cell::code("");
        lines.source = crate::Source::Lines(vec!["a\n".into(), "b".into()]);
        assert_eq!(
            Fingerprint::of_cells(&[lines]),
            Fingerprint::of_cells(&[Cell::code("a\nb")])
        );
    }

    #[test]
    fn test_empty_notebook_has_stable_fingerprint() {
        let fp = Fingerprint::of_cells(&[]);
        // SHA-256 hex is 64 characters
        assert_eq!(fp.as_str().len(), 64);
        assert_eq!(fp, Fingerprint::of_cells(&[]));
        assert_eq!(fp.short().len(), 12);
    }
}
