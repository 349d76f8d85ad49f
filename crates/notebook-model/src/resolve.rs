//! Resolve a cell's position from an execution count or a cell id.
//!
//! Position indices shift whenever cells are inserted or deleted, so agents
//! often know a cell by the `[3]` shown next to it, or by its id. Resolution
//! must land on exactly one cell; anything else is reported with the full
//! candidate list so the caller can disambiguate.

use std::fmt;
use std::str::FromStr;

use crate::cell::Cell;

/// Error parsing a loosely formatted execution count.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionCountError {
    #[error("Invalid execution count '{0}': expected an integer such as 3, \"3\", \"(3)\" or \"[3]\"")]
    Invalid(String),
}

/// An execution count as shown in the notebook UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionCount(pub i64);

impl FromStr for ExecutionCount {
    type Err = ExecutionCountError;

    /// Accepts `3`, `(3)` and `[3]`, with surrounding whitespace.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .or_else(|| trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')))
            .unwrap_or(trimmed)
            .trim();

        inner
            .parse::<i64>()
            .map(ExecutionCount)
            .map_err(|_| ExecutionCountError::Invalid(raw.to_string()))
    }
}

/// How a caller addresses a cell when it doesn't know the position index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellSelector {
    ExecutionCount(i64),
    CellId(String),
}

impl CellSelector {
    /// Build a selector from two optional inputs, exactly one of which must be set.
    pub fn from_parts(
        execution_count: Option<ExecutionCount>,
        cell_id: Option<&str>,
    ) -> Result<Self, ResolveError> {
        match (execution_count, cell_id) {
            (Some(count), None) => Ok(CellSelector::ExecutionCount(count.0)),
            (None, Some(id)) => Ok(CellSelector::CellId(id.to_string())),
            (Some(_), Some(_)) => Err(ResolveError::ConflictingSelectors),
            (None, None) => Err(ResolveError::MissingSelector),
        }
    }

    pub fn matches(&self, cell: &Cell) -> bool {
        match self {
            CellSelector::ExecutionCount(count) => cell.execution_count == Some(*count),
            CellSelector::CellId(id) => cell.id.as_deref() == Some(id.as_str()),
        }
    }
}

impl fmt::Display for CellSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellSelector::ExecutionCount(count) => write!(f, "execution_count={}", count),
            CellSelector::CellId(id) => write!(f, "cell_id={}", id),
        }
    }
}

/// Failure to turn a selector into a single position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Must provide either execution_count or cell_id (got neither).")]
    MissingSelector,
    #[error("Must provide either execution_count or cell_id (got both).")]
    ConflictingSelectors,
    #[error(
        "Could not resolve cell from {selector}. Found {candidates:?}. Make sure you're passing \
         in a unique execution count OR a unique cell_id that exists in the notebook."
    )]
    Unresolved {
        selector: CellSelector,
        candidates: Vec<usize>,
    },
}

/// All positions whose cell matches the selector, in ascending order.
pub fn find_positions(cells: &[Cell], selector: &CellSelector) -> Vec<usize> {
    cells
        .iter()
        .enumerate()
        .filter(|(_, cell)| selector.matches(cell))
        .map(|(index, _)| index)
        .collect()
}

/// Resolve the selector to exactly one position.
pub fn resolve_position(cells: &[Cell], selector: &CellSelector) -> Result<usize, ResolveError> {
    match find_positions(cells, selector).as_slice() {
        [single] => Ok(*single),
        candidates => Err(ResolveError::Unresolved {
            selector: selector.clone(),
            candidates: candidates.to_vec(),
        }),
    }
}
