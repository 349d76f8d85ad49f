//! Cell model and pure helpers for Jupyter notebooks
//!
//! Handles notebook identity normalization, the cell structure as stored in
//! `.ipynb` files, content fingerprints for staleness detection, resolving a
//! cell from an execution count or id, and trimming outputs for display.
//! These are pure functions with no I/O - talking to a Jupyter server stays
//! in the MCP server crate.

mod cell;
mod fingerprint;
mod identity;
mod outputs;
mod resolve;

pub use cell::{Cell, CellType, Source};
pub use fingerprint::Fingerprint;
pub use identity::{ensure_ipynb_extension, NotebookId, NOTEBOOK_EXTENSION};
pub use outputs::{filter_cell_outputs, filter_image_outputs, multiline_text, output_text};
pub use resolve::{
    find_positions, resolve_position, CellSelector, ExecutionCount, ExecutionCountError,
    ResolveError,
};
