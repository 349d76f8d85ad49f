//! Notebook identity - the normalized path that keys all per-notebook state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// File extension every notebook path carries once normalized.
pub const NOTEBOOK_EXTENSION: &str = ".ipynb";

/// Add the `.ipynb` extension to a path if it doesn't already have it.
pub fn ensure_ipynb_extension(path: &str) -> String {
    if path.ends_with(NOTEBOOK_EXTENSION) {
        path.to_string()
    } else {
        format!("{}{}", path, NOTEBOOK_EXTENSION)
    }
}

/// A notebook path relative to the Jupyter server root, normalized so that
/// `analysis`, `analysis.ipynb` and `/analysis.ipynb` name the same notebook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotebookId(String);

impl NotebookId {
    /// Normalize a user-supplied notebook path.
    ///
    /// Trims whitespace, strips leading `./` and `/` (paths are always relative
    /// to the server root) and appends `.ipynb` when missing.
    pub fn new(path: &str) -> Self {
        let mut trimmed = path.trim();
        while let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        }
        let trimmed = trimmed.trim_start_matches('/');
        Self(ensure_ipynb_extension(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path segment, e.g. `report.ipynb` for `work/report.ipynb`.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for NotebookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NotebookId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NotebookId {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}
