//! Notebook storage backends.

mod rest;
mod traits;

pub use rest::JupyterRestBackend;
pub use traits::{BackendError, NotebookBackend, SessionInfo};
