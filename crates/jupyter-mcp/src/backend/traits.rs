//! Backend trait definition and error types.

use notebook_model::{Cell, NotebookId};
use serde::Serialize;

/// Errors that can occur talking to the notebook store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The notebook doesn't exist on the server
    #[error("Notebook not found: {path}")]
    NotFound { path: String },
    /// A position index past the end of the cell list
    #[error("Cell index {index} out of range (notebook has {len} cells)")]
    OutOfRange { index: usize, len: usize },
    /// The request never got a response (connection refused, DNS, TLS)
    #[error("Request to {url} failed: {message}")]
    Http { url: String, message: String },
    /// The server answered with a non-success status
    #[error("{url} returned HTTP {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },
    /// The response body wasn't what the Jupyter API documents
    #[error("Unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
    /// The configured request timeout elapsed
    #[error("Request to {url} timed out")]
    Timeout { url: String },
}

/// A running kernel session as reported by `/api/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    /// Notebook path relative to the server root
    pub path: String,
    pub kernel_id: String,
    pub kernel_name: Option<String>,
}

/// Abstract access to notebook documents on a Jupyter server.
///
/// Implementations provide whole-document primitives (`fetch_cells`,
/// `persist_cells`); positional edits are provided on top of them.
/// Every call names the server explicitly since different notebooks may
/// live on different servers.
///
/// Current implementations: `JupyterRestBackend` (contents REST API),
/// `MemoryBackend` (in-process, tests only).
#[async_trait::async_trait]
pub trait NotebookBackend: Send + Sync {
    /// Read the ordered cell list of a notebook.
    async fn fetch_cells(
        &self,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<Vec<Cell>, BackendError>;

    /// Replace the cell list of an existing notebook, keeping its metadata.
    async fn persist_cells(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        cells: Vec<Cell>,
    ) -> Result<(), BackendError>;

    async fn notebook_exists(
        &self,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<bool, BackendError>;

    /// Create a notebook for the server's default kernel with the given cells.
    async fn create_notebook(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        cells: Vec<Cell>,
    ) -> Result<(), BackendError>;

    async fn list_sessions(&self, server_url: &str) -> Result<Vec<SessionInfo>, BackendError>;

    /// Start a kernel session for the notebook using the default kernel.
    async fn start_session(
        &self,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<SessionInfo, BackendError>;

    /// Append a cell, returning its position index.
    async fn append_cell(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        cell: Cell,
    ) -> Result<usize, BackendError> {
        let mut cells = self.fetch_cells(server_url, notebook).await?;
        cells.push(cell);
        let position = cells.len() - 1;
        self.persist_cells(server_url, notebook, cells).await?;
        Ok(position)
    }

    /// Insert a cell before `position`. `position == len` appends.
    async fn insert_cell(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        position: usize,
        cell: Cell,
    ) -> Result<(), BackendError> {
        let mut cells = self.fetch_cells(server_url, notebook).await?;
        if position > cells.len() {
            return Err(BackendError::OutOfRange {
                index: position,
                len: cells.len(),
            });
        }
        cells.insert(position, cell);
        self.persist_cells(server_url, notebook, cells).await
    }

    /// Replace the cell at `position`, returning the previous one.
    async fn replace_cell(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        position: usize,
        cell: Cell,
    ) -> Result<Cell, BackendError> {
        let mut cells = self.fetch_cells(server_url, notebook).await?;
        let len = cells.len();
        let slot = cells
            .get_mut(position)
            .ok_or(BackendError::OutOfRange { index: position, len })?;
        let previous = std::mem::replace(slot, cell);
        self.persist_cells(server_url, notebook, cells).await?;
        Ok(previous)
    }

    /// Remove the cell at `position`, returning it.
    async fn delete_cell(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        position: usize,
    ) -> Result<Cell, BackendError> {
        let mut cells = self.fetch_cells(server_url, notebook).await?;
        if position >= cells.len() {
            return Err(BackendError::OutOfRange {
                index: position,
                len: cells.len(),
            });
        }
        let removed = cells.remove(position);
        self.persist_cells(server_url, notebook, cells).await?;
        Ok(removed)
    }
}
