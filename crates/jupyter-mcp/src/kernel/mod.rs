//! Running code on Jupyter kernels.
//!
//! `KernelRegistry` finds which kernel backs a notebook; a `KernelExecutor`
//! runs source on it and returns nbformat outputs.

mod registry;
mod websocket;

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::backend::BackendError;

pub use registry::KernelRegistry;
pub use websocket::WebSocketKernel;

/// Where to run code: a kernel on a specific server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelTarget {
    pub server_url: String,
    pub kernel_id: String,
}

/// Outcome of one execution, as returned to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub execution_count: Option<i64>,
    /// nbformat outputs, in the order the kernel produced them
    pub outputs: Vec<Value>,
    /// `ok`, `error` or `aborted`, from the execute reply
    pub status: String,
}

impl ExecutionResult {
    /// Result of a cell with nothing to run.
    pub fn empty() -> Self {
        Self {
            execution_count: None,
            outputs: Vec::new(),
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("Could not connect to kernel at {url}: {message}")]
    Connect { url: String, message: String },
    #[error("Kernel channel error: {0}")]
    Channel(String),
    #[error("Kernel closed the connection before execution finished")]
    Closed,
    #[error("Kernel execution did not finish within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error(
        "Failed to resolve kernel ID. No active notebook sessions found on {server_url}. \
         Please open a notebook in Jupyter or run setup_notebook."
    )]
    NoSessions { server_url: String },
    #[error("Failed to list kernel sessions: {0}")]
    Sessions(#[from] BackendError),
}

/// Runs code on a kernel and waits for it to finish.
#[async_trait::async_trait]
pub trait KernelExecutor: Send + Sync {
    async fn execute(
        &self,
        target: &KernelTarget,
        code: &str,
    ) -> Result<ExecutionResult, KernelError>;
}
