//! In-process test doubles for the Jupyter server and kernel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use notebook_model::{Cell, NotebookId};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::backend::{BackendError, NotebookBackend, SessionInfo};
use crate::config::Config;
use crate::kernel::{ExecutionResult, KernelError, KernelExecutor, KernelTarget};
use crate::SharedState;

/// Notebook path used by tool tests.
pub const NOTEBOOK: &str = "analysis";

/// Notebook store held in memory. Ignores the server URL.
#[derive(Default)]
pub struct MemoryBackend {
    notebooks: Mutex<HashMap<NotebookId, Vec<Cell>>>,
    sessions: Mutex<Vec<SessionInfo>>,
    fetches: AtomicUsize,
    writes: AtomicUsize,
    unreachable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_notebook(&self, notebook: &NotebookId, cells: Vec<Cell>) {
        self.notebooks.lock().await.insert(notebook.clone(), cells);
    }

    /// Change a notebook the way a human in JupyterLab would, bypassing this process.
    pub async fn external_edit(&self, notebook: &NotebookId, edit: impl FnOnce(&mut Vec<Cell>)) {
        let mut notebooks = self.notebooks.lock().await;
        if let Some(cells) = notebooks.get_mut(notebook) {
            edit(cells);
        }
    }

    pub async fn cells(&self, notebook: &NotebookId) -> Vec<Cell> {
        self.notebooks
            .lock()
            .await
            .get(notebook)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn add_session(&self, path: &str, kernel_id: &str) {
        let mut sessions = self.sessions.lock().await;
        let id = format!("session-{}", sessions.len());
        sessions.push(SessionInfo {
            id,
            path: path.to_string(),
            kernel_id: kernel_id.to_string(),
            kernel_name: Some("python3".to_string()),
        });
    }

    pub async fn clear_sessions(&self) {
        self.sessions.lock().await.clear();
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.lock().await.clone()
    }

    /// Number of `fetch_cells` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of `persist_cells` and `create_notebook` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every call fail as if the server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self, server_url: &str) -> Result<(), BackendError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Http {
                url: server_url.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl NotebookBackend for MemoryBackend {
    async fn fetch_cells(
        &self,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<Vec<Cell>, BackendError> {
        self.check_reachable(server_url)?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.notebooks
            .lock()
            .await
            .get(notebook)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                path: notebook.to_string(),
            })
    }

    async fn persist_cells(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        cells: Vec<Cell>,
    ) -> Result<(), BackendError> {
        self.check_reachable(server_url)?;
        let mut notebooks = self.notebooks.lock().await;
        let slot = notebooks
            .get_mut(notebook)
            .ok_or_else(|| BackendError::NotFound {
                path: notebook.to_string(),
            })?;
        *slot = cells;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notebook_exists(
        &self,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<bool, BackendError> {
        self.check_reachable(server_url)?;
        Ok(self.notebooks.lock().await.contains_key(notebook))
    }

    async fn create_notebook(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        cells: Vec<Cell>,
    ) -> Result<(), BackendError> {
        self.check_reachable(server_url)?;
        self.notebooks.lock().await.insert(notebook.clone(), cells);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_sessions(&self, server_url: &str) -> Result<Vec<SessionInfo>, BackendError> {
        self.check_reachable(server_url)?;
        Ok(self.sessions.lock().await.clone())
    }

    async fn start_session(
        &self,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<SessionInfo, BackendError> {
        self.check_reachable(server_url)?;
        let mut sessions = self.sessions.lock().await;
        let session = SessionInfo {
            id: format!("session-{}", sessions.len()),
            path: notebook.to_string(),
            kernel_id: format!("kernel-{}", sessions.len()),
            kernel_name: Some("python3".to_string()),
        };
        sessions.push(session.clone());
        Ok(session)
    }
}

type ReplyHook = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Kernel that echoes the code it was asked to run.
///
/// Each execution gets the next execution count and, unless scripted
/// otherwise, one stdout stream output `ran: <code>`.
#[derive(Default)]
pub struct ScriptedKernel {
    counter: AtomicI64,
    calls: Mutex<Vec<String>>,
    outputs: Mutex<Option<Vec<Value>>>,
    failure: Mutex<Option<String>>,
    before_reply: Mutex<Option<ReplyHook>>,
}

impl ScriptedKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Code of every execution so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    /// Return these outputs for every following execution.
    pub async fn respond_with(&self, outputs: Vec<Value>) {
        *self.outputs.lock().await = Some(outputs);
    }

    /// Fail every following execution with a channel error.
    pub async fn fail_with(&self, message: &str) {
        *self.failure.lock().await = Some(message.to_string());
    }

    /// Run `hook` while "executing", before the result is returned.
    pub async fn before_reply(
        &self,
        hook: impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    ) {
        *self.before_reply.lock().await = Some(Box::new(hook));
    }
}

#[async_trait::async_trait]
impl KernelExecutor for ScriptedKernel {
    async fn execute(
        &self,
        _target: &KernelTarget,
        code: &str,
    ) -> Result<ExecutionResult, KernelError> {
        self.calls.lock().await.push(code.to_string());
        if let Some(message) = self.failure.lock().await.clone() {
            return Err(KernelError::Channel(message));
        }
        if let Some(hook) = self.before_reply.lock().await.as_ref() {
            hook().await;
        }

        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let outputs = self.outputs.lock().await.clone().unwrap_or_else(|| {
            vec![json!({
                "output_type": "stream",
                "name": "stdout",
                "text": format!("ran: {}\n", code),
            })]
        });
        Ok(ExecutionResult {
            execution_count: Some(count),
            outputs,
            status: "ok".to_string(),
        })
    }
}

/// Shared state over in-memory doubles, with a kernel session for `NOTEBOOK`.
pub async fn create_test_state() -> (SharedState, Arc<MemoryBackend>, Arc<ScriptedKernel>) {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .add_session(NotebookId::new(NOTEBOOK).as_str(), "kernel-test")
        .await;
    let kernel = Arc::new(ScriptedKernel::new());
    let shared = SharedState::from_parts(Config::default(), backend.clone(), kernel.clone());
    (shared, backend, kernel)
}
