//! Optimistic concurrency for notebooks shared with humans.
//!
//! Agents reason about a notebook from what they last saw. If a human edits
//! the notebook in the meantime, a mutation based on that stale view can
//! clobber their work. The guard keeps, per notebook, the fingerprint of the
//! content this process last observed, and refuses mutations when the
//! notebook no longer matches it.
//!
//! Each notebook has its own lock, held from the freshness check through the
//! operation and the refresh that follows it, so concurrent tool calls on one
//! notebook are serialized while different notebooks proceed independently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use notebook_model::{Fingerprint, NotebookId};
use tokio::sync::Mutex;

use crate::backend::{BackendError, NotebookBackend};
use crate::error::ToolError;

/// What the guard knows about one notebook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedState {
    /// Fingerprint of the last content observed. `None` until first observed.
    pub fingerprint: Option<Fingerprint>,
    /// Server the notebook lives on. `None` means the configured default.
    pub server_url: Option<String>,
}

/// How an operation interacts with tracked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interceptor {
    /// Fail with `StaleState` unless the notebook matches the tracked fingerprint
    pub check_fresh: bool,
    /// Re-fingerprint the notebook after the operation succeeds
    pub refresh_after: bool,
}

impl Interceptor {
    /// Depends on the caller's view being current.
    pub const fn state_dependent() -> Self {
        Self {
            check_fresh: true,
            refresh_after: false,
        }
    }

    /// Shows the caller the current content, so their view is current afterwards.
    pub const fn refreshes_state() -> Self {
        Self {
            check_fresh: false,
            refresh_after: true,
        }
    }

    /// Check, run, refresh. Used by every tool that changes cells.
    pub const fn mutating() -> Self {
        Self {
            check_fresh: true,
            refresh_after: true,
        }
    }
}

/// Per-notebook fingerprint and server URL registry.
pub struct StateGuard {
    backend: Arc<dyn NotebookBackend>,
    default_server_url: String,
    entries: Mutex<HashMap<NotebookId, Arc<Mutex<TrackedState>>>>,
}

impl StateGuard {
    pub fn new(backend: Arc<dyn NotebookBackend>, default_server_url: impl Into<String>) -> Self {
        Self {
            backend,
            default_server_url: default_server_url.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The lock for one notebook, creating its entry on first use.
    async fn entry(&self, notebook: &NotebookId) -> Arc<Mutex<TrackedState>> {
        let mut entries = self.entries.lock().await;
        entries.entry(notebook.clone()).or_default().clone()
    }

    fn url_of(&self, state: &TrackedState) -> String {
        state
            .server_url
            .clone()
            .unwrap_or_else(|| self.default_server_url.clone())
    }

    /// Server URL for a notebook, falling back to the configured default.
    pub async fn server_url(&self, notebook: &NotebookId) -> String {
        let entry = self.entry(notebook).await;
        let state = entry.lock().await;
        self.url_of(&state)
    }

    /// Point a notebook at a server. Moving it to a different server forgets
    /// its fingerprint, which described content on the old one.
    pub async fn set_server_url(&self, notebook: &NotebookId, url: &str) {
        let url = url.trim_end_matches('/').to_string();
        let entry = self.entry(notebook).await;
        let mut state = entry.lock().await;
        if state.server_url.as_deref() != Some(url.as_str()) {
            tracing::info!("Using server {} for {}", url, notebook);
            state.fingerprint = None;
        }
        state.server_url = Some(url);
    }

    /// Snapshot of the tracked state.
    pub async fn tracked(&self, notebook: &NotebookId) -> TrackedState {
        let entry = self.entry(notebook).await;
        let state = entry.lock().await;
        state.clone()
    }

    /// Fail with `StaleState` if the notebook changed since it was last observed.
    pub async fn require_fresh(&self, notebook: &NotebookId) -> Result<(), ToolError> {
        let entry = self.entry(notebook).await;
        let state = entry.lock().await;
        self.check_locked(notebook, &state).await
    }

    /// Re-fingerprint the notebook from its current content.
    pub async fn refresh(&self, notebook: &NotebookId) -> Result<Fingerprint, BackendError> {
        let entry = self.entry(notebook).await;
        let mut state = entry.lock().await;
        self.refresh_locked(notebook, &mut state).await
    }

    /// Forget everything tracked about every notebook.
    pub async fn reset(&self) {
        self.entries.lock().await.clear();
    }

    /// Run `operation` under the notebook's lock, applying `policy` around it.
    ///
    /// The operation receives the notebook's server URL. Its result is
    /// returned unchanged; when it fails no refresh happens. A failed refresh
    /// is logged and does not fail the call.
    pub async fn intercept<T, F, Fut>(
        &self,
        notebook: &NotebookId,
        policy: Interceptor,
        operation: F,
    ) -> Result<T, ToolError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        let entry = self.entry(notebook).await;
        let mut state = entry.lock().await;

        if policy.check_fresh {
            self.check_locked(notebook, &state).await?;
        }

        let result = operation(self.url_of(&state)).await?;

        if policy.refresh_after {
            if let Err(e) = self.refresh_locked(notebook, &mut state).await {
                tracing::warn!("Failed to refresh state for {}: {}", notebook, e);
            }
        }
        Ok(result)
    }

    async fn check_locked(
        &self,
        notebook: &NotebookId,
        state: &TrackedState,
    ) -> Result<(), ToolError> {
        let Some(expected) = &state.fingerprint else {
            tracing::debug!("No tracked state for {}, treating as fresh", notebook);
            return Ok(());
        };

        let cells = self
            .backend
            .fetch_cells(&self.url_of(state), notebook)
            .await?;
        let current = Fingerprint::of_cells(&cells);
        if &current == expected {
            return Ok(());
        }

        tracing::warn!(
            "Notebook {} changed externally (tracked {}, current {})",
            notebook,
            expected.short(),
            current.short()
        );
        Err(ToolError::StaleState {
            notebook: notebook.to_string(),
        })
    }

    async fn refresh_locked(
        &self,
        notebook: &NotebookId,
        state: &mut TrackedState,
    ) -> Result<Fingerprint, BackendError> {
        let cells = self
            .backend
            .fetch_cells(&self.url_of(state), notebook)
            .await?;
        let fingerprint = Fingerprint::of_cells(&cells);
        tracing::debug!("Tracked state for {} is now {}", notebook, fingerprint.short());
        state.fingerprint = Some(fingerprint.clone());
        Ok(fingerprint)
    }
}
