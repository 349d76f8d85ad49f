//! Which kernel backs which notebook.

use std::collections::HashMap;

use notebook_model::NotebookId;
use tokio::sync::Mutex;

use super::{KernelError, KernelTarget};
use crate::backend::{NotebookBackend, SessionInfo};

/// Caches the kernel resolved for each notebook.
///
/// An entry is only reused while the notebook's server URL is unchanged;
/// pointing a notebook at a different server resolves its kernel again.
#[derive(Default)]
pub struct KernelRegistry {
    targets: Mutex<HashMap<NotebookId, KernelTarget>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel to run code for `notebook` on `server_url`.
    pub async fn resolve(
        &self,
        backend: &dyn NotebookBackend,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<KernelTarget, KernelError> {
        let mut targets = self.targets.lock().await;
        if let Some(target) = targets.get(notebook) {
            if target.server_url == server_url {
                return Ok(target.clone());
            }
            tracing::info!(
                "Server URL for {} changed from {} to {}, resolving kernel again",
                notebook,
                target.server_url,
                server_url
            );
            targets.remove(notebook);
        }

        let sessions = backend.list_sessions(server_url).await?;
        let kernel_id = pick_kernel(&sessions, notebook, server_url)?;
        let target = KernelTarget {
            server_url: server_url.to_string(),
            kernel_id,
        };
        targets.insert(notebook.clone(), target.clone());
        Ok(target)
    }

    /// Forget the cached kernel, e.g. after it stopped answering.
    pub async fn invalidate(&self, notebook: &NotebookId) {
        self.targets.lock().await.remove(notebook);
    }
}

/// Kernel of the session open on `notebook`, else the first running session's.
fn pick_kernel(
    sessions: &[SessionInfo],
    notebook: &NotebookId,
    server_url: &str,
) -> Result<String, KernelError> {
    let matching: Vec<&SessionInfo> = sessions
        .iter()
        .filter(|s| NotebookId::new(&s.path) == *notebook)
        .collect();
    if let [session] = matching.as_slice() {
        return Ok(session.kernel_id.clone());
    }

    let first = sessions.first().ok_or_else(|| KernelError::NoSessions {
        server_url: server_url.to_string(),
    })?;
    tracing::info!(
        "No kernel found for {}, using the kernel of {} instead",
        notebook,
        first.path
    );
    Ok(first.kernel_id.clone())
}
