//! SetupNotebook tool - make a notebook ready for the other tools.

use notebook_model::{Cell, NotebookId};
use rmcp::model::{CallToolResult, ErrorData};
use serde::Serialize;

use super::common::{json_result, new_cell_id};
use crate::error::ToolError;
use crate::state::Interceptor;
use crate::SharedState;

#[derive(Debug, Serialize)]
struct SetupResponse {
    message: String,
    notebook_path: String,
    server_url: String,
    kernel_id: String,
    created: bool,
    session_started: bool,
}

/// Execute the SetupNotebook tool.
///
/// Registers the server URL for the notebook, creates the notebook when it
/// doesn't exist yet and starts a kernel session when none is open on it.
/// Tracked state is refreshed afterwards so the caller can mutate right away.
pub async fn execute(
    shared: &SharedState,
    notebook_path: &str,
    cells: Option<Vec<String>>,
    server_url: Option<&str>,
) -> Result<CallToolResult, ErrorData> {
    let id = NotebookId::new(notebook_path);
    let notebook = &id;

    if let Some(url) = server_url {
        validate_server_url(url)?;
        shared.guard().set_server_url(notebook, url).await;
    }

    tracing::info!("Setting up {}", notebook);
    let response = shared
        .guard()
        .intercept(notebook, Interceptor::refreshes_state(), |server_url| async move {
            let backend = shared.backend();

            let created = if backend.notebook_exists(&server_url, notebook).await? {
                if cells.as_ref().is_some_and(|cells| !cells.is_empty()) {
                    tracing::warn!("{} already exists, ignoring initial cells", notebook);
                }
                false
            } else {
                let initial: Vec<Cell> = cells
                    .unwrap_or_default()
                    .into_iter()
                    .map(|source| Cell::code(source).with_id(new_cell_id()))
                    .collect();
                backend
                    .create_notebook(&server_url, notebook, initial)
                    .await?;
                true
            };

            let existing = backend
                .list_sessions(&server_url)
                .await?
                .into_iter()
                .find(|session| NotebookId::new(&session.path) == *notebook);
            let (kernel_id, session_started) = match existing {
                Some(session) => (session.kernel_id, false),
                None => {
                    let session = backend.start_session(&server_url, notebook).await?;
                    tracing::info!("Started kernel {} for {}", session.kernel_id, notebook);
                    // A previously cached fallback kernel no longer applies.
                    shared.kernels().invalidate(notebook).await;
                    (session.kernel_id, true)
                }
            };

            let message = if created {
                format!("Notebook {} created", notebook)
            } else {
                format!("Notebook {} already exists", notebook)
            };
            Ok(SetupResponse {
                message,
                notebook_path: notebook.to_string(),
                server_url,
                kernel_id,
                created,
                session_started,
            })
        })
        .await?;

    json_result(&response)
}

fn validate_server_url(url: &str) -> Result<(), ToolError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ToolError::invalid(format!(
            "server_url must start with http:// or https://, got '{}'",
            url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_test_state, NOTEBOOK};
    use crate::tools::common::{parse_response, CellAddress};
    use crate::tools::modify::{self, ModifyOperation, ModifyRequest};
    use crate::tools::query::{self, QueryType};
    use notebook_model::CellType;

    fn add_code(source: &str) -> ModifyRequest<'_> {
        ModifyRequest {
            operation: ModifyOperation::AddCode,
            cell_content: Some(source),
            address: CellAddress::default(),
            execute: false,
        }
    }

    #[tokio::test]
    async fn test_setup_creates_notebook_with_cells() {
        let (shared, backend, _kernel) = create_test_state().await;
        let cells = vec!["import math".to_string(), "math.pi".to_string()];

        let result = execute(&shared, NOTEBOOK, Some(cells), None)
            .await
            .expect("should succeed");

        let response = parse_response(&result);
        assert_eq!(response["created"], true);
        assert!(response["message"].as_str().unwrap().contains("created"));
        assert_eq!(response["notebook_path"], "analysis.ipynb");
        assert_eq!(response["kernel_id"], "kernel-test");
        assert_eq!(response["session_started"], false);

        let stored = backend.cells(&NotebookId::new(NOTEBOOK)).await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].source_text(), "math.pi");
        assert!(stored.iter().all(|c| c.is_code() && c.id.is_some()));
    }

    #[tokio::test]
    async fn test_setup_existing_notebook_ignores_cells() {
        let (shared, backend, _kernel) = create_test_state().await;
        let id = NotebookId::new(NOTEBOOK);
        backend.insert_notebook(&id, vec![Cell::code("kept")]).await;

        let result = execute(&shared, NOTEBOOK, Some(vec!["new".to_string()]), None)
            .await
            .expect("should succeed");

        assert_eq!(parse_response(&result)["created"], false);
        let stored = backend.cells(&id).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source_text(), "kept");
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn test_setup_starts_session_when_missing() {
        let (shared, backend, _kernel) = create_test_state().await;
        backend.clear_sessions().await;

        let result = execute(&shared, "fresh", None, None)
            .await
            .expect("should succeed");

        let response = parse_response(&result);
        assert_eq!(response["session_started"], true);
        let sessions = backend.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].path, "fresh.ipynb");
        assert_eq!(response["kernel_id"], sessions[0].kernel_id.as_str());
    }

    #[tokio::test]
    async fn test_setup_registers_server_url() {
        let (shared, _backend, _kernel) = create_test_state().await;
        let id = NotebookId::new(NOTEBOOK);

        let result = execute(&shared, NOTEBOOK, None, Some("http://lab.internal:9000/"))
            .await
            .expect("should succeed");

        assert_eq!(parse_response(&result)["server_url"], "http://lab.internal:9000");
        assert_eq!(shared.guard().server_url(&id).await, "http://lab.internal:9000");
        assert!(shared.guard().tracked(&id).await.fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_setup_rejects_non_http_url() {
        let (shared, _backend, _kernel) = create_test_state().await;
        let err = execute(&shared, NOTEBOOK, None, Some("localhost:8888"))
            .await
            .unwrap_err();
        assert!(err.message.contains("http://"));
    }

    #[tokio::test]
    async fn test_setup_upstream_failure() {
        let (shared, backend, _kernel) = create_test_state().await;
        backend.set_unreachable(true);
        let err = execute(&shared, NOTEBOOK, None, None).await.unwrap_err();
        assert!(err.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_setup_add_view_add_scenario() {
        let (shared, backend, kernel) = create_test_state().await;

        execute(&shared, NOTEBOOK, None, None)
            .await
            .expect("setup should succeed");
        modify::execute(&shared, NOTEBOOK, add_code("print(1)"))
            .await
            .expect("first add should succeed");
        query::execute(
            &shared,
            NOTEBOOK,
            QueryType::ViewSource,
            CellAddress::default(),
            None,
        )
        .await
        .expect("view should succeed");
        modify::execute(&shared, NOTEBOOK, add_code("print(2)"))
            .await
            .expect("second add should not be stale");

        let cells = backend.cells(&NotebookId::new(NOTEBOOK)).await;
        let sources: Vec<String> = cells.iter().map(Cell::source_text).collect();
        assert_eq!(sources, vec!["print(1)", "print(2)"]);
        assert!(cells.iter().all(|c| c.cell_type == CellType::Code));
        assert!(kernel.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_added_cell_is_last_in_view() {
        let (shared, _backend, _kernel) = create_test_state().await;
        execute(&shared, NOTEBOOK, Some(vec!["import os".to_string()]), None)
            .await
            .expect("setup should succeed");
        modify::execute(&shared, NOTEBOOK, add_code("x=1"))
            .await
            .expect("add should succeed");

        let result = query::execute(
            &shared,
            NOTEBOOK,
            QueryType::ViewSource,
            CellAddress::default(),
            None,
        )
        .await
        .expect("view should succeed");

        let cells = parse_response(&result);
        let last = cells.as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["cell_type"], "code");
        assert_eq!(last["source"], "x=1");
    }
}
