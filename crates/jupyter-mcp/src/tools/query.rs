//! QueryNotebook tool - read-only views of a notebook and its server.

use notebook_model::{filter_cell_outputs, Cell, NotebookId};
use rmcp::model::{CallToolResult, ErrorData};
use schemars::JsonSchema;
use serde::Deserialize;

use super::common::{json_result, text_result, CellAddress};
use crate::error::ToolError;
use crate::state::Interceptor;
use crate::SharedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Source of one cell (by position_index or execution_count) or of all cells
    ViewSource,
    /// Whether the Jupyter server is reachable
    CheckServer,
    /// Running notebook sessions on the server
    ListSessions,
    /// Position index of the cell with a given execution_count or cell_id
    GetPositionIndex,
}

/// Execute the QueryNotebook tool.
///
/// `view_source` and `get_position_index` show the caller current content,
/// so they refresh tracked state. Server checks don't touch it.
pub async fn execute(
    shared: &SharedState,
    notebook_path: &str,
    query_type: QueryType,
    address: CellAddress<'_>,
    server_url: Option<&str>,
) -> Result<CallToolResult, ErrorData> {
    let id = NotebookId::new(notebook_path);
    let notebook = &id;

    match query_type {
        QueryType::ViewSource => {
            if address.position_index.is_some() && address.execution_count.is_some() {
                return Err(ToolError::invalid(
                    "Cannot provide both execution_count and position_index.",
                )
                .into());
            }
            let view_all = address.is_empty();
            if view_all {
                tracing::info!("Viewing all cells of {}", notebook);
            }
            let cells = shared
                .guard()
                .intercept(notebook, Interceptor::refreshes_state(), |server_url| async move {
                    let cells = shared.backend().fetch_cells(&server_url, notebook).await?;
                    if view_all {
                        return Ok(cells.iter().map(filter_cell_outputs).collect::<Vec<Cell>>());
                    }
                    let position = address.locate(&cells)?;
                    Ok(vec![filter_cell_outputs(&cells[position])])
                })
                .await?;

            match cells.as_slice() {
                [single] if !view_all => json_result(single),
                _ => json_result(&cells),
            }
        }
        QueryType::CheckServer => {
            let url = resolve_server_url(shared, notebook, server_url).await;
            match shared.backend().list_sessions(&url).await {
                Ok(_) => text_result("Jupyter server is running"),
                Err(e) => {
                    tracing::debug!("Server check for {} failed: {}", url, e);
                    text_result("Jupyter server is not accessible")
                }
            }
        }
        QueryType::ListSessions => {
            let url = resolve_server_url(shared, notebook, server_url).await;
            let sessions = shared
                .backend()
                .list_sessions(&url)
                .await
                .map_err(ToolError::from)?;
            json_result(&sessions)
        }
        QueryType::GetPositionIndex => {
            if address.position_index.is_some() {
                return Err(ToolError::invalid(
                    "get_position_index takes execution_count or cell_id, not position_index.",
                )
                .into());
            }
            let position = shared
                .guard()
                .intercept(notebook, Interceptor::refreshes_state(), |server_url| async move {
                    let cells = shared.backend().fetch_cells(&server_url, notebook).await?;
                    address.locate(&cells)
                })
                .await?;
            json_result(&position)
        }
    }
}

/// An explicit URL wins; otherwise the notebook's registered server.
async fn resolve_server_url(
    shared: &SharedState,
    notebook: &NotebookId,
    explicit: Option<&str>,
) -> String {
    match explicit {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => shared.guard().server_url(notebook).await,
    }
}
