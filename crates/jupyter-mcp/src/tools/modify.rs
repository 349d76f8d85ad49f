//! ModifyNotebookCells tool - add, insert, edit and delete cells.

use notebook_model::{Cell, NotebookId};
use rmcp::model::{CallToolResult, ErrorData};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{json_result, new_cell_id, CellAddress, ExecutionResponse};
use super::execute::run_cell;
use crate::error::ToolError;
use crate::state::Interceptor;
use crate::SharedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModifyOperation {
    /// Append a code cell, optionally executing it
    AddCode,
    /// Replace the source of a code cell, optionally executing it
    EditCode,
    /// Append a markdown cell
    AddMarkdown,
    /// Replace the source of a markdown cell
    EditMarkdown,
    /// Delete a cell
    Delete,
    /// Insert a code cell before position_index, optionally executing it
    InsertCode,
    /// Insert a markdown cell before position_index
    InsertMarkdown,
}

impl ModifyOperation {
    fn name(&self) -> &'static str {
        match self {
            ModifyOperation::AddCode => "add_code",
            ModifyOperation::EditCode => "edit_code",
            ModifyOperation::AddMarkdown => "add_markdown",
            ModifyOperation::EditMarkdown => "edit_markdown",
            ModifyOperation::Delete => "delete",
            ModifyOperation::InsertCode => "insert_code",
            ModifyOperation::InsertMarkdown => "insert_markdown",
        }
    }
}

/// A single modify_notebook_cells call.
#[derive(Debug)]
pub struct ModifyRequest<'a> {
    pub operation: ModifyOperation,
    pub cell_content: Option<&'a str>,
    /// Target cell for edits and deletes; insertion point for inserts
    pub address: CellAddress<'a>,
    pub execute: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ModifyResponse {
    Executed(ExecutionResponse),
    Changed {
        message: &'static str,
        position_index: usize,
    },
    /// The cell was written but running it failed
    ExecutionFailed {
        error: String,
        message: &'static str,
        position_index: usize,
    },
}

/// Execute the ModifyNotebookCells tool.
///
/// Every operation checks that the notebook still matches what the caller
/// last saw before changing it, and re-fingerprints it afterwards.
pub async fn execute(
    shared: &SharedState,
    notebook_path: &str,
    request: ModifyRequest<'_>,
) -> Result<CallToolResult, ErrorData> {
    let id = NotebookId::new(notebook_path);
    let notebook = &id;
    validate(&request)?;

    tracing::info!("{} on {}", request.operation.name(), notebook);
    let response = shared
        .guard()
        .intercept(notebook, Interceptor::mutating(), |server_url| async move {
            apply(shared, &server_url, notebook, &request).await
        })
        .await?;
    json_result(&response)
}

/// Argument checks that don't need the notebook.
fn validate(request: &ModifyRequest<'_>) -> Result<(), ToolError> {
    let op = request.operation.name();
    let needs_content = request.operation != ModifyOperation::Delete;
    if needs_content && request.cell_content.is_none_or(str::is_empty) {
        return Err(ToolError::invalid(format!(
            "cell_content is required for {} operation",
            op
        )));
    }

    match request.operation {
        ModifyOperation::EditCode | ModifyOperation::EditMarkdown | ModifyOperation::Delete => {
            if request.address.is_empty() {
                return Err(ToolError::invalid(format!(
                    "position_index (or execution_count / cell_id) is required for {} operation",
                    op
                )));
            }
        }
        ModifyOperation::InsertCode | ModifyOperation::InsertMarkdown => {
            if request.address.position_index.is_none() {
                return Err(ToolError::invalid(format!(
                    "position_index is required for {} operation",
                    op
                )));
            }
            if request.address.execution_count.is_some() || request.address.cell_id.is_some() {
                return Err(ToolError::invalid(format!(
                    "{} only accepts position_index as the insertion point",
                    op
                )));
            }
        }
        ModifyOperation::AddCode | ModifyOperation::AddMarkdown => {}
    }
    Ok(())
}

async fn apply(
    shared: &SharedState,
    server_url: &str,
    notebook: &NotebookId,
    request: &ModifyRequest<'_>,
) -> Result<ModifyResponse, ToolError> {
    let backend = shared.backend();
    let content = request.cell_content.unwrap_or_default();

    match request.operation {
        ModifyOperation::AddCode => {
            let cell = Cell::code(content).with_id(new_cell_id());
            let position = backend.append_cell(server_url, notebook, cell).await?;
            if !request.execute {
                return Ok(changed("Code cell added", position));
            }
            tracing::info!("Cell added successfully, now executing");
            let failure = "Cell was added but execution failed";
            Ok(run_written(shared, server_url, notebook, position, failure).await)
        }
        ModifyOperation::InsertCode => {
            let position = insertion_point(request)?;
            let cell = Cell::code(content).with_id(new_cell_id());
            backend.insert_cell(server_url, notebook, position, cell).await?;
            if !request.execute {
                return Ok(changed("Code cell inserted", position));
            }
            let failure = "Cell was inserted but execution failed";
            Ok(run_written(shared, server_url, notebook, position, failure).await)
        }
        ModifyOperation::AddMarkdown => {
            let cell = Cell::markdown(content).with_id(new_cell_id());
            let position = backend.append_cell(server_url, notebook, cell).await?;
            Ok(changed("Markdown cell added", position))
        }
        ModifyOperation::InsertMarkdown => {
            let position = insertion_point(request)?;
            let cell = Cell::markdown(content).with_id(new_cell_id());
            backend.insert_cell(server_url, notebook, position, cell).await?;
            Ok(changed("Markdown cell inserted", position))
        }
        ModifyOperation::EditCode | ModifyOperation::EditMarkdown => {
            let cells = backend.fetch_cells(server_url, notebook).await?;
            let position = request.address.locate(&cells)?;
            let previous = &cells[position];
            let mut cell = if request.operation == ModifyOperation::EditCode {
                Cell::code(content)
            } else {
                Cell::markdown(content)
            };
            // Same cell, new source: keep identity and metadata, drop stale outputs.
            cell.id = Some(previous.id.clone().unwrap_or_else(new_cell_id));
            cell.metadata = previous.metadata.clone();
            backend.replace_cell(server_url, notebook, position, cell).await?;

            if request.operation == ModifyOperation::EditMarkdown {
                return Ok(changed("Markdown cell edited", position));
            }
            if !request.execute {
                return Ok(changed("Code cell edited", position));
            }
            let failure = "Cell was edited but execution failed";
            Ok(run_written(shared, server_url, notebook, position, failure).await)
        }
        ModifyOperation::Delete => {
            let cells = backend.fetch_cells(server_url, notebook).await?;
            let position = request.address.locate(&cells)?;
            backend.delete_cell(server_url, notebook, position).await?;
            Ok(changed("Cell deleted", position))
        }
    }
}

fn changed(message: &'static str, position_index: usize) -> ModifyResponse {
    ModifyResponse::Changed {
        message,
        position_index,
    }
}

fn insertion_point(request: &ModifyRequest<'_>) -> Result<usize, ToolError> {
    request
        .address
        .position_index
        .ok_or_else(|| ToolError::invalid("position_index is required for insert operations"))
}

/// Run a just-written cell. The cell stays even if execution fails, so the
/// failure is reported in the response rather than failing the call.
async fn run_written(
    shared: &SharedState,
    server_url: &str,
    notebook: &NotebookId,
    position: usize,
    failure_message: &'static str,
) -> ModifyResponse {
    match run_cell(shared, server_url, notebook, position).await {
        Ok(result) => ModifyResponse::Executed(result.into()),
        Err(e) => {
            tracing::error!("Error during execution: {}", e);
            ModifyResponse::ExecutionFailed {
                error: e.to_string(),
                message: failure_message,
                position_index: position,
            }
        }
    }
}
