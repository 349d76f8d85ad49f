//! ExecuteNotebookCode tool - run a cell or install packages on the notebook's kernel.

use notebook_model::{output_text, Cell, NotebookId};
use rmcp::model::{CallToolResult, ErrorData};
use schemars::JsonSchema;
use serde::Deserialize;

use super::common::{json_result, new_cell_id, text_result, CellAddress, ExecutionResponse};
use crate::error::ToolError;
use crate::kernel::{ExecutionResult, KernelError};
use crate::state::Interceptor;
use crate::SharedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    /// Execute an existing code cell
    ExecuteCell,
    /// Install packages with `uv pip` in the kernel's environment
    InstallPackages,
}

/// Execute the ExecuteNotebookCode tool.
///
/// Both execution types write to the notebook (outputs and counts, or a new
/// install cell), so both require the caller's view to be current and
/// refresh tracked state afterwards.
pub async fn execute(
    shared: &SharedState,
    notebook_path: &str,
    execution_type: ExecutionType,
    address: CellAddress<'_>,
    package_names: Option<&str>,
) -> Result<CallToolResult, ErrorData> {
    let id = NotebookId::new(notebook_path);
    let notebook = &id;

    match execution_type {
        ExecutionType::ExecuteCell => {
            if address.is_empty() {
                return Err(ToolError::invalid(
                    "position_index (or execution_count / cell_id) is required for execute_cell operation",
                )
                .into());
            }
            tracing::info!("Executing cell in {}", notebook);
            let result = shared
                .guard()
                .intercept(notebook, Interceptor::mutating(), |server_url| async move {
                    let cells = shared.backend().fetch_cells(&server_url, notebook).await?;
                    let position = address.locate(&cells)?;
                    run_cell(shared, &server_url, notebook, position).await
                })
                .await?;
            json_result(&ExecutionResponse::from(result))
        }
        ExecutionType::InstallPackages => {
            let names = package_names
                .map(str::trim)
                .filter(|names| !names.is_empty())
                .ok_or_else(|| {
                    ToolError::invalid("package_names is required for install_packages operation")
                })?;
            tracing::info!("Installing packages in {}: {}", notebook, names);
            let summary = shared
                .guard()
                .intercept(notebook, Interceptor::mutating(), |server_url| async move {
                    install_packages(shared, &server_url, notebook, names).await
                })
                .await?;
            text_result(summary)
        }
    }
}

async fn install_packages(
    shared: &SharedState,
    server_url: &str,
    notebook: &NotebookId,
    names: &str,
) -> Result<String, ToolError> {
    // Fail before touching the notebook if there's no kernel to run on.
    shared
        .kernels()
        .resolve(shared.backend(), server_url, notebook)
        .await?;

    let cell = Cell::code(format!("!uv pip install {}", names)).with_id(new_cell_id());
    let position = shared
        .backend()
        .append_cell(server_url, notebook, cell)
        .await?;

    // The cell exists now; report execution failures instead of raising so
    // tracked state still picks up the new cell.
    let result = match run_cell(shared, server_url, notebook, position).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Error installing packages: {}", e);
            return Ok(format!("Error: {}", e));
        }
    };

    let summary = if result.outputs.is_empty() {
        "No output from installation command".to_string()
    } else {
        let texts: Vec<String> = result.outputs.iter().map(output_text).collect();
        serde_json::to_string(&texts).unwrap_or_else(|_| texts.join("\n"))
    };
    Ok(format!("Installation of packages [{}]: {}", names, summary))
}

/// Run the code cell at `position` and save its outputs into the notebook.
///
/// The caller must already hold the notebook's lock. Blank cells are not
/// sent to the kernel. Outputs are written back to the cell with the same
/// id, since the notebook is re-read after execution.
pub(crate) async fn run_cell(
    shared: &SharedState,
    server_url: &str,
    notebook: &NotebookId,
    position: usize,
) -> Result<ExecutionResult, ToolError> {
    let backend = shared.backend();
    let cells = backend.fetch_cells(server_url, notebook).await?;
    let cell = cells.get(position).ok_or(ToolError::OutOfRange {
        index: position,
        len: cells.len(),
    })?;
    if !cell.is_code() {
        return Err(ToolError::invalid(format!(
            "Cell at position {} is a {} cell; only code cells can be executed",
            position,
            cell.cell_type.as_str()
        )));
    }
    let source = cell.source_text();
    let cell_id = cell.id.clone();

    let result = if source.trim().is_empty() {
        tracing::debug!("Cell {} in {} is blank, not sending to kernel", position, notebook);
        ExecutionResult::empty()
    } else {
        let target = shared.kernels().resolve(backend, server_url, notebook).await?;
        match shared.executor().execute(&target, &source).await {
            Ok(result) => result,
            Err(e) => {
                if matches!(e, KernelError::Connect { .. } | KernelError::Closed) {
                    shared.kernels().invalidate(notebook).await;
                }
                return Err(e.into());
            }
        }
    };

    let mut cells = backend.fetch_cells(server_url, notebook).await?;
    let slot = cell_id
        .as_deref()
        .and_then(|id| cells.iter().position(|c| c.id.as_deref() == Some(id)))
        .or_else(|| (position < cells.len()).then_some(position));
    match slot {
        Some(index) => {
            cells[index].record_execution(result.outputs.clone(), result.execution_count);
            backend.persist_cells(server_url, notebook, cells).await?;
        }
        None => tracing::warn!(
            "Executed cell at {} is gone from {}; outputs were not saved",
            position,
            notebook
        ),
    }
    Ok(result)
}
