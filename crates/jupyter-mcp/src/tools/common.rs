//! Shared utilities for notebook tools.

use notebook_model::{
    filter_image_outputs, resolve_position, Cell, CellSelector, ExecutionCount,
    ExecutionCountError,
};
use rmcp::model::{CallToolResult, Content, ErrorData};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;
use crate::kernel::ExecutionResult;

/// Execution count as agents send it: `3`, `"3"`, `"(3)"` or `"[3]"`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ExecutionCountParam {
    Number(i64),
    Text(String),
}

impl ExecutionCountParam {
    pub fn parse(&self) -> Result<ExecutionCount, ExecutionCountError> {
        match self {
            ExecutionCountParam::Number(n) => Ok(ExecutionCount(*n)),
            ExecutionCountParam::Text(text) => text.parse(),
        }
    }
}

/// Convert a loosely typed position index. Fractions are truncated.
pub fn position_index(value: Option<f64>) -> Result<Option<usize>, ToolError> {
    match value {
        None => Ok(None),
        Some(v) if !v.is_finite() || v < 0.0 => Err(ToolError::invalid(format!(
            "position_index must be a non-negative integer, got {}",
            v
        ))),
        Some(v) => Ok(Some(v.trunc() as usize)),
    }
}

/// Ways a tool call may address a single existing cell.
#[derive(Debug, Default)]
pub struct CellAddress<'a> {
    pub position_index: Option<usize>,
    pub execution_count: Option<&'a ExecutionCountParam>,
    pub cell_id: Option<&'a str>,
}

impl CellAddress<'_> {
    pub fn is_empty(&self) -> bool {
        self.position_index.is_none() && self.execution_count.is_none() && self.cell_id.is_none()
    }

    /// Position of the addressed cell. A position index must be in range;
    /// an execution count or cell id must match exactly one cell.
    pub fn locate(&self, cells: &[Cell]) -> Result<usize, ToolError> {
        if let Some(index) = self.position_index {
            if self.execution_count.is_some() || self.cell_id.is_some() {
                return Err(ToolError::invalid(
                    "Provide only one of position_index, execution_count or cell_id.",
                ));
            }
            if index >= cells.len() {
                return Err(ToolError::OutOfRange {
                    index,
                    len: cells.len(),
                });
            }
            return Ok(index);
        }

        let count = self.execution_count.map(|c| c.parse()).transpose()?;
        let selector = CellSelector::from_parts(count, self.cell_id)?;
        Ok(resolve_position(cells, &selector)?)
    }
}

/// A fresh cell id (nbformat 4.5 ids are at most 64 characters).
pub fn new_cell_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Execution result as shown to the agent, with images replaced by a note.
#[derive(Debug, Serialize)]
pub struct ExecutionResponse {
    pub execution_count: Option<i64>,
    pub outputs: Vec<Value>,
    pub status: String,
}

impl From<ExecutionResult> for ExecutionResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            execution_count: result.execution_count,
            outputs: filter_image_outputs(&result.outputs),
            status: result.status,
        }
    }
}

/// Serialize a response as pretty JSON text content.
pub fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, ErrorData> {
    let text = serde_json::to_string_pretty(value).map_err(|e| {
        ErrorData::internal_error(format!("Failed to serialize response: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

pub fn text_result(text: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(text.into())]))
}

#[cfg(test)]
pub(crate) fn parse_response(result: &CallToolResult) -> Value {
    let text = &result.content[0].raw.as_text().expect("Expected text").text;
    serde_json::from_str(text).expect("Expected JSON response")
}

#[cfg(test)]
pub(crate) fn response_text(result: &CallToolResult) -> String {
    result.content[0]
        .raw
        .as_text()
        .expect("Expected text")
        .text
        .clone()
}
