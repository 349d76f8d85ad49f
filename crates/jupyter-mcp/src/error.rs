//! Tool error taxonomy and its mapping onto MCP errors.

use notebook_model::{ExecutionCountError, ResolveError};
use rmcp::model::ErrorData;
use serde_json::json;

use crate::backend::BackendError;
use crate::kernel::KernelError;

/// Failure of a tool call. Converted into `ErrorData` at the tool boundary,
/// with a `data.kind` field callers can branch on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error(
        "Notebook {notebook} has changed since it was last viewed. Re-query the notebook \
         (query_notebook with view_source) before mutating it."
    )]
    StaleState { notebook: String },
    #[error("{message}")]
    AmbiguousResolution {
        message: String,
        candidates: Vec<usize>,
    },
    #[error("Cell index {index} out of range (notebook has {len} cells)")]
    OutOfRange { index: usize, len: usize },
    #[error("{0}")]
    Upstream(String),
}

impl ToolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ToolError::InvalidArgument(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::InvalidArgument(_) => "invalid_argument",
            ToolError::StaleState { .. } => "stale_state",
            ToolError::AmbiguousResolution { .. } => "ambiguous_resolution",
            ToolError::OutOfRange { .. } => "out_of_range",
            ToolError::Upstream(_) => "upstream",
        }
    }
}

impl From<ToolError> for ErrorData {
    fn from(e: ToolError) -> Self {
        let message = e.to_string();
        let mut data = json!({ "kind": e.kind() });
        match e {
            ToolError::InvalidArgument(_) => ErrorData::invalid_params(message, Some(data)),
            ToolError::AmbiguousResolution { candidates, .. } => {
                data["candidates"] = json!(candidates);
                ErrorData::invalid_params(message, Some(data))
            }
            ToolError::OutOfRange { index, len } => {
                data["index"] = json!(index);
                data["len"] = json!(len);
                ErrorData::invalid_params(message, Some(data))
            }
            ToolError::StaleState { notebook } => {
                data["notebook"] = json!(notebook);
                ErrorData::invalid_request(message, Some(data))
            }
            ToolError::Upstream(_) => ErrorData::internal_error(message, Some(data)),
        }
    }
}

impl From<BackendError> for ToolError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::OutOfRange { index, len } => ToolError::OutOfRange { index, len },
            other => ToolError::Upstream(other.to_string()),
        }
    }
}

impl From<KernelError> for ToolError {
    fn from(e: KernelError) -> Self {
        ToolError::Upstream(e.to_string())
    }
}

impl From<ResolveError> for ToolError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Unresolved { ref candidates, .. } => ToolError::AmbiguousResolution {
                candidates: candidates.clone(),
                message: e.to_string(),
            },
            other => ToolError::InvalidArgument(other.to_string()),
        }
    }
}

impl From<ExecutionCountError> for ToolError {
    fn from(e: ExecutionCountError) -> Self {
        ToolError::InvalidArgument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notebook_model::CellSelector;
    use rmcp::model::ErrorCode;

    #[test]
    fn test_stale_state_maps_to_invalid_request() {
        let err: ErrorData = ToolError::StaleState {
            notebook: "nb.ipynb".into(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::INVALID_REQUEST);
        assert!(err.message.contains("Re-query the notebook"));
        assert_eq!(err.data.unwrap()["kind"], "stale_state");
    }

    #[test]
    fn test_ambiguous_resolution_carries_candidates() {
        let err: ToolError = ResolveError::Unresolved {
            selector: CellSelector::ExecutionCount(2),
            candidates: vec![1, 2],
        }
        .into();
        let data: ErrorData = err.into();
        assert_eq!(data.code, ErrorCode::INVALID_PARAMS);
        let payload = data.data.unwrap();
        assert_eq!(payload["kind"], "ambiguous_resolution");
        assert_eq!(payload["candidates"], json!([1, 2]));
    }

    #[test]
    fn test_backend_out_of_range_keeps_bounds() {
        let err: ToolError = BackendError::OutOfRange { index: 5, len: 2 }.into();
        assert_eq!(err, ToolError::OutOfRange { index: 5, len: 2 });
        let data: ErrorData = err.into();
        assert_eq!(data.data.unwrap()["len"], 2);
    }

    #[test]
    fn test_upstream_maps_to_internal_error() {
        let err: ToolError = BackendError::Timeout {
            url: "http://localhost:8888/api/sessions".into(),
        }
        .into();
        let data: ErrorData = err.into();
        assert_eq!(data.code, ErrorCode::INTERNAL_ERROR);
        assert_eq!(data.data.unwrap()["kind"], "upstream");
    }

    #[test]
    fn test_selector_misuse_is_invalid_argument() {
        let err: ToolError = ResolveError::ConflictingSelectors.into();
        assert_eq!(err.kind(), "invalid_argument");
        assert!(err.to_string().contains("got both"));
    }
}
