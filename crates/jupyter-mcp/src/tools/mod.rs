//! MCP tool implementations, one module per tool.

pub mod common;
pub mod execute;
pub mod modify;
pub mod query;
pub mod setup;
