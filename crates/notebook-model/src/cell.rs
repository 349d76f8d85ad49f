//! Notebook cells as stored in nbformat 4 documents.
//!
//! Cells are read and written verbatim: fields this crate doesn't model
//! (attachments, custom keys) are kept in `extra` and written back unchanged.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of a notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

impl CellType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Code => "code",
            CellType::Markdown => "markdown",
            CellType::Raw => "raw",
        }
    }
}

/// Cell source. nbformat allows either a single string or a list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Text(String),
    Lines(Vec<String>),
}

impl Source {
    /// The full source text, joining line lists as-is (lines keep their `\n`).
    pub fn text(&self) -> String {
        match self {
            Source::Text(text) => text.clone(),
            Source::Lines(lines) => lines.concat(),
        }
    }
}

impl Default for Source {
    fn default() -> Self {
        Source::Text(String::new())
    }
}

impl From<&str> for Source {
    fn from(text: &str) -> Self {
        Source::Text(text.to_string())
    }
}

impl From<String> for Source {
    fn from(text: String) -> Self {
        Source::Text(text)
    }
}

/// A single notebook cell.
///
/// `execution_count` and `outputs` are only meaningful for code cells and are
/// only serialized for them; for code cells they are always written, with a
/// `null` execution count when the cell has never run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Cell {
    pub cell_type: CellType,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub execution_count: Option<i64>,
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    fn new(cell_type: CellType, source: impl Into<Source>) -> Self {
        Self {
            cell_type,
            id: None,
            source: source.into(),
            metadata: Map::new(),
            execution_count: None,
            outputs: Vec::new(),
            extra: Map::new(),
        }
    }

    /// A fresh, never-executed code cell.
    pub fn code(source: impl Into<Source>) -> Self {
        Self::new(CellType::Code, source)
    }

    pub fn markdown(source: impl Into<Source>) -> Self {
        Self::new(CellType::Markdown, source)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }

    pub fn source_text(&self) -> String {
        self.source.text()
    }

    /// Overwrite the results of the last run with a new one.
    pub fn record_execution(&mut self, outputs: Vec<Value>, execution_count: Option<i64>) {
        self.outputs = outputs;
        self.execution_count = execution_count;
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("cell_type", &self.cell_type)?;
        if let Some(id) = &self.id {
            map.serialize_entry("id", id)?;
        }
        map.serialize_entry("metadata", &self.metadata)?;
        map.serialize_entry("source", &self.source)?;
        if self.is_code() {
            map.serialize_entry("execution_count", &self.execution_count)?;
            map.serialize_entry("outputs", &self.outputs)?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_code_cell_with_line_source() {
        let cell: Cell = serde_json::from_value(json!({
            "cell_type": "code",
            "id": "abc",
            "metadata": {},
            "source": ["x = 1\n", "x"],
            "execution_count": 4,
            "outputs": [{"output_type": "execute_result", "data": {"text/plain": "1"}}]
        }))
        .unwrap();

        assert!(cell.is_code());
        assert_eq!(cell.id.as_deref(), Some("abc"));
        assert_eq!(cell.source_text(), "x = 1\nx");
        assert_eq!(cell.execution_count, Some(4));
        assert_eq!(cell.outputs.len(), 1);
    }

    #[test]
    fn test_code_cell_always_writes_execution_fields() {
        let value = serde_json::to_value(Cell::code("print(1)")).unwrap();
        assert_eq!(value["cell_type"], "code");
        assert_eq!(value["execution_count"], Value::Null);
        assert_eq!(value["outputs"], json!([]));
        assert_eq!(value["source"], "print(1)");
    }

    #[test]
    fn test_markdown_cell_omits_execution_fields() {
        let value = serde_json::to_value(Cell::markdown("# Title")).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("execution_count"));
        assert!(!obj.contains_key("outputs"));
        assert!(!obj.contains_key("id"));
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let original = json!({
            "cell_type": "markdown",
            "id": "m1",
            "metadata": {"tags": ["intro"]},
            "source": "![img](attachment:a.png)",
            "attachments": {"a.png": {"image/png": "AAAA"}}
        });
        let cell: Cell = serde_json::from_value(original.clone()).unwrap();
        assert!(cell.extra.contains_key("attachments"));
        assert_eq!(serde_json::to_value(&cell).unwrap(), original);
    }

    #[test]
    fn test_record_execution_overwrites_previous_run() {
        let mut cell = Cell::code("1 + 1");
        cell.record_execution(vec![json!({"output_type": "stream"})], Some(1));
        cell.record_execution(vec![], Some(2));
        assert!(cell.outputs.is_empty());
        assert_eq!(cell.execution_count, Some(2));
    }
}
