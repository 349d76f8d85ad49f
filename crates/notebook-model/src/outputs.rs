//! Output trimming for display to an agent.
//!
//! Rich outputs (plots, HTML tables) are large base64 or markup blobs that
//! waste context and carry little an agent can use. Two filters exist:
//! `filter_image_outputs` for fresh execution results, which swaps images
//! for a short note, and `filter_cell_outputs` for viewing notebook source,
//! which drops rich payloads and records what was removed under `[filtered]`.

use serde_json::{Map, Value};

use crate::cell::Cell;

/// Key added to an output's `data` when rich payloads were removed.
const FILTERED_KEY: &str = "[filtered]";

/// Join a multiline nbformat string (either a string or a list of strings).
pub fn multiline_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}

/// Replace image payloads in execution outputs with a `text/plain` note.
///
/// `{"image/png": ..., "text/plain": ["<Figure>"]}` becomes
/// `{"text/plain": ["<Figure>", "\nImage generated (PNG format)"]}`.
pub fn filter_image_outputs(outputs: &[Value]) -> Vec<Value> {
    outputs.iter().map(filter_image_output).collect()
}

fn filter_image_output(output: &Value) -> Value {
    let mut output = output.clone();
    let Some(data) = output.get_mut("data").and_then(Value::as_object_mut) else {
        return output;
    };

    let mut formats: Vec<String> = data
        .keys()
        .filter_map(|key| key.strip_prefix("image/"))
        .map(str::to_uppercase)
        .collect();
    if formats.is_empty() {
        return output;
    }
    formats.sort();
    data.retain(|key, _| !key.starts_with("image/"));

    let note = format!("Image generated ({} format)", formats.join(", "));
    match data.get_mut("text/plain") {
        Some(Value::Array(lines)) => lines.push(Value::String(format!("\n{}", note))),
        Some(Value::String(text)) => {
            text.push('\n');
            text.push_str(&note);
        }
        _ => {
            data.insert("text/plain".to_string(), Value::String(note));
        }
    }
    output
}

/// Return a copy of the cell with rich output payloads removed.
///
/// Keeps every `text/*` representation except HTML. Stream and error outputs
/// are untouched, as are non-code cells.
pub fn filter_cell_outputs(cell: &Cell) -> Cell {
    let mut cell = cell.clone();
    if !cell.is_code() {
        return cell;
    }
    for output in &mut cell.outputs {
        if let Some(data) = output.get_mut("data").and_then(Value::as_object_mut) {
            filter_rich_data(data);
        }
    }
    cell
}

fn filter_rich_data(data: &mut Map<String, Value>) {
    let mut images = Vec::new();
    let mut html = false;
    let mut other = Vec::new();

    for key in data.keys() {
        if key.starts_with("image/") {
            images.push(key.clone());
        } else if key == "text/html" {
            html = true;
        } else if !key.starts_with("text/") {
            other.push(key.clone());
        }
    }
    if images.is_empty() && !html && other.is_empty() {
        return;
    }

    let mut notes = Vec::new();
    if !images.is_empty() {
        notes.push(format!("Image data present ({})", images.join(", ")));
    }
    if html {
        notes.push("HTML data present".to_string());
    }
    if !other.is_empty() {
        notes.push(format!("Rich data present ({})", other.join(", ")));
    }

    data.retain(|key, _| key.starts_with("text/") && key != "text/html");
    data.insert(FILTERED_KEY.to_string(), Value::String(notes.join("; ")));
}

/// Human-readable text of a single output.
pub fn output_text(output: &Value) -> String {
    match output.get("output_type").and_then(Value::as_str) {
        Some("stream") => output.get("text").map(multiline_text).unwrap_or_default(),
        Some("execute_result") | Some("display_data") => output
            .get("data")
            .and_then(|data| data.get("text/plain"))
            .map(multiline_text)
            .unwrap_or_default(),
        Some("error") => {
            let name = output.get("ename").and_then(Value::as_str).unwrap_or("Error");
            let value = output.get("evalue").and_then(Value::as_str).unwrap_or("");
            format!("{}: {}", name, value)
        }
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn code_cell_with(outputs: Vec<Value>) -> Cell {
        let mut cell = Cell::code("x");
        cell.execution_count = Some(1);
        cell.outputs = outputs;
        cell
    }

    #[test]
    fn test_filter_png_image() {
        let outputs = vec![json!({
            "output_type": "display_data",
            "data": {
                "text/plain": ["<Figure size 640x480 with 1 Axes>"],
                "image/png": "iVBORw0KGgo="
            }
        })];

        let filtered = filter_image_outputs(&outputs);
        let data = &filtered[0]["data"];
        assert!(data.get("image/png").is_none());
        assert!(data["text/plain"].is_array());
        assert!(multiline_text(&data["text/plain"]).contains("Image generated (PNG format)"));
    }

    #[test]
    fn test_filter_multiple_image_formats() {
        let outputs = vec![json!({
            "output_type": "execute_result",
            "data": {
                "text/plain": ["<matplotlib.figure.Figure>"],
                "image/png": "png",
                "image/jpeg": "jpeg",
                "image/svg+xml": "<svg>...</svg>"
            }
        })];

        let filtered = filter_image_outputs(&outputs);
        let data = filtered[0]["data"].as_object().unwrap();
        assert_eq!(data.len(), 1);
        assert!(multiline_text(&data["text/plain"])
            .contains("Image generated (JPEG, PNG, SVG+XML format)"));
    }

    #[test]
    fn test_image_filter_preserves_non_image_outputs() {
        let outputs = vec![
            json!({"output_type": "stream", "name": "stdout", "text": ["Hello World\n"]}),
            json!({"output_type": "execute_result", "data": {"text/plain": ["42"], "text/html": ["<b>42</b>"]}}),
            json!({"output_type": "display_data"}),
        ];
        assert_eq!(filter_image_outputs(&outputs), outputs);
    }

    #[test]
    fn test_image_filter_creates_text_plain_when_missing() {
        let outputs = vec![json!({"output_type": "display_data", "data": {"image/png": "abc"}})];
        let filtered = filter_image_outputs(&outputs);
        assert_eq!(filtered[0]["data"]["text/plain"], "Image generated (PNG format)");
    }

    #[test]
    fn test_cell_filter_marks_images() {
        let cell = code_cell_with(vec![json!({
            "output_type": "display_data",
            "data": {"text/plain": ["<Figure>"], "image/png": "very_long_base64"}
        })]);

        let filtered = filter_cell_outputs(&cell);
        assert_eq!(filtered.execution_count, Some(1));
        let data = &filtered.outputs[0]["data"];
        assert!(data["[filtered]"].as_str().unwrap().contains("Image data present"));
        assert!(data.get("image/png").is_none());
        assert_eq!(data["text/plain"], json!(["<Figure>"]));
    }

    #[test]
    fn test_cell_filter_marks_html() {
        let cell = code_cell_with(vec![json!({
            "output_type": "execute_result",
            "data": {"text/html": ["<table></table>"], "text/plain": ["   A\n0  1"]}
        })]);

        let filtered = filter_cell_outputs(&cell);
        let data = &filtered.outputs[0]["data"];
        assert!(data["[filtered]"].as_str().unwrap().contains("HTML data present"));
        assert!(data.get("text/html").is_none());
    }

    #[test]
    fn test_cell_filter_keeps_small_text_data() {
        let cell = code_cell_with(vec![
            json!({"output_type": "execute_result", "data": {"text/plain": ["42"]}}),
            json!({"output_type": "stream", "name": "stdout", "text": ["Hello\n"]}),
        ]);
        assert_eq!(filter_cell_outputs(&cell), cell);
    }

    #[test]
    fn test_cell_filter_leaves_markdown_alone() {
        let cell = Cell::markdown("# Title");
        assert_eq!(filter_cell_outputs(&cell), cell);
    }

    #[test]
    fn test_output_text() {
        assert_eq!(
            output_text(&json!({"output_type": "stream", "name": "stdout", "text": ["a\n", "b\n"]})),
            "a\nb\n"
        );
        assert_eq!(
            output_text(&json!({"output_type": "execute_result", "data": {"text/plain": "42"}})),
            "42"
        );
        assert_eq!(
            output_text(&json!({"output_type": "error", "ename": "NameError", "evalue": "x"})),
            "NameError: x"
        );
    }
}
