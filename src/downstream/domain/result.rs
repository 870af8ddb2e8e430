//! Tool call results as returned by MCP servers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Plain text.
    Text {
        /// Text body.
        text: String,
    },
    /// Base64-encoded image.
    Image {
        /// Encoded image bytes.
        data: String,
        /// Image media type.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Base64-encoded audio.
    Audio {
        /// Encoded audio bytes.
        data: String,
        /// Audio media type.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Embedded resource, kept opaque.
    Resource {
        /// Resource body as sent by the server.
        resource: Value,
    },
}

impl ToolContent {
    /// Creates a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the text body of text blocks.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content blocks.
    #[serde(default)]
    pub content: Vec<ToolContent>,
    /// Structured result body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Marks the result as a tool-level failure.
    #[serde(default)]
    pub is_error: bool,
    /// Result metadata.
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl CallToolResult {
    /// Creates a successful single-text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            ..Self::default()
        }
    }

    /// Creates a failed result carrying `message` and its error category.
    #[must_use]
    pub fn error_text(message: impl Into<String>, error_type: &str) -> Self {
        let text = message.into();
        Self {
            structured_content: Some(serde_json::json!({
                "error": text,
                "error_type": error_type,
            })),
            content: vec![ToolContent::text(text)],
            is_error: true,
            meta: None,
        }
    }

    /// Returns all text blocks joined with newlines.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Inserts `value` under `key` unless the key is already present.
    ///
    /// Returns `true` when the entry was inserted.
    pub fn merge_meta_entry(&mut self, key: &str, value: Value) -> bool {
        let meta = self.meta.get_or_insert_with(Map::new);
        if meta.contains_key(key) {
            return false;
        }
        meta.insert(key.to_owned(), value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_result_carries_structured_error() {
        let result = CallToolResult::error_text("boom", "TimeoutError");

        assert!(result.is_error);
        assert_eq!(result.text_content(), "boom");
        assert_eq!(
            result.structured_content,
            Some(json!({"error": "boom", "error_type": "TimeoutError"}))
        );
    }

    #[test]
    fn merge_meta_does_not_overwrite_existing_key() {
        let mut result = CallToolResult::text("ok");
        assert!(result.merge_meta_entry("a2c_tool_meta", json!({"alias": "x"})));
        assert!(!result.merge_meta_entry("a2c_tool_meta", json!({"alias": "y"})));

        let meta = result.meta.expect("meta should be set");
        assert_eq!(meta.get("a2c_tool_meta"), Some(&json!({"alias": "x"})));
    }

    #[test]
    fn parses_wire_result() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "hi"}],
            "isError": false,
            "_meta": {"trace": 1}
        }))
        .expect("result should parse");

        assert_eq!(result.text_content(), "hi");
        assert!(result.meta.is_some_and(|meta| meta.contains_key("trace")));
    }
}
