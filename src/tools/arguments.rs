//! Tool call arguments as they arrive from an agent loop.

use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};

/// Arguments for one tool call, normalized to a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    value: Map<String, Value>,
}

impl ToolArguments {
    /// Accept an object, `null` (no arguments), or a string holding either.
    ///
    /// LLM tool calls usually carry arguments as a JSON-encoded string.
    pub fn coerce(tool: &str, value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self { value: map }),
            Value::String(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(Self::default());
                }
                let parsed: Value = serde_json::from_str(trimmed).map_err(|e| {
                    GatewayError::invalid_arguments(
                        tool,
                        format!("arguments must be valid JSON: {e}"),
                    )
                })?;
                match parsed {
                    Value::String(_) => Err(GatewayError::invalid_arguments(
                        tool,
                        "arguments must be a JSON object; got a string",
                    )),
                    other => Self::coerce(tool, other),
                }
            }
            other => Err(GatewayError::invalid_arguments(
                tool,
                format!("arguments must be a JSON object; got {other}"),
            )),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.value
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.value)
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }
}

impl From<Map<String, Value>> for ToolArguments {
    fn from(value: Map<String, Value>) -> Self {
        Self { value }
    }
}
