use serde::Serialize;
use serde_json::{json, Value};

/// Which connector owns a tool, and the name that connector knows it by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ToolBinding {
    pub service: String,
    pub local_name: String,
}

/// A tool advertised by a connected service.
///
/// `name` is unique across services: `"{service}_{local_name}"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(skip)]
    pub binding: ToolBinding,
}

impl ToolDescriptor {
    pub fn new(
        service: &str,
        local_name: &str,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: qualified_name(service, local_name),
            description: description.into(),
            input_schema,
            binding: ToolBinding {
                service: service.to_string(),
                local_name: local_name.to_string(),
            },
        }
    }

    /// Build from one entry of an MCP `tools/list` result. Entries without a
    /// name are rejected; a missing schema becomes an empty object schema.
    pub fn from_listing(service: &str, entry: &Value) -> Option<Self> {
        let local_name = entry.get("name").and_then(Value::as_str)?;
        if local_name.is_empty() {
            return None;
        }
        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let input_schema = entry
            .get("inputSchema")
            .filter(|schema| schema.is_object())
            .cloned()
            .unwrap_or_else(empty_object_schema);
        Some(Self::new(service, local_name, description, input_schema))
    }

    pub fn service(&self) -> &str {
        &self.binding.service
    }

    pub fn local_name(&self) -> &str {
        &self.binding.local_name
    }

    /// OpenAI function-calling definition for this tool.
    pub fn to_openai_definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

pub fn qualified_name(service: &str, local_name: &str) -> String {
    format!("{service}_{local_name}")
}

pub(crate) fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn listing_entry_is_namespaced_by_service() {
        let tool = ToolDescriptor::from_listing(
            "calc",
            &json!({
                "name": "add",
                "description": "Add two numbers",
                "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}}}
            }),
        )
        .expect("valid entry");

        assert_eq!(tool.name, "calc_add");
        assert_eq!(tool.service(), "calc");
        assert_eq!(tool.local_name(), "add");
        assert_eq!(tool.input_schema["properties"]["a"]["type"], "number");
    }

    #[test]
    fn listing_entry_without_name_is_rejected() {
        assert!(ToolDescriptor::from_listing("calc", &json!({"description": "?"})).is_none());
        assert!(ToolDescriptor::from_listing("calc", &json!({"name": ""})).is_none());
    }

    #[test]
    fn missing_schema_defaults_to_empty_object() {
        let tool = ToolDescriptor::from_listing("calc", &json!({"name": "now"})).expect("entry");
        assert_eq!(tool.input_schema, empty_object_schema());
        assert_eq!(tool.description, "");
    }

    #[test]
    fn openai_definition_wraps_schema_as_parameters() {
        let tool = ToolDescriptor::new("search", "query", "Web search", json!({"type": "object"}));
        assert_eq!(
            tool.to_openai_definition(),
            json!({
                "type": "function",
                "function": {
                    "name": "search_query",
                    "description": "Web search",
                    "parameters": {"type": "object"}
                }
            })
        );
    }

    #[test]
    fn serialized_form_hides_binding() {
        let tool = ToolDescriptor::new("calc", "add", "Add", json!({"type": "object"}));
        let value = serde_json::to_value(&tool).expect("serialize");
        assert_eq!(
            value,
            json!({"name": "calc_add", "description": "Add", "inputSchema": {"type": "object"}})
        );
    }
}
