//! Wire shapes for the two supported protocols.

use serde_json::{json, Value};

pub(crate) const PROTOCOL_VERSION: &str = "2024-11-05";

pub(crate) fn request(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

pub(crate) fn notification(method: &str) -> Value {
    json!({"jsonrpc": "2.0", "method": method})
}

pub(crate) fn response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

pub(crate) fn method_not_found(id: Value, method: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": -32601, "message": format!("method not supported by client: {method}")}
    })
}

pub(crate) fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {"name": "toolgate", "version": env!("CARGO_PKG_VERSION")}
    })
}

/// A record received from a JSON-RPC peer.
#[derive(Debug, PartialEq)]
pub(crate) enum Incoming {
    /// Answer to one of our requests: `Ok(result)` or `Err(error object)`.
    Response {
        id: Value,
        outcome: Result<Value, Value>,
    },
    /// The server asking something of us.
    Request { id: Value, method: String },
    Notification { method: String },
}

pub(crate) fn classify(message: &Value) -> Option<Incoming> {
    let object = message.as_object()?;
    let id = object.get("id").filter(|id| !id.is_null()).cloned();
    let method = object.get("method").and_then(Value::as_str).map(str::to_string);

    match (id, method) {
        (Some(id), Some(method)) => Some(Incoming::Request { id, method }),
        (None, Some(method)) => Some(Incoming::Notification { method }),
        (Some(id), None) => {
            if let Some(error) = object.get("error") {
                Some(Incoming::Response {
                    id,
                    outcome: Err(error.clone()),
                })
            } else {
                let result = object.get("result")?;
                Some(Incoming::Response {
                    id,
                    outcome: Ok(result.clone()),
                })
            }
        }
        (None, None) => None,
    }
}

/// Servers may echo numeric ids as strings.
pub(crate) fn id_matches(id: &Value, expected: u64) -> bool {
    match id {
        Value::Number(n) => n.as_u64() == Some(expected),
        Value::String(s) => s.parse::<u64>().ok() == Some(expected),
        _ => false,
    }
}

pub(crate) fn rpc_error_message(error: &Value) -> String {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    match error.get("code").and_then(Value::as_i64) {
        Some(code) => format!("{message} (code {code})"),
        None => message,
    }
}

/// Unwrap an MCP `tools/call` result.
///
/// MCP-shaped results yield `structuredContent`, else joined text content,
/// else the raw content array. `isError: true` becomes `Err(text)`. Anything
/// without a `content` array is returned unchanged.
pub(crate) fn tool_result(result: Value) -> Result<Value, String> {
    let Some(content) = result.get("content").and_then(Value::as_array) else {
        return Ok(result);
    };
    let text = extract_text_content(content);

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(text.unwrap_or_else(|| Value::Array(content.clone()).to_string()));
    }
    if let Some(structured) = result.get("structuredContent").filter(|v| !v.is_null()) {
        return Ok(structured.clone());
    }
    if let Some(text) = text {
        return Ok(Value::String(text));
    }
    Ok(Value::Array(content.clone()))
}

fn extract_text_content(content: &[Value]) -> Option<String> {
    let lines: Vec<&str> = content
        .iter()
        .filter_map(|item| match item.get("type").and_then(Value::as_str) {
            Some("text") => item.get("text").and_then(Value::as_str),
            Some("resource") => item
                .get("resource")
                .and_then(|r| r.get("text"))
                .and_then(Value::as_str),
            _ => None,
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Outcome of a query-protocol response line; `None` if it is neither shape.
pub(crate) fn query_outcome(message: &Value) -> Option<Result<Value, String>> {
    let object = message.as_object()?;
    if let Some(error) = object.get("error").filter(|e| !e.is_null()) {
        let text = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Some(Err(text));
    }
    object.get("result").cloned().map(Ok)
}

/// The string sent as `{"query": ...}`.
pub(crate) fn query_text(args: &Value) -> Option<String> {
    match args.get("query")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
