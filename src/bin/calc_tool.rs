//! Minimal stdio tool service used by the integration tests and demos.
//!
//! Speaks newline-delimited JSON-RPC (`initialize`, `tools/list`,
//! `tools/call`, `ping`) and offers `add`, `multiply` and `sleep`.
//!
//! Flags:
//! - `--pid-file <path>`: write the process id there on startup.
//! - `--stall-handshake`: read requests but never answer them.

use std::io::{BufRead, Write};
use std::time::Duration;

use serde_json::{json, Value};

struct Options {
    pid_file: Option<String>,
    stall_handshake: bool,
}

fn parse_options() -> Options {
    let mut options = Options {
        pid_file: None,
        stall_handshake: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--pid-file" => options.pid_file = args.next(),
            "--stall-handshake" => options.stall_handshake = true,
            other => eprintln!("calc-tool: ignoring argument {other}"),
        }
    }
    options
}

fn main() {
    let options = parse_options();
    if let Some(path) = &options.pid_file {
        if let Err(e) = std::fs::write(path, std::process::id().to_string()) {
            eprintln!("calc-tool: cannot write pid file {path}: {e}");
        }
    }
    eprintln!("calc-tool: started");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() || options.stall_handshake {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("calc-tool: unparsable request: {e}");
                continue;
            }
        };
        let Some(response) = handle(&request) else {
            continue;
        };
        if writeln!(stdout, "{response}").and_then(|()| stdout.flush()).is_err() {
            break;
        }
    }
}

/// Response for one request; `None` for notifications.
fn handle(request: &Value) -> Option<Value> {
    let id = request.get("id").filter(|id| !id.is_null())?.clone();
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let outcome = match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "calc-tool", "version": env!("CARGO_PKG_VERSION")}
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({"tools": tool_list()})),
        "tools/call" => call_tool(&params),
        other => Err(json!({"code": -32601, "message": format!("Method not found: {other}")})),
    };
    Some(match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
    })
}

fn tool_list() -> Value {
    let pair = json!({
        "type": "object",
        "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
        "required": ["a", "b"]
    });
    json!([
        {"name": "add", "description": "Add two numbers", "inputSchema": pair},
        {"name": "multiply", "description": "Multiply two numbers", "inputSchema": pair},
        {
            "name": "sleep",
            "description": "Wait for the given number of milliseconds",
            "inputSchema": {
                "type": "object",
                "properties": {"ms": {"type": "integer"}},
                "required": ["ms"]
            }
        }
    ])
}

fn call_tool(params: &Value) -> Result<Value, Value> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments").cloned().unwrap_or(Value::Null);
    match name {
        "add" => Ok(arithmetic(&args, |a, b| a.checked_add(b), |a, b| a + b)),
        "multiply" => Ok(arithmetic(&args, |a, b| a.checked_mul(b), |a, b| a * b)),
        "sleep" => {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            Ok(json!({"content": [{"type": "text", "text": format!("slept {ms}ms")}]}))
        }
        other => Err(json!({"code": -32602, "message": format!("Unknown tool: {other}")})),
    }
}

fn arithmetic(
    args: &Value,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Value {
    let (Some(a), Some(b)) = (args.get("a"), args.get("b")) else {
        return tool_error("arguments 'a' and 'b' are required");
    };
    let value = match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => int_op(a, b).map(Value::from),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => serde_json::Number::from_f64(float_op(a, b)).map(Value::Number),
            _ => return tool_error("arguments 'a' and 'b' must be numbers"),
        },
    };
    match value {
        Some(value) => json!({
            "content": [{"type": "text", "text": value.to_string()}],
            "structuredContent": value
        }),
        None => tool_error("result out of range"),
    }
}

fn tool_error(message: &str) -> Value {
    json!({"content": [{"type": "text", "text": message}], "isError": true})
}
