//! A small stdio MCP server used by the integration tests and for trying
//! the CLI without a real tool server.
//!
//! It speaks newline-delimited JSON-RPC on stdin/stdout and serves a fake
//! table catalog. Flags:
//!
//! - `--name <name>`: server name reported in `serverInfo` (default `fixture`)
//! - `--fail-initialize`: answer `initialize` with an error

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::time::Duration;

struct Options {
    name: String,
    fail_initialize: bool,
}

fn parse_options() -> Options {
    let mut options = Options {
        name: "fixture".to_string(),
        fail_initialize: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--name" => {
                if let Some(name) = args.next() {
                    options.name = name;
                }
            }
            "--fail-initialize" => options.fail_initialize = true,
            other => eprintln!("ignoring unknown argument {other}"),
        }
    }
    options
}

fn tables() -> BTreeMap<&'static str, Vec<&'static str>> {
    BTreeMap::from([
        ("orders", vec!["id", "user_id", "total"]),
        ("users", vec!["id", "name", "email"]),
    ])
}

fn tool_list() -> Value {
    json!({
        "tools": [
            {
                "name": "list_tables",
                "description": "List the tables in the database",
                "inputSchema": {"type": "object", "properties": {}}
            },
            {
                "name": "describe_table",
                "description": "Show the columns of a table",
                "inputSchema": {
                    "type": "object",
                    "properties": {"table": {"type": "string"}},
                    "required": ["table"]
                }
            },
            {
                "name": "insert_rows",
                "description": "Insert rows into a table",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "table": {"type": "string"},
                        "rows": {"type": "array"}
                    },
                    "required": ["table", "rows"]
                }
            },
            {
                "name": "slow_echo",
                "description": "Echo text after a delay",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "text": {"type": "string"},
                        "delay_ms": {"type": "integer"}
                    }
                }
            }
        ]
    })
}

fn text_result(text: String, is_error: bool) -> Value {
    json!({"content": [{"type": "text", "text": text}], "isError": is_error})
}

fn call_tool(params: &Value) -> Value {
    let name = params["name"].as_str().unwrap_or_default();
    let args = &params["arguments"];
    let tables = tables();
    match name {
        "list_tables" => {
            let names: Vec<&str> = tables.keys().copied().collect();
            text_result(json!(names).to_string(), false)
        }
        "describe_table" => {
            let table = args["table"].as_str().unwrap_or_default();
            match tables.get(table) {
                Some(columns) => text_result(json!({"table": table, "columns": columns}).to_string(), false),
                None => text_result(format!("no such table: {table}"), true),
            }
        }
        "insert_rows" => {
            let count = args["rows"].as_array().map_or(0, Vec::len);
            text_result(json!({"inserted": count}).to_string(), false)
        }
        "slow_echo" => {
            let delay = args["delay_ms"].as_u64().unwrap_or(0);
            std::thread::sleep(Duration::from_millis(delay));
            text_result(args["text"].as_str().unwrap_or_default().to_string(), false)
        }
        other => text_result(format!("unknown tool: {other}"), true),
    }
}

fn handle(options: &Options, request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let method = request["method"].as_str().unwrap_or_default();
    let outcome = match method {
        "initialize" if options.fail_initialize => Err((-32603, "initialization refused")),
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": options.name, "version": env!("CARGO_PKG_VERSION")}
        })),
        "tools/list" => Ok(tool_list()),
        "tools/call" => Ok(call_tool(&request["params"])),
        "ping" => Ok(json!({})),
        _ => Err((-32601, "method not found")),
    };
    Some(match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err((code, message)) => {
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
        }
    })
}

fn main() {
    let options = parse_options();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("bad request: {e}");
                continue;
            }
        };
        // Notifications carry no id and get no reply.
        if let Some(response) = handle(&options, &request) {
            if writeln!(stdout, "{response}").and_then(|()| stdout.flush()).is_err() {
                break;
            }
        }
    }
}
