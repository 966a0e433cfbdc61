//! MCP (Model Context Protocol) server for `kvbridge`.
//!
//! Implements a JSON-RPC 2.0 server over stdio that exposes Vault secret and
//! policy operations as MCP tools, the secret and policy listings as
//! resources, and a policy drafting prompt.
//!
//! Protocol: newline-delimited JSON-RPC 2.0 messages on stdin/stdout. Each
//! message is handled to completion before the next line is read. Stdout
//! carries protocol traffic only; diagnostics go through `tracing` to stderr.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::facade::{
    CREATE_POLICY, CREATE_SECRET, DELETE_SECRET, Operations, READ_SECRET, ToolOutput,
    generate_policy,
};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "kvbridge";

pub const SECRETS_URI: &str = "vault://secrets";
pub const POLICIES_URI: &str = "vault://policies";
pub const GENERATE_POLICY_PROMPT: &str = "generate_policy";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

// ── JSON-RPC 2.0 types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

fn rpc_ok(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: Some(result),
        error: None,
    }
}

fn rpc_err(id: Value, code: i64, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: None,
        error: Some(JsonRpcError { code, message }),
    }
}

// ── MCP protocol types ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct McpToolDefinition {
    name: &'static str,
    description: &'static str,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct McpResource {
    uri: &'static str,
    name: &'static str,
    description: &'static str,
    #[serde(rename = "mimeType")]
    mime_type: &'static str,
}

#[derive(Debug, Serialize)]
struct McpPromptArgument {
    name: &'static str,
    description: &'static str,
    required: bool,
}

#[derive(Debug, Serialize)]
struct McpPrompt {
    name: &'static str,
    description: &'static str,
    arguments: Vec<McpPromptArgument>,
}

// ── Definitions ──────────────────────────────────────────────────────

fn tool_definitions() -> Vec<McpToolDefinition> {
    vec![
        McpToolDefinition {
            name: CREATE_SECRET,
            description: "Create or update a secret in the KV v2 mount. Every write creates a new version.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Secret path inside the mount (e.g. 'app/config')"
                    },
                    "data": {
                        "type": "object",
                        "description": "Key/value pairs to store",
                        "additionalProperties": true
                    }
                },
                "required": ["path", "data"]
            }),
        },
        McpToolDefinition {
            name: READ_SECRET,
            description: "Read the latest version of a secret and return its key/value pairs.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Secret path inside the mount (e.g. 'app/config')"
                    }
                },
                "required": ["path"]
            }),
        },
        McpToolDefinition {
            name: DELETE_SECRET,
            description: "Soft-delete the current version of a secret. Earlier versions stay recoverable. \
                          If Vault reports no current version, all versions and metadata are removed.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Secret path inside the mount"
                    }
                },
                "required": ["path"]
            }),
        },
        McpToolDefinition {
            name: CREATE_POLICY,
            description: "Create or fully replace a named ACL policy.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Policy name"
                    },
                    "policy": {
                        "type": "string",
                        "description": "Policy document in HCL or JSON"
                    }
                },
                "required": ["name", "policy"]
            }),
        },
    ]
}

fn resource_definitions() -> Vec<McpResource> {
    vec![
        McpResource {
            uri: SECRETS_URI,
            name: "Secrets",
            description: "Keys at the root of the KV mount. Empty when the mount is unreadable.",
            mime_type: "application/json",
        },
        McpResource {
            uri: POLICIES_URI,
            name: "Policies",
            description: "Names of all ACL policies.",
            mime_type: "application/json",
        },
    ]
}

fn prompt_definitions() -> Vec<McpPrompt> {
    vec![McpPrompt {
        name: GENERATE_POLICY_PROMPT,
        description: "Draft an ACL policy granting capabilities on one path.",
        arguments: vec![
            McpPromptArgument {
                name: "path",
                description: "Path pattern the policy applies to (e.g. 'secret/data/apps/*')",
                required: true,
            },
            McpPromptArgument {
                name: "capabilities",
                description: "Comma-separated capabilities (e.g. 'read, list')",
                required: true,
            },
        ],
    }]
}

// ── Handlers ─────────────────────────────────────────────────────────

fn tool_result(output: ToolOutput) -> Value {
    let mut result = json!({
        "content": [{
            "type": "text",
            "text": output.text
        }]
    });
    if let Some(structured) = output.structured.filter(Value::is_object) {
        result["structuredContent"] = structured;
    }
    if output.is_error {
        result["isError"] = Value::Bool(true);
    }
    result
}

fn resource_contents(uri: &str, value: &Value) -> Value {
    json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }]
    })
}

async fn read_resource(ops: &Operations, id: Value, params: &Value) -> JsonRpcResponse {
    let Some(uri) = params.get("uri").and_then(Value::as_str) else {
        return rpc_err(id, INVALID_PARAMS, "missing required parameter: uri".into());
    };
    info!(uri, "resource read");

    match uri {
        SECRETS_URI => {
            let keys = ops.list_secrets().await;
            rpc_ok(id, resource_contents(uri, &json!(keys)))
        }
        POLICIES_URI => match ops.list_policies().await {
            Ok(names) => rpc_ok(id, resource_contents(uri, &json!(names))),
            Err(e) => {
                warn!(error = %e, "policy listing failed");
                rpc_err(id, INTERNAL_ERROR, e.to_string())
            }
        },
        other => rpc_err(id, INVALID_PARAMS, format!("unknown resource: {other}")),
    }
}

fn get_prompt(id: Value, params: &Value) -> JsonRpcResponse {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    if name != GENERATE_POLICY_PROMPT {
        return rpc_err(id, INVALID_PARAMS, format!("unknown prompt: {name}"));
    }
    info!(prompt = name, "prompt get");

    let args = params.get("arguments").cloned().unwrap_or(Value::Null);
    let path = args.get("path").and_then(Value::as_str);
    let capabilities = args.get("capabilities").and_then(Value::as_str);
    let (Some(path), Some(capabilities)) = (path, capabilities) else {
        return rpc_err(
            id,
            INVALID_PARAMS,
            "prompt arguments 'path' and 'capabilities' are required".into(),
        );
    };

    let draft = generate_policy(path, capabilities);
    let draft_text = serde_json::to_string_pretty(&draft).unwrap_or_else(|_| draft.to_string());
    let text = format!(
        "Here is a draft Vault ACL policy for '{path}':\n\n```json\n{draft_text}\n```\n\n\
         Review the capabilities, then save it with the `{CREATE_POLICY}` tool."
    );

    rpc_ok(
        id,
        json!({
            "description": format!("ACL policy draft for {path}"),
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": text }
            }]
        }),
    )
}

/// Handle a single JSON-RPC request and return a response, or `None` for
/// notifications.
pub async fn handle_request(ops: &Operations, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let id = req.id.clone().unwrap_or(Value::Null);
    let params = req.params.unwrap_or(Value::Null);

    if req.jsonrpc != "2.0" {
        req.id.as_ref()?;
        return Some(rpc_err(
            id,
            INVALID_REQUEST,
            "jsonrpc must be \"2.0\"".into(),
        ));
    }

    match req.method.as_str() {
        // ── MCP handshake ────────────────────────────────────────
        "initialize" => Some(rpc_ok(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {},
                    "prompts": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )),

        method if method.starts_with("notifications/") => None,

        "ping" => Some(rpc_ok(id, json!({}))),

        // ── Tools ────────────────────────────────────────────────
        "tools/list" => Some(rpc_ok(id, json!({ "tools": tool_definitions() }))),

        "tools/call" => {
            let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            let output = ops.call_tool(tool_name, &arguments).await;
            Some(rpc_ok(id, tool_result(output)))
        }

        // ── Resources ────────────────────────────────────────────
        "resources/list" => Some(rpc_ok(
            id,
            json!({ "resources": resource_definitions() }),
        )),

        "resources/read" => Some(read_resource(ops, id, &params).await),

        // ── Prompts ──────────────────────────────────────────────
        "prompts/list" => Some(rpc_ok(id, json!({ "prompts": prompt_definitions() }))),

        "prompts/get" => Some(get_prompt(id, &params)),

        // ── Unknown method ───────────────────────────────────────
        _ => {
            // Notifications (no id) are ignored.
            req.id.as_ref()?;
            Some(rpc_err(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: {}", req.method),
            ))
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    resp: &JsonRpcResponse,
) -> Result<()> {
    let mut out = serde_json::to_vec(resp).context("failed to serialize response")?;
    out.push(b'\n');
    writer
        .write_all(&out)
        .await
        .context("failed to write response")?;
    writer.flush().await.context("failed to flush output")
}

/// Serve JSON-RPC messages from `reader` until EOF, writing responses to `writer`.
///
/// # Errors
///
/// Returns `Err` if reading input or writing output fails.
pub async fn serve<R, W>(ops: &Operations, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let req: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "unparseable message");
                let resp = rpc_err(Value::Null, PARSE_ERROR, format!("parse error: {e}"));
                write_response(&mut writer, &resp).await?;
                continue;
            }
        };

        if let Some(resp) = handle_request(ops, req).await {
            write_response(&mut writer, &resp).await?;
        }
    }

    Ok(())
}

/// Entry point: run the MCP server on stdin/stdout.
///
/// # Errors
///
/// Returns `Err` if stdin/stdout I/O fails.
pub async fn run_mcp_server(ops: Operations) -> Result<()> {
    info!(mount = ops.mount(), "kvbridge MCP server started, reading from stdin");
    serve(&ops, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    info!("stdin closed, shutting down");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ops(server: &MockServer) -> Operations {
        Operations::connect(&server.uri(), "hvs.test", "secret").unwrap()
    }

    /// Feed `input` through the server and return each response line as JSON.
    async fn exchange(ops: &Operations, input: &str) -> Vec<Value> {
        let mut out = Vec::new();
        serve(ops, input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn request(id: u64, method: &str, params: Value) -> String {
        format!(
            "{}\n",
            json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
        )
    }

    #[tokio::test]
    async fn initialize_advertises_all_capabilities() {
        let server = MockServer::start().await;
        let resp = exchange(&ops(&server), &request(1, "initialize", json!({}))).await;
        let caps = &resp[0]["result"]["capabilities"];
        assert!(caps.get("tools").is_some());
        assert!(caps.get("resources").is_some());
        assert!(caps.get("prompts").is_some());
        assert_eq!(resp[0]["result"]["serverInfo"]["name"], "kvbridge");
    }

    #[tokio::test]
    async fn notifications_and_blank_lines_produce_no_output() {
        let server = MockServer::start().await;
        let input = "\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\
                     {\"jsonrpc\":\"2.0\",\"method\":\"something/else\"}\n";
        assert!(exchange(&ops(&server), input).await.is_empty());
    }

    #[tokio::test]
    async fn protocol_errors() {
        let server = MockServer::start().await;
        let input = format!(
            "not json\n{}{}",
            request(2, "secrets/destroy", json!({})),
            "{\"jsonrpc\":\"1.0\",\"id\":3,\"method\":\"ping\"}\n"
        );
        let resp = exchange(&ops(&server), &input).await;
        assert_eq!(resp[0]["error"]["code"], PARSE_ERROR);
        assert_eq!(resp[1]["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(resp[1]["id"], 2);
        assert_eq!(resp[2]["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn lists_tools_resources_and_prompts() {
        let server = MockServer::start().await;
        let input = format!(
            "{}{}{}",
            request(1, "tools/list", json!({})),
            request(2, "resources/list", json!({})),
            request(3, "prompts/list", json!({}))
        );
        let resp = exchange(&ops(&server), &input).await;

        let tools: Vec<&str> = resp[0]["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            tools,
            vec!["create_secret", "read_secret", "delete_secret", "create_policy"]
        );
        assert_eq!(resp[1]["result"]["resources"][0]["uri"], SECRETS_URI);
        assert_eq!(resp[1]["result"]["resources"][1]["uri"], POLICIES_URI);
        assert_eq!(resp[2]["result"]["prompts"][0]["name"], GENERATE_POLICY_PROMPT);
    }

    #[tokio::test]
    async fn tool_call_error_is_flagged_not_rpc_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/app/config"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({ "errors": ["permission denied"] })),
            )
            .mount(&server)
            .await;

        let input = request(
            7,
            "tools/call",
            json!({ "name": "read_secret", "arguments": { "path": "app/config" } }),
        );
        let resp = exchange(&ops(&server), &input).await;
        let result = &resp[0]["result"];
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("403"));
        assert!(text.contains("permission denied"));
    }

    #[tokio::test]
    async fn tool_call_success_carries_structured_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/app/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "data": { "username": "demo" } }
            })))
            .mount(&server)
            .await;

        let input = request(
            8,
            "tools/call",
            json!({ "name": "read_secret", "arguments": { "path": "app/config" } }),
        );
        let resp = exchange(&ops(&server), &input).await;
        let result = &resp[0]["result"];
        assert!(result.get("isError").is_none());
        assert_eq!(result["structuredContent"], json!({ "username": "demo" }));
    }

    #[tokio::test]
    async fn secrets_resource_is_empty_on_fresh_mount() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/metadata/"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
            .mount(&server)
            .await;

        let resp = exchange(
            &ops(&server),
            &request(4, "resources/read", json!({ "uri": SECRETS_URI })),
        )
        .await;
        let contents = &resp[0]["result"]["contents"][0];
        assert_eq!(contents["uri"], SECRETS_URI);
        let keys: Value = serde_json::from_str(contents["text"].as_str().unwrap()).unwrap();
        assert_eq!(keys, json!([]));
    }

    #[tokio::test]
    async fn policies_resource_propagates_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/policies/acl"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({ "errors": ["permission denied"] })),
            )
            .mount(&server)
            .await;

        let resp = exchange(
            &ops(&server),
            &request(5, "resources/read", json!({ "uri": POLICIES_URI })),
        )
        .await;
        assert_eq!(resp[0]["error"]["code"], INTERNAL_ERROR);
        assert!(
            resp[0]["error"]["message"]
                .as_str()
                .unwrap()
                .contains("permission denied")
        );
    }

    #[tokio::test]
    async fn policies_resource_lists_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/policies/acl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "keys": ["default", "root"] }
            })))
            .mount(&server)
            .await;

        let resp = exchange(
            &ops(&server),
            &request(6, "resources/read", json!({ "uri": POLICIES_URI })),
        )
        .await;
        let text = resp[0]["result"]["contents"][0]["text"].as_str().unwrap();
        let names: Value = serde_json::from_str(text).unwrap();
        assert_eq!(names, json!(["default", "root"]));
    }

    #[tokio::test]
    async fn unknown_resource_is_invalid_params() {
        let server = MockServer::start().await;
        let resp = exchange(
            &ops(&server),
            &request(9, "resources/read", json!({ "uri": "vault://transit" })),
        )
        .await;
        assert_eq!(resp[0]["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn prompt_renders_policy_draft_without_remote_calls() {
        let server = MockServer::start().await;
        let resp = exchange(
            &ops(&server),
            &request(
                10,
                "prompts/get",
                json!({
                    "name": "generate_policy",
                    "arguments": { "path": "secret/data/apps/*", "capabilities": "read, list" }
                }),
            ),
        )
        .await;
        let text = resp[0]["result"]["messages"][0]["content"]["text"]
            .as_str()
            .unwrap();
        assert!(text.contains("\"secret/data/apps/*\""));
        assert!(text.contains("\"read\""));
        assert!(text.contains("\"list\""));
        assert!(!text.contains("\" list\""));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prompt_requires_arguments() {
        let server = MockServer::start().await;
        let resp = exchange(
            &ops(&server),
            &request(11, "prompts/get", json!({ "name": "generate_policy", "arguments": {} })),
        )
        .await;
        assert_eq!(resp[0]["error"]["code"], INVALID_PARAMS);
    }
}
