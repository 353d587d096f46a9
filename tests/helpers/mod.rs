#![allow(dead_code)]

use ensue::config::EnsueConfig;
use ensue::credential::Credential;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TEST_KEY: &str = "test-secret-key-123";

/// Config pointing at a mock server, with a credential and no retries.
pub fn test_config(uri: &str) -> EnsueConfig {
    let mut config = EnsueConfig::default();
    config.server.url = format!("{uri}/");
    config.server.timeout_secs = 5;
    config.retry.max_retries = 0;
    config.retry.initial_delay_ms = 1;
    config.credential = Credential::new(TEST_KEY);
    config
}

fn key_schema(field: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(field.to_string(), json!({ "type": "string" }));
    json!({ "type": "object", "properties": properties, "required": [field] })
}

/// Tool descriptors shaped like the memory network's `tools/list`.
pub fn tool_list() -> Value {
    json!([
        {
            "name": "create_memory",
            "description": "Create one or more memories",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "key_name": { "type": "string" },
                                "value": { "type": "string" },
                                "description": { "type": "string" }
                            },
                            "required": ["key_name", "value"]
                        }
                    }
                },
                "required": ["items"]
            }
        },
        {
            "name": "get_memory",
            "description": "Get memories by key",
            "inputSchema": {
                "type": "object",
                "properties": { "key_names": { "type": "array", "items": { "type": "string" } } },
                "required": ["key_names"]
            }
        },
        {
            "name": "discover_memories",
            "description": "Semantic search",
            "inputSchema": {
                "type": "object",
                "properties": { "query": { "type": "string" }, "limit": { "type": "integer" } },
                "required": ["query"]
            }
        },
        {
            "name": "update_memory",
            "inputSchema": {
                "type": "object",
                "properties": { "key_name": { "type": "string" }, "value": { "type": "string" } },
                "required": ["key_name", "value"]
            }
        },
        {
            "name": "delete_memory",
            "inputSchema": {
                "type": "object",
                "properties": { "key_names": { "type": "array", "items": { "type": "string" } } },
                "required": ["key_names"]
            }
        },
        {
            "name": "list_keys",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer" },
                    "offset": { "type": "integer" },
                    "prefix": { "type": "string" }
                }
            }
        },
        {
            "name": "share",
            "inputSchema": {
                "type": "object",
                "properties": { "key_name": { "type": "string" }, "user_id": { "type": "string" } },
                "required": ["key_name", "user_id"]
            }
        },
        {
            "name": "revoke_share",
            "inputSchema": {
                "type": "object",
                "properties": { "key_name": { "type": "string" }, "user_id": { "type": "string" } },
                "required": ["key_name", "user_id"]
            }
        },
        { "name": "list_permissions", "inputSchema": key_schema("key_name") },
        { "name": "subscribe_to_memory", "inputSchema": key_schema("key_name") }
    ])
}

/// How a JSON-RPC response is framed on the wire.
#[derive(Debug, Clone, Copy)]
pub enum Framing {
    Json,
    /// One `text/event-stream` event.
    Sse,
    /// A progress notification then the response, CRLF line endings.
    SseCrlf,
}

/// Responds to a JSON-RPC request with the same `id`, as an MCP server does.
#[derive(Debug, Clone)]
pub struct RpcReply {
    outcome: (&'static str, Value),
    framing: Framing,
    delay: Option<Duration>,
    session_id: Option<&'static str>,
}

impl RpcReply {
    pub fn result(result: Value) -> Self {
        Self {
            outcome: ("result", result),
            framing: Framing::Json,
            delay: None,
            session_id: None,
        }
    }

    pub fn error(code: i64, message: &str) -> Self {
        Self::result(Value::Null).with_outcome("error", json!({ "code": code, "message": message }))
    }

    pub fn error_with_data(code: i64, message: &str, data: Value) -> Self {
        Self::result(Value::Null).with_outcome(
            "error",
            json!({ "code": code, "message": message, "data": data }),
        )
    }

    fn with_outcome(mut self, field: &'static str, value: Value) -> Self {
        self.outcome = (field, value);
        self
    }

    pub fn framed(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn session(mut self, id: &'static str) -> Self {
        self.session_id = Some(id);
        self
    }
}

impl Respond for RpcReply {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = request
            .body_json::<Value>()
            .ok()
            .and_then(|body| body.get("id").cloned())
            .unwrap_or(Value::Null);
        let mut envelope = json!({ "jsonrpc": "2.0", "id": id });
        envelope[self.outcome.0] = self.outcome.1.clone();

        let mut template = match self.framing {
            Framing::Json => ResponseTemplate::new(200).set_body_json(&envelope),
            Framing::Sse => ResponseTemplate::new(200)
                .set_body_raw(format!("event: message\ndata: {envelope}\n\n"), "text/event-stream"),
            Framing::SseCrlf => {
                let progress = json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/progress",
                    "params": { "progressToken": 1, "progress": 0.5 }
                });
                ResponseTemplate::new(200).set_body_raw(
                    format!(
                        "event: message\r\ndata: {progress}\r\n\r\nevent: message\r\ndata: {envelope}\r\n\r\n"
                    ),
                    "text/event-stream",
                )
            }
        };
        if let Some(session) = self.session_id {
            template = template.insert_header("mcp-session-id", session);
        }
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": "2025-03-26",
        "capabilities": { "tools": {} },
        "serverInfo": { "name": "memory-network", "version": "1.0.0" }
    })
}

/// A `tools/call` result whose text content is `payload` serialized.
pub fn text_result(payload: Value) -> RpcReply {
    RpcReply::result(json!({
        "content": [{ "type": "text", "text": payload.to_string() }],
        "isError": false
    }))
}

pub fn tool_error(message: &str) -> RpcReply {
    RpcReply::result(json!({
        "content": [{ "type": "text", "text": message }],
        "isError": true
    }))
}

/// `initialize` plus the `notifications/initialized` acknowledgement.
pub async fn mount_handshake(server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "initialize" })))
        .respond_with(RpcReply::result(initialize_result()))
        .mount(server)
        .await;
    mount_initialized(server).await;
}

pub async fn mount_initialized(server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "notifications/initialized" })))
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;
}

/// Handshake and a `tools/list` answering with [`tool_list`].
pub async fn mount_discovery(server: &MockServer) {
    mount_handshake(server).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(RpcReply::result(json!({ "tools": tool_list() })))
        .mount(server)
        .await;
}

pub async fn mount_tool(server: &MockServer, name: &str, response: impl Respond + 'static) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/call", "params": { "name": name } })))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Every JSON-RPC body POSTed to the server, in order.
pub async fn rpc_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .filter_map(|r| r.body_json::<Value>().ok())
        .collect()
}

/// Bodies of every request using `rpc_method`.
pub fn requests_for<'a>(bodies: &'a [Value], rpc_method: &str) -> Vec<&'a Value> {
    bodies.iter().filter(|b| b["method"] == rpc_method).collect()
}

/// Arguments of every `tools/call` to `tool`, in order.
pub fn calls_to(bodies: &[Value], tool: &str) -> Vec<Value> {
    bodies
        .iter()
        .filter(|b| b["method"] == "tools/call" && b["params"]["name"] == tool)
        .map(|b| b["params"]["arguments"].clone())
        .collect()
}

pub fn all_calls(bodies: &[Value]) -> usize {
    bodies.iter().filter(|b| b["method"] == "tools/call").count()
}
