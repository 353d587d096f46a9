//! MCP client over streamable HTTP.
//!
//! [`RpcClient`] connects lazily with rmcp's streamable-HTTP transport, which
//! performs the `initialize` / `notifications/initialized` handshake, carries
//! the `Mcp-Session-Id` header, and decodes both plain JSON and SSE-framed
//! responses. A connection that fails at the transport level is dropped and
//! re-established on the next attempt.

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use rmcp::model::{CallToolRequestParams, ClientInfo, Content, ErrorData, Implementation, RawContent};
use rmcp::service::{ClientInitializeError, RunningService};
use rmcp::transport::streamable_http_client::{StreamableHttpClientTransportConfig, StreamableHttpError};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{Peer, RoleClient, ServiceError, ServiceExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{EnsueConfig, RetryConfig};
use crate::credential::Credential;
use crate::error::{EnsueError, Result};
use crate::tools::ToolDescriptor;

type Connection = RunningService<RoleClient, ClientInfo>;
type TransportError = dyn std::error::Error + Send + Sync + 'static;

/// Decoded `tools/call` result.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Concatenated text content.
    pub text: String,
    /// Structured content, or the text parsed as JSON when it is JSON.
    pub json: Option<Value>,
}

/// Whether a call may be retried on transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Transient,
    Never,
}

pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    credential: Credential,
    retry: RetryConfig,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl RpcClient {
    pub fn new(config: &EnsueConfig, credential: Credential) -> Result<Self> {
        // Per-request deadlines are enforced around each MCP request instead of
        // on the client, which also carries the long-lived event stream.
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| EnsueError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: config.server.url.clone(),
            credential,
            retry: config.retry.clone(),
            timeout: config.timeout(),
            connection: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `tools/list`, following cursor pages.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let tools = self
            .request("tools/list", Retry::Transient, |peer| async move {
                peer.list_all_tools().await
            })
            .await?;
        debug!(count = tools.len(), "tools/list returned");
        Ok(tools.into_iter().map(ToolDescriptor::from).collect())
    }

    /// `tools/call` with `{name, arguments}`.
    ///
    /// A result flagged `isError` becomes [`EnsueError::ToolFailed`] carrying the
    /// remote payload.
    pub async fn call_tool(&self, name: &str, arguments: Value, retry: Retry) -> Result<ToolOutput> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(EnsueError::InvalidArguments {
                    tool: name.to_string(),
                    reason: format!("arguments must be a JSON object, got {other}"),
                })
            }
        };

        let result = self
            .request("tools/call", retry, |peer| {
                let params = CallToolRequestParams {
                    meta: None,
                    name: Cow::Owned(name.to_string()),
                    arguments: arguments.clone(),
                    task: None,
                };
                async move { peer.call_tool(params).await }
            })
            .await?;

        let text = extract_text(&result.content);
        if result.is_error.unwrap_or(false) {
            return Err(EnsueError::ToolFailed {
                tool: name.to_string(),
                payload: self.scrub(text),
            });
        }

        let json = result
            .structured_content
            .or_else(|| serde_json::from_str(&text).ok());

        Ok(ToolOutput { text, json })
    }

    /// Run one MCP request with the per-request deadline and retry policy.
    async fn request<T, F, Fut>(&self, method: &str, retry: Retry, mut send: F) -> Result<T>
    where
        F: FnMut(Peer<RoleClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, ServiceError>>,
    {
        let max_retries = match retry {
            Retry::Transient => self.retry.max_retries,
            Retry::Never => 0,
        };

        let mut attempt = 0;
        loop {
            let outcome = match self.peer().await {
                Ok(peer) => {
                    debug!(method, "sending MCP request");
                    match tokio::time::timeout(self.timeout, send(peer)).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(self.service_error(e)),
                        Err(_) => Err(EnsueError::Timeout),
                    }
                }
                Err(e) => Err(e),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if err.is_retryable() {
                self.disconnect().await;
            }
            if !err.is_retryable() || attempt >= max_retries {
                return Err(err);
            }

            let delay = compute_delay(&self.retry, attempt);
            warn!(
                method,
                attempt = attempt + 1,
                max_retries,
                delay_ms = delay,
                error = %err,
                "retrying MCP request"
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }

    /// The live session peer, initializing a new MCP session when needed.
    async fn peer(&self) -> Result<Peer<RoleClient>> {
        let mut connection = self.connection.lock().await;
        if let Some(running) = connection.as_ref() {
            if !running.is_closed() && !running.is_transport_closed() {
                return Ok(running.peer().clone());
            }
        }

        let transport = StreamableHttpClientTransport::with_client(
            self.http.clone(),
            StreamableHttpClientTransportConfig::with_uri(self.url.as_str())
                .auth_header(self.credential.expose()),
        );

        let running = tokio::time::timeout(self.timeout, client_info().serve(transport))
            .await
            .map_err(|_| EnsueError::Timeout)?
            .map_err(|e| self.initialize_error(e))?;

        if let Some(server) = running.peer_info() {
            info!(
                server = %server.server_info.name,
                version = %server.server_info.version,
                protocol = %server.protocol_version,
                "MCP session initialized"
            );
        }

        let peer = running.peer().clone();
        *connection = Some(running);
        Ok(peer)
    }

    async fn disconnect(&self) {
        if self.connection.lock().await.take().is_some() {
            debug!("dropped MCP session after transport failure");
        }
    }

    fn service_error(&self, err: ServiceError) -> EnsueError {
        match err {
            ServiceError::McpError(data) => self.rpc_error(data),
            ServiceError::TransportSend(e) => self.transport_error(e.error.as_ref()),
            ServiceError::TransportClosed => EnsueError::Transport("connection closed".into()),
            ServiceError::Timeout { .. } => EnsueError::Timeout,
            other => EnsueError::Decode(self.scrub(other.to_string())),
        }
    }

    fn initialize_error(&self, err: ClientInitializeError) -> EnsueError {
        match err {
            ClientInitializeError::JsonRpcError(data) => self.rpc_error(data),
            ClientInitializeError::TransportError { error, context } => {
                debug!(%context, "MCP initialize failed");
                self.transport_error(error.error.as_ref())
            }
            ClientInitializeError::ConnectionClosed(reason) => {
                EnsueError::Transport(self.scrub(format!("connection closed: {reason}")))
            }
            other => EnsueError::Decode(self.scrub(other.to_string())),
        }
    }

    fn rpc_error(&self, data: ErrorData) -> EnsueError {
        EnsueError::Rpc {
            code: i64::from(data.code.0),
            message: self.scrub(data.message.into_owned()),
            data: data.data.map(|d| self.scrub_value(d)),
        }
    }

    /// Classify a streamable-HTTP failure: deadlines become [`EnsueError::Timeout`],
    /// HTTP statuses become [`EnsueError::Http`], everything else is transport.
    fn transport_error(&self, error: &TransportError) -> EnsueError {
        match error.downcast_ref::<StreamableHttpError<reqwest::Error>>() {
            Some(StreamableHttpError::Client(e)) if e.is_timeout() => EnsueError::Timeout,
            Some(StreamableHttpError::Client(e)) if e.status().is_some() => EnsueError::Http {
                status: e.status().map_or(0, |s| s.as_u16()),
                body: self.scrub(e.without_url().to_string()),
            },
            Some(StreamableHttpError::AuthRequired(auth)) => EnsueError::Http {
                status: 401,
                body: self.scrub(format!(
                    "authentication required ({})",
                    auth.www_authenticate_header
                )),
            },
            Some(StreamableHttpError::InsufficientScope(_)) => EnsueError::Http {
                status: 403,
                body: "insufficient scope".into(),
            },
            _ => EnsueError::Transport(self.scrub(error.to_string())),
        }
    }

    /// Remove any echo of the credential from remote-supplied text.
    fn scrub(&self, text: String) -> String {
        let secret = self.credential.expose();
        if text.contains(secret) {
            text.replace(secret, "[REDACTED]")
        } else {
            text
        }
    }

    fn scrub_value(&self, value: Value) -> Value {
        let raw = value.to_string();
        if !raw.contains(self.credential.expose()) {
            return value;
        }
        let scrubbed = self.scrub(raw);
        serde_json::from_str(&scrubbed).unwrap_or(Value::String(scrubbed))
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        client_info: Implementation {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn extract_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn compute_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    (base as u64).min(config.max_delay_ms)
}
