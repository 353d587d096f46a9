//! Error taxonomy for the memory-network client.
//!
//! Clarification requests and declined confirmations are not errors; they are
//! [`Reply`](crate::session::Reply) variants.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnsueError>;

#[derive(Debug, Error)]
pub enum EnsueError {
    /// No credential configured. Fatal for the interaction, never retried.
    #[error(
        "no API key configured. Set ENSUE_API_KEY in your shell environment \
         (for example `export ENSUE_API_KEY=...` in your profile) and start a new session. \
         Do not paste the key into the conversation."
    )]
    MissingCredential,

    #[error("tool discovery failed: {0}")]
    Discovery(String),

    /// An operation was attempted before a successful `tools/list` in this session.
    #[error("tool discovery has not completed for this session")]
    DiscoveryRequired,

    #[error("remote endpoint does not offer tool `{0}`")]
    UnknownTool(String),

    #[error("invalid arguments for `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error(
        "JSON-RPC error {code}: {message}{}",
        .data.as_ref().map(|d| format!(" ({d})")).unwrap_or_default()
    )]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The call reached the tool but the tool reported `isError`.
    #[error("`{tool}` failed: {payload}")]
    ToolFailed { tool: String, payload: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("confirmation error: {0}")]
    Confirmation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EnsueError {
    /// Transient failures worth another attempt: timeouts, connection problems,
    /// rate limiting and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}
