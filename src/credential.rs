//! Bearer credential handling.
//!
//! [`Credential`] wraps the API key so it cannot leak through `Debug`, `Display`
//! or tracing fields. The only way to read the value is [`Credential::expose`],
//! which the MCP transport receives as its bearer token.

use std::fmt;

use crate::error::{EnsueError, Result};

#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token. Surrounding whitespace (e.g. a trailing newline from a
    /// key file) is trimmed; an empty token is treated as absent.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Credential gate: pass only when a credential is configured.
///
/// Reports presence or absence and nothing else.
pub fn require(credential: Option<&Credential>) -> Result<&Credential> {
    match credential {
        Some(c) => {
            tracing::debug!(credential = "present", "credential gate passed");
            Ok(c)
        }
        None => {
            tracing::warn!(credential = "absent", "credential gate blocked session start");
            Err(EnsueError::MissingCredential)
        }
    }
}
