//! Client orchestrator for the Ensue Memory Network.
//!
//! The memory network is a remote key/value store with semantic search and
//! sharing, reached over MCP on streamable HTTP (`tools/list`, `tools/call`).
//! This crate turns a user's request into exactly one remote tool call, with
//! guard rails around the dangerous and the unbounded:
//!
//! | Step | Module |
//! |------|--------|
//! | Credential present? (value never shown) | [`credential`] |
//! | Discover the current tool surface | [`rpc`], [`tools`] |
//! | Classify the request | [`intent`] |
//! | Confirm deletes and revocations | [`confirm`] |
//! | Count before listing | [`listing`] |
//! | Per-item batches | [`batch`] |
//!
//! [`session::Session`] ties these together.
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`error`] — Error taxonomy
//! - [`session`] — The orchestrator

pub mod batch;
pub mod config;
pub mod confirm;
pub mod credential;
pub mod error;
pub mod intent;
pub mod listing;
pub mod rpc;
pub mod session;
pub mod tools;

pub use error::{EnsueError, Result};
pub use session::{Reply, Session};
