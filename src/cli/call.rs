//! CLI `call` command — invoke a tool with raw JSON arguments.

use anyhow::{bail, Context, Result};
use ensue::config::EnsueConfig;
use ensue::Session;

pub async fn call(config: &EnsueConfig, tool: &str, arguments: &str) -> Result<()> {
    let parsed: serde_json::Value = serde_json::from_str(arguments)
        .with_context(|| format!("invalid JSON arguments: {arguments}"))?;
    let serde_json::Value::Object(arguments) = parsed else {
        bail!("arguments must be a JSON object, e.g. '{{\"limit\":5}}'");
    };

    let mut session = Session::start(config)?;
    let reply = session.call_raw(tool, arguments).await?;
    super::settle(&mut session, reply).await
}
