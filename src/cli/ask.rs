//! CLI `ask` command — handle one natural-language request.

use anyhow::Result;
use ensue::config::EnsueConfig;
use ensue::Session;

pub async fn ask(config: &EnsueConfig, request: &str) -> Result<()> {
    let mut session = Session::start(config)?;
    let reply = session.handle(request).await?;
    super::settle(&mut session, reply).await
}
