//! CLI `tools` command — show the endpoint's current tool surface.

use anyhow::{Context, Result};
use ensue::config::EnsueConfig;
use ensue::Session;

pub async fn tools(config: &EnsueConfig, schemas: bool) -> Result<()> {
    let mut session = Session::start(config)?;
    let catalog = session.refresh_tools().await?;

    println!("{} tool(s) available\n", catalog.len());
    for tool in catalog.iter() {
        println!("  {}", tool.name);
        if let Some(description) = &tool.description {
            println!("     {description}");
        }
        if schemas {
            let schema = serde_json::to_string_pretty(&tool.input_schema)
                .context("failed to render schema")?;
            for line in schema.lines() {
                println!("     {line}");
            }
        }
        println!();
    }

    Ok(())
}
