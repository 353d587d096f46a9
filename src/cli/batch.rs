//! CLI `batch` command — run a JSON-lines file of tool calls with per-item status.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::path::Path;

use ensue::batch::BatchItem;
use ensue::config::EnsueConfig;
use ensue::Session;

#[derive(Debug, Deserialize)]
struct BatchLine {
    tool: String,
    #[serde(default)]
    arguments: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    label: Option<String>,
}

fn parse_items(contents: &str) -> Result<Vec<BatchItem>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let parsed: BatchLine = serde_json::from_str(line)
                .with_context(|| format!("line {}: invalid batch entry", i + 1))?;
            let label = parsed.label.unwrap_or_else(|| {
                parsed
                    .arguments
                    .get("key")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("item {}", i + 1))
            });
            Ok(BatchItem {
                label,
                tool: parsed.tool,
                arguments: parsed.arguments,
            })
        })
        .collect()
}

pub async fn batch(config: &EnsueConfig, file: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read batch file {}", file.display()))?;
    let items = parse_items(&contents)?;

    let mut session = Session::start(config)?;

    let pb = ProgressBar::new(items.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} {msg}")
            .expect("valid template")
            .progress_chars("##-"),
    );

    let report = session
        .run_batch(items, |outcome| {
            pb.set_message(outcome.label.clone());
            pb.inc(1);
        })
        .await?;
    pb.finish_and_clear();

    print!("{}", report.summary());
    Ok(())
}
