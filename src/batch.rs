//! Batch executor for homogeneous operations.
//!
//! Items run in order and independently: a failed item is recorded and the
//! loop moves on. There is no rollback; partial completion is reported per item.

use std::future::Future;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::rpc::ToolOutput;

/// Homogeneous requests at or above this size run as one batch.
pub const MIN_BATCH_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    /// Shown in the per-item report (usually the key).
    pub label: String,
    pub tool: String,
    /// Canonical arguments, shaped against the tool schema at call time.
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub label: String,
    pub result: std::result::Result<String, String>,
}

impl ItemOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} of {} succeeded, {} failed\n",
            self.succeeded(),
            self.outcomes.len(),
            self.failed()
        );
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(detail) => out.push_str(&format!("  ok      {}  {}\n", outcome.label, detail)),
                Err(err) => out.push_str(&format!("  FAILED  {}  {}\n", outcome.label, err)),
            }
        }
        out
    }
}

/// Run every item through `call`, reporting each outcome to `observer` as it
/// completes.
pub async fn execute<F, Fut, O>(items: Vec<BatchItem>, mut call: F, mut observer: O) -> BatchReport
where
    F: FnMut(BatchItem) -> Fut,
    Fut: Future<Output = Result<ToolOutput>>,
    O: FnMut(&ItemOutcome),
{
    let total = items.len();
    let mut report = BatchReport::default();

    for (i, item) in items.into_iter().enumerate() {
        let label = item.label.clone();
        let result = match call(item).await {
            Ok(output) => Ok(one_line(&output.text)),
            Err(e) => {
                tracing::warn!(item = %label, index = i + 1, total, error = %e, "batch item failed");
                Err(e.to_string())
            }
        };
        let outcome = ItemOutcome { label, result };
        observer(&outcome);
        report.outcomes.push(outcome);
    }

    tracing::info!(
        total,
        succeeded = report.succeeded(),
        failed = report.failed(),
        "batch finished"
    );
    report
}

fn one_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > 80 {
        format!("{}...", line.chars().take(80).collect::<String>())
    } else {
        line.to_string()
    }
}
