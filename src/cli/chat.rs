//! CLI `chat` command — a line-oriented conversation with the memory network.
//!
//! While a destructive action is pending, the next line is taken as the answer
//! to it.

use anyhow::Result;
use ensue::config::EnsueConfig;
use ensue::{Reply, Session};

pub async fn chat(config: &EnsueConfig, capture: bool) -> Result<()> {
    let mut session = Session::start(config)?;
    println!("Connected session. Type a request, or `exit` to quit.");

    loop {
        let line = super::prompt_line("ensue> ")?;
        match line.as_str() {
            "" => {
                if session.pending_confirmation().is_none() {
                    continue;
                }
            }
            "exit" | "quit" => break,
            _ => {}
        }

        let result = if session.pending_confirmation().is_some() {
            session.answer_pending(&line).await
        } else {
            session.handle(&line).await
        };

        match result {
            Ok(reply) => {
                println!("{}", reply.message());
                if capture && matches!(reply, Reply::Done { .. }) {
                    if let Err(e) = session.capture(&line).await {
                        tracing::warn!(error = %e, "auto-capture failed");
                    }
                }
            }
            Err(e) => println!("error: {e}"),
        }
    }

    Ok(())
}
