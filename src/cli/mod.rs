pub mod ask;
pub mod batch;
pub mod browse;
pub mod call;
pub mod chat;
pub mod doctor;
pub mod tools;

use anyhow::Result;
use ensue::{Reply, Session};
use std::io::Write;

/// Print a reply. If it asks for confirmation, read the answer from stdin and
/// resolve that exact proposal.
pub async fn settle(session: &mut Session, reply: Reply) -> Result<()> {
    println!("{}", reply.message());
    if let Reply::ConfirmationRequired(proposal) = reply {
        let answer = prompt_line("> ")?;
        let resolved = session.confirm(&proposal.token, &answer).await?;
        println!("{}", resolved.message());
    }
    Ok(())
}

/// Read one line from stdin after printing `prompt`. EOF yields an empty
/// string, which never counts as a confirmation.
pub fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
