//! CLI `count` and `browse` commands — bounded key enumeration.

use anyhow::Result;
use ensue::config::EnsueConfig;
use ensue::listing::PageRequest;
use ensue::Session;

/// Count query only; never lists.
pub async fn count(config: &EnsueConfig, prefix: Option<&str>) -> Result<()> {
    let mut session = Session::start(config)?;
    let reply = session.count(prefix).await?;
    println!("{}", reply.message());
    Ok(())
}

/// One page of keys. `page` is 1-based.
pub async fn browse(
    config: &EnsueConfig,
    prefix: Option<String>,
    page: usize,
    page_size: Option<usize>,
) -> Result<()> {
    let mut session = Session::start(config)?;
    let request = PageRequest::new(
        prefix,
        page.saturating_sub(1),
        page_size.unwrap_or(config.session.browse_page_size),
    );
    let reply = session.browse(request).await?;
    println!("{}", reply.message());
    Ok(())
}
