//! CLI `doctor` command — configuration and connectivity report.

use anyhow::Result;

use ensue::config::{default_config_path, EnsueConfig};
use ensue::intent::tool;
use ensue::Session;

const EXPECTED_TOOLS: &[&str] = &[
    tool::CREATE_MEMORY,
    tool::GET_MEMORY,
    tool::DISCOVER_MEMORIES,
    tool::UPDATE_MEMORY,
    tool::DELETE_MEMORY,
    tool::LIST_KEYS,
    tool::SHARE,
    tool::REVOKE_SHARE,
    tool::LIST_PERMISSIONS,
    tool::SUBSCRIBE_TO_MEMORY,
];

/// Print configuration (never the credential value) and try discovery.
pub async fn doctor(config: &EnsueConfig) -> Result<()> {
    println!("Ensue Health Report");
    println!("===================");
    println!();
    println!("Config file:       {}", default_config_path().display());
    println!("Endpoint:          {}", config.server.url);
    println!("Timeout:           {}s", config.server.timeout_secs);
    println!(
        "Read-only mode:    {}",
        if config.session.read_only { "on (auto-logging disabled)" } else { "off" }
    );
    println!(
        "Credential:        {}",
        if config.credential.is_some() { "present" } else { "NOT SET" }
    );
    println!();

    let mut session = match Session::start(config) {
        Ok(session) => session,
        Err(e) => {
            println!("{e}");
            return Ok(());
        }
    };

    match session.refresh_tools().await {
        Ok(catalog) => {
            println!("Discovery:         OK ({} tools)", catalog.len());
            let missing: Vec<&str> = EXPECTED_TOOLS
                .iter()
                .copied()
                .filter(|name| !catalog.contains(name))
                .collect();
            if !missing.is_empty() {
                println!("Not offered:       {}", missing.join(", "));
            }
        }
        Err(e) => println!("Discovery:         FAILED ({e})"),
    }

    Ok(())
}
