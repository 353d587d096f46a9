mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ensue::config::EnsueConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ensue", version, about = "Talk to the Ensue Memory Network")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle one request, e.g. `ensue ask "remember my editor is helix"`
    Ask {
        /// The request, in plain words
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
    },
    /// Interactive session: one request per line
    Chat {
        /// Automatically capture each request as a session log memory
        #[arg(long)]
        capture: bool,
    },
    /// List the tools the endpoint currently offers
    Tools {
        /// Print full input schemas
        #[arg(long)]
        schemas: bool,
    },
    /// Call a tool directly with JSON arguments
    Call {
        tool: String,
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// Report how many keys exist (count query only)
    Count {
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Browse keys a small page at a time
    Browse {
        #[arg(long)]
        prefix: Option<String>,
        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Run a JSON-lines batch file of `{"tool", "arguments", "label"}` objects
    Batch { file: std::path::PathBuf },
    /// Check configuration and connectivity
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EnsueConfig::load()?;

    // Log to stderr so stdout carries only results.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Ask { request } => cli::ask::ask(&config, &request.join(" ")).await?,
        Command::Chat { capture } => cli::chat::chat(&config, capture).await?,
        Command::Tools { schemas } => cli::tools::tools(&config, schemas).await?,
        Command::Call { tool, arguments } => cli::call::call(&config, &tool, &arguments).await?,
        Command::Count { prefix } => cli::browse::count(&config, prefix.as_deref()).await?,
        Command::Browse {
            prefix,
            page,
            page_size,
        } => cli::browse::browse(&config, prefix, page, page_size).await?,
        Command::Batch { file } => cli::batch::batch(&config, &file).await?,
        Command::Doctor => cli::doctor::doctor(&config).await?,
    }

    Ok(())
}
