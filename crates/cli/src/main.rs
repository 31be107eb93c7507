//! isocode CLI — the main entry point.
//!
//! Commands:
//! - `serve`  — Start the HTTP + SSE server the editor extension talks to
//! - `config` — Print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "isocode",
    about = "isocode — local agentic coding assistant runtime",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,

        /// Default workspace root for listing endpoints
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },

    /// Print the effective configuration (API key redacted)
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port, workspace } => {
            let mut config = isocode_config::AppConfig::load();
            if let Some(port) = port {
                config.port = port;
            }
            let workspace = match workspace {
                Some(path) => path,
                None => std::env::current_dir()?,
            };
            tracing::info!(
                provider = %config.provider,
                base = %config.api_base,
                workspace = %workspace.display(),
                "starting isocode"
            );
            isocode_gateway::serve(config, workspace).await?;
        }
        Commands::Config => {
            let config = isocode_config::AppConfig::load();
            println!("{config:#?}");
        }
    }

    Ok(())
}
