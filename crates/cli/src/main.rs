//! WebPilot CLI: the main entry point.
//!
//! Commands:
//! - `run`      : Carry out an instruction in a browser tab
//! - `providers`: List model backends and their credentials
//! - `doctor`   : Diagnose configuration and environment
//! - `history`  : Show a stored chat

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "webpilot",
    about = "WebPilot — drive a browser tab with a language model",
    version,
    author
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
    /// Carry out an instruction on a web page
    Run(RunArgs),

    /// List model providers
    Providers {
        /// Also check that each credentialed provider is reachable
        #[arg(long)]
        check: bool,
    },

    /// Diagnose configuration and environment
    Doctor,

    /// Show a stored chat, or list chats when no id is given
    History { chat_id: Option<String> },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// What the agent should do
    pub instructions: String,

    /// Page to open first
    #[arg(long)]
    pub url: Option<String>,

    /// Continue an existing chat
    #[arg(long)]
    pub chat: Option<String>,

    /// Model as `provider:model` or a bare model id
    #[arg(long)]
    pub model: Option<String>,

    /// Wait for whole replies instead of streaming them
    #[arg(long)]
    pub no_stream: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Providers { check } => commands::providers::run(check).await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::History { chat_id } => commands::history::run(chat_id).await?,
    }

    Ok(())
}
