//! `prefsync` operator CLI.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Operator tooling for notification preferences
#[derive(Parser)]
#[command(name = "prefsync")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a backfill of notification preferences for the given courses
    GenerateNotificationPreferences(commands::generate::GenerateArgs),

    /// Mint an operator token for the HTTP API
    IssueToken(commands::token::IssueTokenArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("prefsync_engine=info,prefsync_cli=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::GenerateNotificationPreferences(args) => commands::generate::execute(args).await,
        Commands::IssueToken(args) => commands::token::execute(args),
    }
}
