//! Erda CLI
//!
//! Command-line interface for the erda pipeline service.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "erda")]
#[command(about = "Erda CI/CD Pipeline CLI", long_about = None)]
struct Cli {
    /// Pipeline service URL
    #[arg(long, env = "ERDA_PIPELINE_URL", default_value = "http://localhost:3081")]
    pipeline_url: String,

    /// User ID sent with mutating requests
    #[arg(long, env = "ERDA_USER_ID")]
    user_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        pipeline_url: cli.pipeline_url,
        user_id: cli.user_id,
    };

    handle_command(cli.command, &config).await
}
