//! CLI commands module.

mod cron;
mod onboard;
mod start;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub use cron::{cmd_cron, CronAction};
pub use onboard::cmd_onboard;
pub use start::cmd_start;

#[derive(Parser)]
#[command(name = "gatebot", about = "gatebot — Personal AI Assistant Gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration.
    Onboard,

    /// Start the supervised gateway daemon (cron + heartbeat).
    Start,

    /// Manage cron jobs.
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => cmd_onboard().await,
        Commands::Start => cmd_start().await,
        Commands::Cron { action } => cmd_cron(action).await,
    }
}
