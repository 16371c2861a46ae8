// rlx Control CLI
// Command-line driver for the rlx PPO training engine

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod rl_commands;

#[derive(Parser)]
#[command(name = "rlxctl")]
#[command(about = "rlx training CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train an agent on an environment
    Train(rl_commands::TrainArgs),

    /// List registered algorithms and environments
    List,

    /// Print the default configuration as JSON
    DefaultConfig {
        /// Environment whose default config to print alongside
        #[arg(short, long, default_value = "pendulum")]
        env: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => rl_commands::train(args).await,
        Commands::List => rl_commands::list(),
        Commands::DefaultConfig { env } => rl_commands::default_config(&env),
    }
}
