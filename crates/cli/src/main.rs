use clap::{Parser, Subcommand};

mod commands;
mod input;

use commands::{CheckConfigArgs, ReplayArgs, RunArgs};

#[derive(Parser)]
#[command(name = "signalscan")]
#[command(about = "Real-time signal detection and alert decisions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live pipeline over a JSONL event stream (file or stdin)
    Run(RunArgs),
    /// Replay a recorded JSONL event file deterministically
    Replay(ReplayArgs),
    /// Validate a configuration file and print the effective settings
    CheckConfig(CheckConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries alerts, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => {
            commands::run_live(args).await?;
        }
        Commands::Replay(args) => {
            commands::run_replay(args).await?;
        }
        Commands::CheckConfig(args) => {
            commands::run_check_config(&args)?;
        }
    }

    Ok(())
}
