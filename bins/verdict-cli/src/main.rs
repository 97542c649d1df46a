mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "verdict-cli")]
#[command(about = "Verdict CLI - Run submissions locally and manage runtimes and packages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an execution request file and print the verdicts
    Run {
        /// Path to a JSON execution request
        #[arg(short, long)]
        request: PathBuf,

        /// Override the per-test timeout of every language
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Python interpreter to use instead of the configured one
        #[arg(long)]
        python: Option<String>,

        /// Print the raw result list as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// List the packages submissions may request
    Packages,

    /// List the configured language runtimes
    Languages,

    /// Initialize a new Verdict project
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            request,
            timeout_ms,
            python,
            json,
        } => {
            let all_passed = commands::run_request(&request, timeout_ms, python.as_deref(), json).await?;
            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Packages => {
            commands::list_packages().await?;
        }
        Commands::Languages => {
            commands::list_languages()?;
        }
        Commands::Init { path } => {
            commands::init_project(&path)?;
        }
    }

    Ok(())
}
