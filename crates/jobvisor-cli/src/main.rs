use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod dispatch;

#[derive(Parser)]
#[command(name = "jobvisor")]
#[command(about = "Supervise scheduled and continuous background jobs", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/jobvisor/jobs.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor until Ctrl-C
    Run {
        /// Start these jobs in addition to the auto-start ones
        #[arg(short, long = "job")]
        jobs: Vec<String>,

        /// Print a status line per job every N seconds
        #[arg(short, long)]
        status_interval: Option<u64>,

        /// Print events and status as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List configured jobs
    Jobs {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Check the config without running anything
    Validate,

    /// Show or initialize the config file
    Config {
        /// Print the default config path
        #[arg(long)]
        path: bool,

        /// Write a sample config to the default path
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    use Commands::*;

    match cli.command {
        Run { jobs, status_interval, json } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::run::run(&config, &jobs, status_interval, json).await?;
        }
        Jobs { json } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::jobs::run(&config, json)?;
        }
        Validate => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::validate::run(&config)?;
        }
        Config { path, init } => {
            commands::config::run(path, init)?;
        }
    }

    Ok(())
}
