use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "synthmon")]
#[command(version, about = "Synthetic monitoring worker - run multi-step HTTP, DNS and browser checks")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Path to synthmon.toml. Defaults to ./synthmon.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a check file for step errors and show the transports it can run on
    Validate {
        /// Path to the check YAML file
        file: PathBuf,
    },
    /// Run a check once on this machine
    Run {
        /// Path to the check YAML file
        file: PathBuf,

        /// Override the check's environment
        #[arg(short, long)]
        environment: Option<String>,

        /// Override the check's timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Treat the run as scheduled, so metrics and notifications fire
        #[arg(long)]
        scheduled: bool,
    },
    /// Show the effective worker configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    synthmon::logging::init_tracing(cli.verbose, cli.json_logs)?;

    match &cli.command {
        Commands::Validate { file } => cmd::cmd_validate(file)?,
        Commands::Run {
            file,
            environment,
            timeout,
            scheduled,
        } => {
            let outcome =
                cmd::cmd_run(&cli, file, environment.as_deref(), *timeout, *scheduled).await?;
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Config => cmd::cmd_config(cli.config.as_deref())?,
    }

    Ok(())
}
