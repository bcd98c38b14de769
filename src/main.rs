use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use report_gate::models::{Reviewer, UserId};

mod cmd;

#[derive(Parser)]
#[command(name = "report-gate")]
#[command(version, about = "Status report review with AI confidence gating")]
pub struct Cli {
    /// Path to report-gate.toml
    #[arg(long, global = true, default_value = "report-gate.toml")]
    pub config: PathBuf,

    /// SQLite database holding reports and analyses
    #[arg(long, global = true, env = "REPORT_GATE_DB", default_value = "report-gate.db")]
    pub db: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Print command results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Analysis provider override (mock, openai, anthropic). Wins over config and env.
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Confidence threshold override (0.0-1.0)
    #[arg(long, global = true)]
    pub threshold: Option<f64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Create a draft report
    Create {
        /// Author user id
        #[arg(long)]
        author: i64,
        #[arg(long)]
        title: String,
        /// Reporting period, e.g. 2026-W42
        #[arg(long)]
        period: String,
        /// Report body
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        content: Option<String>,
        /// Read the report body from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Submit a report and run the AI review
    Submit {
        id: i64,
        /// Submitting author
        #[arg(long)]
        author: i64,
        /// Seconds to wait for the analysis (defaults to the provider timeout)
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Approve a report waiting for admin review
    Approve {
        id: i64,
        #[command(flatten)]
        reviewer: ReviewerArgs,
    },
    /// Reject a report waiting for admin review
    Reject {
        id: i64,
        #[command(flatten)]
        reviewer: ReviewerArgs,
        #[arg(long)]
        reason: String,
    },
    /// Supervisor override: accept a report without further review
    ForceSubmit {
        id: i64,
        #[arg(long)]
        supervisor: i64,
    },
    /// Show a report and its current analysis
    Show { id: i64 },
    /// Re-run the AI review for a report
    Retry {
        id: i64,
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Re-send the AI decision notification for a report
    Resend { id: i64 },
    /// Mail reviewers the number of reports waiting for them
    Digest,
    /// Fail analyses stuck in PENDING
    Sweep {
        /// Age in seconds (defaults to analysis.stuck_after_secs)
        #[arg(long)]
        older_than: Option<u64>,
    },
    /// Score a file with the configured provider without storing anything
    Analyze { file: PathBuf },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration
    Validate,
    /// Write a default report-gate.toml
    Init,
}

#[derive(Args, Clone, Copy)]
pub struct ReviewerArgs {
    /// Acting admin user id
    #[arg(long, conflicts_with = "super_admin", required_unless_present = "super_admin")]
    pub admin: Option<i64>,
    /// Acting super-admin user id
    #[arg(long)]
    pub super_admin: Option<i64>,
}

impl ReviewerArgs {
    pub fn reviewer(&self) -> Result<Reviewer> {
        match (self.admin, self.super_admin) {
            (Some(id), None) => Ok(Reviewer::Admin(UserId(id))),
            (None, Some(id)) => Ok(Reviewer::SuperAdmin(UserId(id))),
            _ => anyhow::bail!("Pass exactly one of --admin or --super-admin"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = cmd::load_config(&cli)?;
    report_gate::logging::init(&config.logging, cli.json_logs)?;

    match &cli.command {
        Commands::Config { command } => cmd::cmd_config(&cli, &config, command.clone())?,
        Commands::Analyze { file } => cmd::cmd_analyze(&cli, &config, file).await?,
        command => cmd::run_review_command(&cli, config, command).await?,
    }

    Ok(())
}
