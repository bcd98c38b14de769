//! Review commands backed by the SQLite store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use report_gate::config::GateConfig;
use report_gate::models::{NewReport, RejectedBy, ReportId, UserId};
use report_gate::service::{ReportView, ReviewService};
use report_gate::store::{AnalysisStore, ReportStore, SqliteStore};

use super::super::{Cli, Commands};

/// Extra seconds on top of the provider timeout when waiting for a result.
const WAIT_MARGIN_SECS: u64 = 5;

/// Run one review command, drain the pipeline, then print the result.
///
/// Notifications are sent by background listeners, so the report is
/// printed only after [`ReviewService::shutdown`] has let them finish.
pub async fn run_review_command(cli: &Cli, config: GateConfig, command: &Commands) -> Result<()> {
    let store = Arc::new(
        SqliteStore::open(&cli.db)
            .with_context(|| format!("Failed to open database {}", cli.db.display()))?,
    );
    let service = ReviewService::start(&config, store.clone(), store.clone())
        .context("Failed to start review service")?;

    let outcome = execute(&service, &config, command).await;
    let stats = service.shutdown().await;
    if stats.failed > 0 {
        eprintln!("warning: {} notification(s) could not be delivered", stats.failed);
    }

    if let Some(id) = outcome? {
        let view = load_view(&store, id).await?;
        print_view(&view, cli.json)?;
    }
    Ok(())
}

/// Returns the report to print once the pipeline has drained.
async fn execute(
    service: &ReviewService,
    config: &GateConfig,
    command: &Commands,
) -> Result<Option<ReportId>> {
    let default_wait = config.analysis.timeout_secs + WAIT_MARGIN_SECS;

    match command {
        Commands::Create {
            author,
            title,
            period,
            content,
            file,
        } => {
            let content = match (content, file) {
                (Some(content), _) => content.clone(),
                (None, Some(path)) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("Pass --content or --file"),
            };
            let report = service
                .create(NewReport {
                    author_id: UserId(*author),
                    title: title.clone(),
                    period: period.clone(),
                    content,
                })
                .await?;
            println!("Created report {}", report.id);
            Ok(Some(report.id))
        }
        Commands::Submit { id, author, wait } => {
            let id = ReportId(*id);
            let mut handle = service.submit_report(id, UserId(*author)).await?;
            let wait = Duration::from_secs(wait.unwrap_or(default_wait));
            report_wait(handle.wait(wait).await.is_some(), handle.analysis_id().0);
            Ok(Some(id))
        }
        Commands::Retry { id, wait } => {
            let id = ReportId(*id);
            let mut handle = service.retry_analysis(id).await?;
            let wait = Duration::from_secs(wait.unwrap_or(default_wait));
            report_wait(handle.wait(wait).await.is_some(), handle.analysis_id().0);
            Ok(Some(id))
        }
        Commands::Approve { id, reviewer } => {
            let report = service.approve(ReportId(*id), reviewer.reviewer()?).await?;
            Ok(Some(report.id))
        }
        Commands::Reject {
            id,
            reviewer,
            reason,
        } => {
            let report = service
                .reject(ReportId(*id), reviewer.reviewer()?, reason)
                .await?;
            Ok(Some(report.id))
        }
        Commands::ForceSubmit { id, supervisor } => {
            let report = service
                .force_submit(ReportId(*id), UserId(*supervisor))
                .await?;
            Ok(Some(report.id))
        }
        Commands::Show { id } => Ok(Some(ReportId(*id))),
        Commands::Resend { id } => {
            let outcome = service.resend_decision(ReportId(*id)).await?;
            println!("Gate outcome: {:?}", outcome);
            Ok(Some(ReportId(*id)))
        }
        Commands::Digest => {
            let pending = service.send_pending_digest().await?;
            if pending == 0 {
                println!("No reports waiting for review.");
            } else {
                println!("{} report(s) waiting for review; reviewers notified.", pending);
            }
            Ok(None)
        }
        Commands::Sweep { older_than } => {
            let swept = match older_than {
                Some(secs) => service.sweep_older_than(Duration::from_secs(*secs)).await?,
                None => service.sweep().await?,
            };
            println!("Failed {} stuck analysis row(s).", swept.len());
            Ok(None)
        }
        Commands::Config { .. } | Commands::Analyze { .. } => {
            anyhow::bail!("not a review command")
        }
    }
}

fn report_wait(finished: bool, analysis_id: i64) {
    if !finished {
        println!(
            "Analysis {} is still running; check back with `report-gate show`.",
            analysis_id
        );
    }
}

async fn load_view(store: &SqliteStore, id: ReportId) -> Result<ReportView> {
    let report = store.get(id).await?;
    let analysis = match report.ai_analysis_id {
        Some(analysis_id) => Some(store.get_analysis(analysis_id).await?),
        None => store.latest_for_report(id).await?,
    };
    Ok(ReportView { report, analysis })
}

fn print_view(view: &ReportView, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(view)?);
        return Ok(());
    }

    let report = &view.report;
    println!();
    println!("Report {} \"{}\" ({})", report.id, report.title, report.period);
    println!("  author:   {}", report.author_id);
    match report.rejected_by {
        RejectedBy::None => println!("  status:   {}", report.status),
        by => println!("  status:   {} (by {})", report.status, by),
    }
    if let Some(reason) = &report.rejection_reason {
        println!("  reason:   {}", reason);
    }
    println!("  version:  {}", report.version);
    if let Some(analysis) = &view.analysis {
        println!(
            "  analysis: {} {} confidence {:.2} via {}",
            analysis.id, analysis.status, analysis.confidence, analysis.provider
        );
        if !analysis.keywords.is_empty() {
            println!("  keywords: {}", analysis.keywords.join(", "));
        }
    }
    println!();
    Ok(())
}
