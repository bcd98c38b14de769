//! Operator commands that do not go through the review pipeline.

use std::path::Path;

use anyhow::{Context, Result};

use report_gate::analysis::select_provider;
use report_gate::config::GateConfig;
use report_gate::errors::ProviderError;

use super::super::Cli;

/// Score a file with the configured provider. Nothing is stored.
pub async fn cmd_analyze(cli: &Cli, config: &GateConfig, file: &Path) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let provider = select_provider(&config.analysis, &config.providers)?;

    if !provider.is_available().await {
        anyhow::bail!(
            "Analysis engine unavailable: provider '{}' is not reachable",
            provider.name()
        );
    }

    let timeout = config.analysis.timeout();
    let outcome = match tokio::time::timeout(timeout, provider.analyze(&content)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ProviderError::Timeout {
                secs: timeout.as_secs(),
            }
            .into());
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let threshold = config.analysis.confidence_threshold;
    let verdict = if outcome.confidence >= threshold {
        "passes"
    } else {
        "below"
    };
    println!("provider:   {}", provider.name());
    println!(
        "confidence: {:.2} ({} threshold {:.2})",
        outcome.confidence, verdict, threshold
    );
    if !outcome.keywords.is_empty() {
        println!("keywords:   {}", outcome.keywords.join(", "));
    }
    println!();
    println!("{}", outcome.narrative);
    Ok(())
}
