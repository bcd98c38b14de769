//! Configuration loading and the `report-gate config` command.

use anyhow::{Context, Result};

use report_gate::config::GateConfig;

use super::super::{Cli, ConfigCommands};

/// File, then environment, then command-line flags.
pub fn load_config(cli: &Cli) -> Result<GateConfig> {
    let mut config = GateConfig::load_or_default(&cli.config)?;
    config.apply_env()?;
    if let Some(provider) = &cli.provider {
        config.analysis.override_provider = Some(provider.clone());
    }
    if let Some(threshold) = cli.threshold {
        config.analysis.confidence_threshold = threshold;
    }
    Ok(config)
}

pub fn cmd_config(cli: &Cli, config: &GateConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &cli.config;

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No config file at {}; using defaults", config_path.display());
            }
            println!("# Effective values (with env/CLI overrides):");
            println!();
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            config
                .validate()
                .with_context(|| format!("Invalid configuration ({})", config_path.display()))?;
            if config_path.exists() {
                println!("Configuration is valid.");
            } else {
                println!("No config file found. Using defaults (valid).");
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            GateConfig::default().save(config_path)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
