//! Configuration for the review pipeline.
//!
//! Read from `report-gate.toml`, then layered: file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [analysis]
//! provider = "openai"          # mock | openai | anthropic
//! # override = "mock"          # wins over `provider` when set
//! timeout_secs = 30
//! confidence_threshold = 0.7
//! stuck_after_secs = 900
//!
//! [workers]
//! core = 2
//! max = 4
//! queue_depth = 32
//!
//! [providers.openai]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [providers.anthropic]
//! base_url = "https://api.anthropic.com"
//! model = "claude-3-5-haiku-latest"
//! api_key_env = "ANTHROPIC_API_KEY"
//! max_tokens = 512
//!
//! [bus]
//! capacity = 64
//!
//! [mail]
//! transport = "http"           # log | http
//! endpoint = "https://mail-relay.internal/send"
//!
//! [[directory.users]]
//! id = 1
//! email = "ana@example.com"
//! role = "employee"
//! supervisor_id = 2
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::models::UserId;

/// Environment variables consulted after the file is read.
pub const ENV_PROVIDER: &str = "REPORT_GATE_PROVIDER";
pub const ENV_OVERRIDE: &str = "REPORT_GATE_ANALYSIS_OVERRIDE";
pub const ENV_THRESHOLD: &str = "REPORT_GATE_CONFIDENCE_THRESHOLD";
pub const ENV_TIMEOUT: &str = "REPORT_GATE_TIMEOUT_SECS";

/// Which analysis provider implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mock,
    OpenAi,
    Anthropic,
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(ProviderKind::Mock),
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            _ => Err(ConfigError::UnknownProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSection {
    /// Named provider for this deployment
    #[serde(default)]
    pub provider: Option<String>,
    /// Explicit override, wins over `provider`
    #[serde(default, rename = "override")]
    pub override_provider: Option<String>,
    /// Upper bound for a single provider call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Reports scoring below this are rejected by the AI gate
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Pending analyses older than this are failed by `sweep`
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Default confidence threshold for the AI gate.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_stuck_after_secs() -> u64 {
    900
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            provider: None,
            override_provider: None,
            timeout_secs: default_timeout_secs(),
            confidence_threshold: default_confidence_threshold(),
            stuck_after_secs: default_stuck_after_secs(),
        }
    }
}

impl AnalysisSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_secs)
    }
}

/// Worker pool sizing for analysis calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WorkersSection {
    #[serde(default = "default_core_workers")]
    pub core: usize,
    #[serde(default = "default_max_workers")]
    pub max: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_core_workers() -> usize {
    2
}

fn default_max_workers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    32
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            core: default_core_workers(),
            max: default_max_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiSection {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for OpenAiSection {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicSection {
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    #[serde(default = "default_anthropic_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_anthropic_max_tokens")]
    pub max_tokens: u32,
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_anthropic_max_tokens() -> u32 {
    512
}

impl Default for AnthropicSection {
    fn default() -> Self {
        Self {
            base_url: default_anthropic_base_url(),
            model: default_anthropic_model(),
            api_key_env: default_anthropic_key_env(),
            max_tokens: default_anthropic_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersSection {
    #[serde(default)]
    pub openai: OpenAiSection,
    #[serde(default)]
    pub anthropic: AnthropicSection,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BusSection {
    /// Capacity of each event channel
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_bus_capacity() -> usize {
    64
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailSection {
    /// `log` or `http`
    #[serde(default = "default_mail_transport")]
    pub transport: String,
    /// Relay endpoint for the `http` transport
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Per-delivery timeout
    #[serde(default = "default_mail_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_mail_transport() -> String {
    "log".to_string()
}

fn default_mail_timeout_secs() -> u64 {
    10
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            transport: default_mail_transport(),
            endpoint: None,
            timeout_secs: default_mail_timeout_secs(),
        }
    }
}

/// Role of a directory user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Employee,
    Supervisor,
    Admin,
    SuperAdmin,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectoryUser {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub supervisor_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySection {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "report_gate=info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            json: false,
            filter: default_log_filter(),
        }
    }
}

/// The complete `report-gate.toml` structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub providers: ProvidersSection,
    #[serde(default)]
    pub bus: BusSection,
    #[serde(default)]
    pub mail: MailSection,
    #[serde(default)]
    pub directory: DirectorySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl GateConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse report-gate.toml")
    }

    /// Load from `path`, or defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup(ENV_PROVIDER) {
            self.analysis.provider = Some(provider);
        }
        if let Some(provider) = lookup(ENV_OVERRIDE) {
            self.analysis.override_provider = Some(provider);
        }
        if let Some(raw) = lookup(ENV_THRESHOLD) {
            self.analysis.confidence_threshold = raw
                .trim()
                .parse()
                .with_context(|| format!("{} is not a number: '{}'", ENV_THRESHOLD, raw))?;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT) {
            self.analysis.timeout_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{} is not an integer: '{}'", ENV_TIMEOUT, raw))?;
        }
        Ok(())
    }

    /// Check values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.analysis.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::ThresholdOutOfRange(threshold));
        }
        if self.analysis.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let w = self.workers;
        if w.core == 0 || w.max < w.core || w.queue_depth == 0 {
            return Err(ConfigError::InvalidPool {
                core: w.core,
                max: w.max,
                queue_depth: w.queue_depth,
            });
        }
        for name in [&self.analysis.provider, &self.analysis.override_provider]
            .into_iter()
            .flatten()
        {
            name.parse::<ProviderKind>()?;
        }
        match self.mail.transport.as_str() {
            "log" => {}
            "http" if self.mail.endpoint.is_none() => return Err(ConfigError::MissingMailEndpoint),
            "http" => {}
            other => return Err(ConfigError::UnknownMailTransport(other.to_string())),
        }
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize report-gate.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let config = GateConfig::parse("").unwrap();
        assert_eq!(config.analysis.confidence_threshold, 0.7);
        assert_eq!(config.analysis.timeout_secs, 30);
        assert_eq!(config.workers, WorkersSection::default());
        assert_eq!(config.bus.capacity, 64);
        assert_eq!(config.mail.transport, "log");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_full_file() {
        let config = GateConfig::parse(
            r#"
            [analysis]
            provider = "anthropic"
            override = "mock"
            confidence_threshold = 0.55

            [workers]
            core = 1
            max = 3
            queue_depth = 8

            [providers.anthropic]
            model = "claude-test"

            [[directory.users]]
            id = 1
            email = "ana@example.com"
            supervisor_id = 2

            [[directory.users]]
            id = 2
            email = "boss@example.com"
            role = "supervisor"
            "#,
        )
        .unwrap();

        assert_eq!(config.analysis.provider.as_deref(), Some("anthropic"));
        assert_eq!(config.analysis.override_provider.as_deref(), Some("mock"));
        assert_eq!(config.analysis.confidence_threshold, 0.55);
        assert_eq!(config.workers.max, 3);
        assert_eq!(config.providers.anthropic.model, "claude-test");
        assert_eq!(config.providers.anthropic.max_tokens, 512);
        assert_eq!(config.directory.users.len(), 2);
        assert_eq!(config.directory.users[0].role, UserRole::Employee);
        assert_eq!(config.directory.users[0].supervisor_id, Some(UserId(2)));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = GateConfig::parse("[analysis]\nprovider = \"openai\"").unwrap();
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_PROVIDER, "anthropic"),
            (ENV_THRESHOLD, "0.9"),
            (ENV_TIMEOUT, "5"),
        ]);
        config
            .apply_env_with(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.analysis.provider.as_deref(), Some("anthropic"));
        assert_eq!(config.analysis.confidence_threshold, 0.9);
        assert_eq!(config.analysis.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn malformed_env_threshold_is_an_error() {
        let mut config = GateConfig::default();
        let err = config
            .apply_env_with(|k| (k == ENV_THRESHOLD).then(|| "high".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_THRESHOLD));
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut config = GateConfig::default();
        config.analysis.confidence_threshold = 1.2;
        assert_eq!(config.validate(), Err(ConfigError::ThresholdOutOfRange(1.2)));
    }

    #[test]
    fn validate_rejects_bad_pool_sizes() {
        let mut config = GateConfig::default();
        config.workers.max = 1;
        config.workers.core = 2;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPool { .. })));

        let mut config = GateConfig::default();
        config.workers.queue_depth = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPool { .. })));
    }

    #[test]
    fn validate_rejects_http_mail_without_endpoint() {
        let mut config = GateConfig::default();
        config.mail.transport = "http".into();
        assert_eq!(config.validate(), Err(ConfigError::MissingMailEndpoint));
    }

    #[test]
    fn validate_rejects_unknown_provider() {
        let mut config = GateConfig::default();
        config.analysis.override_provider = Some("local-llama".into());
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownProvider("local-llama".into()))
        );
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report-gate.toml");
        let mut config = GateConfig::default();
        config.analysis.provider = Some("openai".into());
        config.save(&path).unwrap();

        let loaded = GateConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.analysis.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert!(config.analysis.provider.is_none());
    }
}
