//! Analysis engine: pluggable providers that score report content.
//!
//! Every provider implements [`AnalysisProvider`]. Exactly one is active per
//! deployment, chosen once at startup by [`select_provider`]:
//!
//! 1. `analysis.override` when set
//! 2. `analysis.provider` when set (built even if currently unreachable; the
//!    orchestrator checks availability at schedule time and fails fast)
//! 3. [`MockProvider`] only when no provider is named at all
//!
//! ```
//! use report_gate::analysis::{AnalysisProvider, MockProvider};
//!
//! # async fn example() {
//! let provider = MockProvider::new();
//! let outcome = provider.analyze(&"x".repeat(450)).await.unwrap();
//! assert_eq!(outcome.confidence, 0.45);
//! # }
//! ```

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod response;

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AnalysisSection, ProviderKind, ProvidersSection};
use crate::errors::{ConfigError, ProviderError};

pub use anthropic::AnthropicProvider;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;

/// What a provider returns for one piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    /// How strongly the narrative should be trusted, within [0, 1].
    pub confidence: f64,
    pub narrative: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Abstraction over analysis engines.
/// Real implementations: `OpenAiProvider`, `AnthropicProvider`. Offline: `MockProvider`.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Provider name recorded on each analysis row.
    fn name(&self) -> &str;

    /// Whether the provider can currently accept calls.
    async fn is_available(&self) -> bool;

    async fn analyze(&self, content: &str) -> Result<AnalysisOutcome, ProviderError>;
}

/// Build the provider for this deployment.
pub fn select_provider(
    analysis: &AnalysisSection,
    providers: &ProvidersSection,
) -> Result<Arc<dyn AnalysisProvider>, ConfigError> {
    let kind = match (&analysis.override_provider, &analysis.provider) {
        (Some(name), _) => name.parse::<ProviderKind>()?,
        (None, Some(name)) => name.parse::<ProviderKind>()?,
        (None, None) => {
            tracing::warn!("no analysis provider configured; using the mock provider");
            ProviderKind::Mock
        }
    };

    let provider: Arc<dyn AnalysisProvider> = match kind {
        ProviderKind::Mock => Arc::new(MockProvider::new()),
        ProviderKind::OpenAi => {
            let section = &providers.openai;
            Arc::new(OpenAiProvider::new(
                &section.base_url,
                &section.model,
                env::var(&section.api_key_env).ok(),
            )?)
        }
        ProviderKind::Anthropic => {
            let section = &providers.anthropic;
            Arc::new(
                AnthropicProvider::new(
                    &section.base_url,
                    &section.model,
                    env::var(&section.api_key_env).ok(),
                )?
                .with_max_tokens(section.max_tokens),
            )
        }
    };

    tracing::info!(provider = provider.name(), "analysis provider selected");
    Ok(provider)
}
