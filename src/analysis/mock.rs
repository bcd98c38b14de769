//! Deterministic offline provider.
//!
//! Confidence is a function of content length only and carries no real
//! signal; it exists so the orchestrator and gate run without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use super::{AnalysisOutcome, AnalysisProvider};
use crate::errors::ProviderError;

const MAX_KEYWORDS: usize = 5;

pub struct MockProvider {
    available: AtomicBool,
    call_count: AtomicU32,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            call_count: AtomicU32::new(0),
        }
    }

    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// `chars / 1000`, clamped to [0.05, 0.95] and rounded to two decimals.
    pub fn confidence_for(content: &str) -> f64 {
        let len = content.chars().count() as f64;
        let raw = (len / 1000.0).clamp(0.05, 0.95);
        (raw * 100.0).round() / 100.0
    }

    fn keywords(content: &str) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in content
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 3)
        {
            *counts.entry(word.to_lowercase()).or_default() += 1;
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(MAX_KEYWORDS)
            .map(|(word, _)| word)
            .collect()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn analyze(&self, content: &str) -> Result<AnalysisOutcome, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("mock provider disabled".into()));
        }

        let chars = content.chars().count();
        Ok(AnalysisOutcome {
            confidence: Self::confidence_for(content),
            narrative: format!("Mock analysis of {} characters of report content.", chars),
            keywords: Self::keywords(content),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_scales_with_length() {
        assert_eq!(MockProvider::confidence_for(&"a".repeat(450)), 0.45);
        assert_eq!(MockProvider::confidence_for(&"a".repeat(850)), 0.85);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(MockProvider::confidence_for(""), 0.05);
        assert_eq!(MockProvider::confidence_for(&"a".repeat(5000)), 0.95);
    }

    #[test]
    fn confidence_counts_chars_not_bytes() {
        // 300 three-byte characters
        assert_eq!(MockProvider::confidence_for(&"周".repeat(300)), 0.3);
    }

    #[tokio::test]
    async fn analyze_is_deterministic() {
        let provider = MockProvider::new();
        let content = "Migrated billing service. Billing latency down; billing alerts quiet.";
        let a = provider.analyze(content).await.unwrap();
        let b = provider.analyze(content).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.keywords[0], "billing");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn disabled_mock_reports_unavailable() {
        let provider = MockProvider::new().with_available(false);
        assert!(!provider.is_available().await);
        let err = provider.analyze("text").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
