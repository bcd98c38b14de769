//! Prompt and response handling shared by the LLM providers.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::AnalysisOutcome;
use crate::errors::ProviderError;

pub const SYSTEM_PROMPT: &str = "You review employee status reports before they reach a human \
reviewer. Judge whether the report is specific, complete and credible. Respond with a single \
JSON object and nothing else: {\"confidence\": <number between 0 and 1>, \"narrative\": \
<two or three sentence assessment>, \"keywords\": [<up to five topic keywords>]}.";

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid fenced-json regex")
});

pub fn user_prompt(content: &str) -> String {
    format!("Status report:\n\n{}", content)
}

#[derive(Debug, Deserialize)]
struct RawOutcome {
    confidence: Option<f64>,
    #[serde(default)]
    narrative: String,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Parse model output into an outcome.
///
/// Accepts a bare JSON object, one wrapped in a fenced code block, or one
/// embedded in surrounding prose.
pub fn parse_outcome(text: &str) -> Result<AnalysisOutcome, ProviderError> {
    let json = extract_json(text)
        .ok_or_else(|| ProviderError::InvalidResponse("no JSON object in model output".into()))?;

    let raw: RawOutcome = serde_json::from_str(json)
        .map_err(|e| ProviderError::InvalidResponse(format!("malformed JSON: {}", e)))?;

    let confidence = raw
        .confidence
        .ok_or_else(|| ProviderError::InvalidResponse("missing confidence".into()))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ProviderError::InvalidResponse(format!(
            "confidence {} outside [0, 1]",
            confidence
        )));
    }

    Ok(AnalysisOutcome {
        confidence,
        narrative: raw.narrative.trim().to_string(),
        keywords: raw.keywords,
    })
}

fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    if let Some(caps) = FENCED_JSON.captures(trimmed) {
        return caps.get(1).map(|m| m.as_str());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_object() {
        let outcome =
            parse_outcome(r#"{"confidence":0.82,"narrative":" Solid. ","keywords":["api"]}"#)
                .unwrap();
        assert_eq!(outcome.confidence, 0.82);
        assert_eq!(outcome.narrative, "Solid.");
        assert_eq!(outcome.keywords, vec!["api"]);
    }

    #[test]
    fn parses_fenced_block() {
        let text = "Here you go:\n```json\n{\"confidence\": 0.4, \"narrative\": \"Vague\"}\n```";
        let outcome = parse_outcome(text).unwrap();
        assert_eq!(outcome.confidence, 0.4);
        assert!(outcome.keywords.is_empty());
    }

    #[test]
    fn parses_object_embedded_in_prose() {
        let outcome = parse_outcome("Result: {\"confidence\": 0.6} done").unwrap();
        assert_eq!(outcome.confidence, 0.6);
    }

    #[test]
    fn rejects_missing_confidence() {
        let err = parse_outcome(r#"{"narrative":"no score"}"#).unwrap_err();
        assert_eq!(err, ProviderError::InvalidResponse("missing confidence".into()));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let err = parse_outcome(r#"{"confidence": 1.7}"#).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(msg) if msg.contains("1.7")));
    }

    #[test]
    fn rejects_plain_text() {
        assert!(parse_outcome("I think it is fine").is_err());
    }
}
