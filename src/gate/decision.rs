//! The AI gate decision.
//!
//! [`decide`] is pure: the same analysis and threshold always produce the
//! same [`Decision`]. Scores are compared with `>=`, so a score exactly on
//! the threshold passes and a non-finite score never does.

use std::fmt;

use serde::Serialize;

use crate::models::{AnalysisResult, AnalysisStatus, RejectedBy, ReportStatus};

/// Why the AI gate rejected a report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectionCode {
    LowConfidence { confidence: f64, threshold: f64 },
    AnalysisFailed,
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidence {
                confidence,
                threshold,
            } => {
                let (confidence, threshold) = distinct_pair(*confidence, *threshold);
                write!(
                    f,
                    "AI confidence below threshold ({} < {})",
                    confidence, threshold
                )
            }
            Self::AnalysisFailed => f.write_str("AI analysis failed"),
        }
    }
}

/// Format both values with the fewest decimals (at least two) that tell
/// them apart.
fn distinct_pair(a: f64, b: f64) -> (String, String) {
    for precision in 2..=17 {
        let (x, y) = (format!("{:.*}", precision, a), format!("{:.*}", precision, b));
        if x != y {
            return (x, y);
        }
    }
    (a.to_string(), b.to_string())
}

impl RejectionCode {
    /// Render the author-facing reason. Never empty.
    pub fn reason(&self, narrative: &str) -> String {
        let narrative = narrative.trim();
        if narrative.is_empty() {
            self.to_string()
        } else {
            format!("{}: {}", self, narrative)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub status: ReportStatus,
    pub rejected_by: RejectedBy,
    pub reason: Option<String>,
}

impl Decision {
    pub fn is_rejection(&self) -> bool {
        self.status == ReportStatus::Rejected
    }
}

/// Apply `threshold` to a finalized analysis.
pub fn decide(result: &AnalysisResult, threshold: f64) -> Decision {
    let code = match result.status {
        AnalysisStatus::Completed if result.confidence >= threshold => {
            return Decision {
                status: ReportStatus::PendingAdminReview,
                rejected_by: RejectedBy::None,
                reason: None,
            };
        }
        AnalysisStatus::Completed => RejectionCode::LowConfidence {
            confidence: result.confidence,
            threshold,
        },
        // Pending has no score to gate on.
        AnalysisStatus::Failed | AnalysisStatus::Pending => RejectionCode::AnalysisFailed,
    };
    Decision {
        status: ReportStatus::Rejected,
        rejected_by: RejectedBy::Ai,
        reason: Some(code.reason(&result.narrative)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisId, ReportId};
    use chrono::Utc;
    use proptest::prelude::*;

    fn analysis(status: AnalysisStatus, confidence: f64, narrative: &str) -> AnalysisResult {
        AnalysisResult {
            id: AnalysisId(1),
            report_id: ReportId(1),
            status,
            confidence,
            narrative: narrative.to_string(),
            keywords: vec![],
            provider: "mock".into(),
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn confident_analysis_goes_to_admin_review() {
        let d = decide(&analysis(AnalysisStatus::Completed, 0.85, "solid"), 0.7);
        assert_eq!(d.status, ReportStatus::PendingAdminReview);
        assert_eq!(d.rejected_by, RejectedBy::None);
        assert!(d.reason.is_none());
    }

    #[test]
    fn score_on_threshold_passes() {
        let d = decide(&analysis(AnalysisStatus::Completed, 0.7, ""), 0.7);
        assert!(!d.is_rejection());
    }

    #[test]
    fn low_confidence_is_rejected_with_narrative() {
        let d = decide(&analysis(AnalysisStatus::Completed, 0.45, "Too vague."), 0.7);
        assert_eq!(d.status, ReportStatus::Rejected);
        assert_eq!(d.rejected_by, RejectedBy::Ai);
        let reason = d.reason.unwrap();
        assert!(reason.contains("confidence below threshold"));
        assert!(reason.contains("0.45 < 0.70"));
        assert!(reason.ends_with("Too vague."));
    }

    #[test]
    fn reason_never_rounds_score_onto_threshold() {
        let d = decide(&analysis(AnalysisStatus::Completed, 0.6999, ""), 0.70);
        assert_eq!(
            d.reason.as_deref(),
            Some("AI confidence below threshold (0.6999 < 0.7000)")
        );
    }

    #[test]
    fn failed_analysis_is_rejected_regardless_of_score() {
        let d = decide(&analysis(AnalysisStatus::Failed, 0.99, "provider timed out"), 0.1);
        assert_eq!(d.rejected_by, RejectedBy::Ai);
        assert_eq!(d.reason.as_deref(), Some("AI analysis failed: provider timed out"));
    }

    #[test]
    fn nan_confidence_never_passes() {
        let d = decide(&analysis(AnalysisStatus::Completed, f64::NAN, ""), 0.0);
        assert!(d.is_rejection());
    }

    proptest! {
        #[test]
        fn rejected_iff_below_threshold(c in 0.0f64..=1.0, t in 0.0f64..=1.0) {
            let d = decide(&analysis(AnalysisStatus::Completed, c, "n"), t);
            prop_assert_eq!(d.is_rejection(), c < t);
            prop_assert_eq!(d.reason.is_some(), c < t);
            if let Some(reason) = &d.reason {
                prop_assert!(!reason.trim().is_empty());
                let shown = reason
                    .split_once('(')
                    .and_then(|(_, rest)| rest.split_once(')'))
                    .map(|(pair, _)| pair.to_string())
                    .unwrap();
                let (left, right) = shown.split_once(" < ").unwrap();
                prop_assert_ne!(left, right);
            }
        }

        #[test]
        fn decide_is_idempotent(c in 0.0f64..=1.0, t in 0.0f64..=1.0, failed in any::<bool>()) {
            let status = if failed { AnalysisStatus::Failed } else { AnalysisStatus::Completed };
            let a = analysis(status, c, "narrative");
            prop_assert_eq!(decide(&a, t), decide(&a, t));
        }
    }
}
