//! Status gate: the only component that changes a report's status.
//!
//! Every transition goes through the same steps:
//! 1. Load the report
//! 2. Check the transition table ([`ReportStatus::permits`])
//! 3. Mutate and save under optimistic locking
//! 4. Publish the status event after the save succeeds
//!
//! A stale save reloads and re-checks, so a concurrent change that makes
//! the action illegal surfaces as `InvalidTransition` rather than being
//! overwritten. A rejected action leaves the stored report untouched.

pub mod decision;

use std::sync::Arc;

use crate::bus::{AnalysisCompleted, NotificationPublisher};
use crate::errors::{ReviewError, StoreError};
use crate::models::{
    AnalysisId, RejectedBy, Report, ReportId, ReportStatus, ReviewAction, Reviewer, UserId,
};
use crate::notify::ReviewEvent;
use crate::store::{AnalysisStore, ReportStore};

pub use decision::{Decision, RejectionCode, decide};

/// Saves attempted before a persistent conflict is returned to the caller.
const MAX_SAVE_ATTEMPTS: u32 = 3;

/// What the gate did with an analysis completion.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Decision persisted and announced.
    Applied(Decision),
    /// Report already carried this decision; the status event was re-sent.
    Republished(Decision),
    /// Completion no longer relevant to the report.
    Ignored,
}

pub struct StatusGate {
    reports: Arc<dyn ReportStore>,
    analyses: Arc<dyn AnalysisStore>,
    threshold: f64,
    notifications: NotificationPublisher,
}

impl StatusGate {
    pub fn new(
        reports: Arc<dyn ReportStore>,
        analyses: Arc<dyn AnalysisStore>,
        threshold: f64,
        notifications: NotificationPublisher,
    ) -> Self {
        Self {
            reports,
            analyses,
            threshold,
            notifications,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Load, check, mutate and save, reloading on a stale write.
    async fn transition<F>(
        &self,
        id: ReportId,
        action: ReviewAction,
        apply: F,
    ) -> Result<Report, ReviewError>
    where
        F: Fn(&mut Report) -> Result<(), ReviewError> + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut report = self.reports.get(id).await?;
            if !report.status.permits(action) {
                return Err(ReviewError::InvalidTransition {
                    id,
                    from: report.status,
                    action,
                });
            }
            apply(&mut report)?;
            match self.reports.save(report).await {
                Ok(saved) => {
                    tracing::info!(report_id = %id, %action, status = %saved.status, "report transitioned");
                    return Ok(saved);
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_SAVE_ATTEMPTS => {
                    tracing::debug!(report_id = %id, attempt, "stale report version, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Author submits (or resubmits) a report.
    pub async fn submit(&self, id: ReportId, author_id: UserId) -> Result<Report, ReviewError> {
        let report = self
            .transition(id, ReviewAction::Submit, |report| {
                if report.author_id != author_id {
                    return Err(ReviewError::NotAuthor {
                        id,
                        user_id: author_id.0,
                    });
                }
                report.set_status(ReportStatus::Submitted, RejectedBy::None, None);
                Ok(())
            })
            .await?;
        self.notifications
            .publish(ReviewEvent::ReportSubmitted {
                report_id: id,
                author_id,
            })
            .await;
        Ok(report)
    }

    /// Hand a submitted report to the analysis identified by `analysis_id`.
    pub async fn begin_review(
        &self,
        id: ReportId,
        analysis_id: AnalysisId,
    ) -> Result<Report, ReviewError> {
        self.transition(id, ReviewAction::BeginReview, |report| {
            report.set_status(ReportStatus::AiReviewing, RejectedBy::None, None);
            report.ai_analysis_id = Some(analysis_id);
            Ok(())
        })
        .await
    }

    pub async fn approve(&self, id: ReportId, reviewer: Reviewer) -> Result<Report, ReviewError> {
        let status = match reviewer {
            Reviewer::Admin(_) => ReportStatus::AdminApproved,
            Reviewer::SuperAdmin(_) => ReportStatus::SuperAdminApproved,
        };
        let report = self
            .transition(id, ReviewAction::Approve, |report| {
                report.set_status(status, RejectedBy::None, None);
                Ok(())
            })
            .await?;
        let event = match reviewer {
            Reviewer::Admin(admin_id) => ReviewEvent::AdminApproved {
                report_id: id,
                admin_id,
            },
            Reviewer::SuperAdmin(admin_id) => ReviewEvent::SuperAdminApproved {
                report_id: id,
                admin_id,
            },
        };
        self.notifications.publish(event).await;
        Ok(report)
    }

    pub async fn reject(
        &self,
        id: ReportId,
        reviewer: Reviewer,
        reason: &str,
    ) -> Result<Report, ReviewError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ReviewError::EmptyReason);
        }
        let rejected_by = match reviewer {
            Reviewer::Admin(_) => RejectedBy::Admin,
            Reviewer::SuperAdmin(_) => RejectedBy::SuperAdmin,
        };
        let report = self
            .transition(id, ReviewAction::Reject, |report| {
                report.set_status(ReportStatus::Rejected, rejected_by, Some(reason.to_string()));
                Ok(())
            })
            .await?;
        let reason = reason.to_string();
        let event = match reviewer {
            Reviewer::Admin(admin_id) => ReviewEvent::AdminRejected {
                report_id: id,
                admin_id,
                reason,
            },
            Reviewer::SuperAdmin(admin_id) => ReviewEvent::SuperAdminRejected {
                report_id: id,
                admin_id,
                reason,
            },
        };
        self.notifications.publish(event).await;
        Ok(report)
    }

    /// Supervisor override from any non-terminal status.
    pub async fn force_submit(
        &self,
        id: ReportId,
        supervisor_id: UserId,
    ) -> Result<Report, ReviewError> {
        let report = self
            .transition(id, ReviewAction::ForceSubmit, |report| {
                report.set_status(ReportStatus::ForceSubmitted, RejectedBy::None, None);
                Ok(())
            })
            .await?;
        self.notifications
            .publish(ReviewEvent::ForceSubmitted {
                report_id: id,
                supervisor_id,
            })
            .await;
        Ok(report)
    }

    /// React to a finalized analysis.
    ///
    /// Only the analysis the report currently references can move it out of
    /// `AiReviewing`. Seeing the same completion again re-sends the status
    /// event without touching the store.
    pub async fn apply_analysis(
        &self,
        message: AnalysisCompleted,
    ) -> Result<GateOutcome, ReviewError> {
        let AnalysisCompleted {
            analysis_id,
            report_id,
        } = message;
        let result = self.analyses.get_analysis(analysis_id).await?;
        if !result.is_final() {
            tracing::warn!(%report_id, %analysis_id, "completion received for a pending analysis");
            return Ok(GateOutcome::Ignored);
        }
        let decision = decide(&result, self.threshold);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut report = self.reports.get(report_id).await?;
            if report.ai_analysis_id != Some(analysis_id) {
                tracing::debug!(%report_id, %analysis_id, current = ?report.ai_analysis_id, "stale analysis ignored");
                return Ok(GateOutcome::Ignored);
            }

            if report.status.permits(ReviewAction::ApplyAiDecision) {
                report.set_status(decision.status, decision.rejected_by, decision.reason.clone());
                match self.reports.save(report).await {
                    Ok(saved) => {
                        tracing::info!(
                            %report_id,
                            %analysis_id,
                            confidence = result.confidence,
                            status = %saved.status,
                            "AI gate decided"
                        );
                        self.notifications
                            .publish(ReviewEvent::AnalysisCompleted {
                                report_id,
                                analysis_id,
                                status: result.status,
                                confidence: result.confidence,
                            })
                            .await;
                        self.publish_decision(&saved).await;
                        return Ok(GateOutcome::Applied(decision));
                    }
                    Err(StoreError::Conflict { .. }) if attempt < MAX_SAVE_ATTEMPTS => {
                        tracing::debug!(%report_id, attempt, "stale report version, rechecking");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if report.status == decision.status && report.rejected_by == decision.rejected_by {
                self.publish_decision(&report).await;
                return Ok(GateOutcome::Republished(decision));
            }

            tracing::debug!(%report_id, %analysis_id, status = %report.status, "report moved on; completion ignored");
            return Ok(GateOutcome::Ignored);
        }
    }

    async fn publish_decision(&self, report: &Report) {
        let event = match report.status {
            ReportStatus::PendingAdminReview => ReviewEvent::PendingAdminReview {
                report_id: report.id,
            },
            ReportStatus::Rejected => ReviewEvent::AiRejected {
                report_id: report.id,
                reason: report.rejection_reason.clone().unwrap_or_default(),
            },
            _ => return,
        };
        self.notifications.publish(event).await;
    }
}
