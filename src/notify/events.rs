//! Notification events.
//!
//! Each [`ReviewEvent`] variant carries only the fields its kind needs, so a
//! constructed event is always complete. The pipeline itself only builds
//! [`ReviewEvent`]s. [`NotificationEvent::build`] is the fallible entry point
//! for library users assembling an event from a kind and loose parts; it
//! rejects missing required fields.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::EventError;
use crate::models::{AnalysisId, AnalysisStatus, ReportId, UserId};

/// Named recipient groups, resolved to addresses at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientClass {
    Author,
    Supervisor,
    AdminSet,
    SuperAdminSet,
}

/// Fixed audience of an event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Author,
    Supervisor,
    AuthorAndSupervisor,
    Reviewers,
}

impl Audience {
    pub fn classes(&self) -> &'static [RecipientClass] {
        match self {
            Self::Author => &[RecipientClass::Author],
            Self::Supervisor => &[RecipientClass::Supervisor],
            Self::AuthorAndSupervisor => &[RecipientClass::Author, RecipientClass::Supervisor],
            Self::Reviewers => &[RecipientClass::AdminSet, RecipientClass::SuperAdminSet],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AnalysisCompleted,
    ReportSubmitted,
    PendingAdminReview,
    AiRejected,
    AdminApproved,
    AdminRejected,
    SuperAdminApproved,
    SuperAdminRejected,
    ForceSubmitted,
    ReviewBacklogDigest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalysisCompleted => "analysis_completed",
            Self::ReportSubmitted => "report_submitted",
            Self::PendingAdminReview => "pending_admin_review",
            Self::AiRejected => "ai_rejected",
            Self::AdminApproved => "admin_approved",
            Self::AdminRejected => "admin_rejected",
            Self::SuperAdminApproved => "super_admin_approved",
            Self::SuperAdminRejected => "super_admin_rejected",
            Self::ForceSubmitted => "force_submitted",
            Self::ReviewBacklogDigest => "review_backlog_digest",
        }
    }

    pub fn is_report_scoped(&self) -> bool {
        !matches!(self, Self::ReviewBacklogDigest)
    }

    pub fn audience(&self) -> Audience {
        match self {
            Self::AnalysisCompleted | Self::AiRejected => Audience::Author,
            Self::ReportSubmitted => Audience::Supervisor,
            Self::PendingAdminReview | Self::ReviewBacklogDigest => Audience::Reviewers,
            Self::AdminApproved
            | Self::AdminRejected
            | Self::SuperAdminApproved
            | Self::SuperAdminRejected
            | Self::ForceSubmitted => Audience::AuthorAndSupervisor,
        }
    }

    /// Mail template for this kind, e.g. `report.admin_rejected`.
    pub fn template_id(&self) -> String {
        format!("report.{}", self.as_str())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewEvent {
    AnalysisCompleted {
        report_id: ReportId,
        analysis_id: AnalysisId,
        status: AnalysisStatus,
        confidence: f64,
    },
    ReportSubmitted {
        report_id: ReportId,
        author_id: UserId,
    },
    PendingAdminReview {
        report_id: ReportId,
    },
    AiRejected {
        report_id: ReportId,
        reason: String,
    },
    AdminApproved {
        report_id: ReportId,
        admin_id: UserId,
    },
    AdminRejected {
        report_id: ReportId,
        admin_id: UserId,
        reason: String,
    },
    SuperAdminApproved {
        report_id: ReportId,
        admin_id: UserId,
    },
    SuperAdminRejected {
        report_id: ReportId,
        admin_id: UserId,
        reason: String,
    },
    ForceSubmitted {
        report_id: ReportId,
        supervisor_id: UserId,
    },
    ReviewBacklogDigest {
        pending: usize,
    },
}

/// Loosely-typed parts for [`NotificationEvent::build`].
#[derive(Debug, Clone, Default)]
pub struct EventPayload {
    pub report_id: Option<ReportId>,
    pub actor_id: Option<UserId>,
    pub analysis_id: Option<AnalysisId>,
    pub analysis_status: Option<AnalysisStatus>,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
    pub pending: Option<usize>,
}

/// A transient event handed to the dispatcher. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    #[serde(flatten)]
    pub event: ReviewEvent,
    pub occurred_at: DateTime<Utc>,
}

impl From<ReviewEvent> for NotificationEvent {
    fn from(event: ReviewEvent) -> Self {
        Self {
            event,
            occurred_at: Utc::now(),
        }
    }
}

impl NotificationEvent {
    /// Build an event of `kind`, failing when a required field is missing.
    pub fn build(kind: EventKind, payload: EventPayload) -> Result<Self, EventError> {
        let name = kind.as_str();
        let report_id = || payload.report_id.ok_or(EventError::MissingReportId { kind: name });
        let actor = |field: &'static str| {
            payload
                .actor_id
                .ok_or(EventError::MissingField { kind: name, field })
        };
        let reason = || {
            payload
                .reason
                .clone()
                .filter(|r| !r.trim().is_empty())
                .ok_or(EventError::MissingField {
                    kind: name,
                    field: "reason",
                })
        };

        let event = match kind {
            EventKind::AnalysisCompleted => ReviewEvent::AnalysisCompleted {
                report_id: report_id()?,
                analysis_id: payload.analysis_id.ok_or(EventError::MissingField {
                    kind: name,
                    field: "analysis_id",
                })?,
                status: payload.analysis_status.unwrap_or(AnalysisStatus::Completed),
                confidence: payload.confidence.unwrap_or(0.0),
            },
            EventKind::ReportSubmitted => ReviewEvent::ReportSubmitted {
                report_id: report_id()?,
                author_id: actor("author_id")?,
            },
            EventKind::PendingAdminReview => ReviewEvent::PendingAdminReview {
                report_id: report_id()?,
            },
            EventKind::AiRejected => ReviewEvent::AiRejected {
                report_id: report_id()?,
                reason: reason()?,
            },
            EventKind::AdminApproved => ReviewEvent::AdminApproved {
                report_id: report_id()?,
                admin_id: actor("admin_id")?,
            },
            EventKind::AdminRejected => ReviewEvent::AdminRejected {
                report_id: report_id()?,
                admin_id: actor("admin_id")?,
                reason: reason()?,
            },
            EventKind::SuperAdminApproved => ReviewEvent::SuperAdminApproved {
                report_id: report_id()?,
                admin_id: actor("admin_id")?,
            },
            EventKind::SuperAdminRejected => ReviewEvent::SuperAdminRejected {
                report_id: report_id()?,
                admin_id: actor("admin_id")?,
                reason: reason()?,
            },
            EventKind::ForceSubmitted => ReviewEvent::ForceSubmitted {
                report_id: report_id()?,
                supervisor_id: actor("supervisor_id")?,
            },
            EventKind::ReviewBacklogDigest => ReviewEvent::ReviewBacklogDigest {
                pending: payload.pending.ok_or(EventError::MissingField {
                    kind: name,
                    field: "pending",
                })?,
            },
        };
        Ok(event.into())
    }

    pub fn kind(&self) -> EventKind {
        match &self.event {
            ReviewEvent::AnalysisCompleted { .. } => EventKind::AnalysisCompleted,
            ReviewEvent::ReportSubmitted { .. } => EventKind::ReportSubmitted,
            ReviewEvent::PendingAdminReview { .. } => EventKind::PendingAdminReview,
            ReviewEvent::AiRejected { .. } => EventKind::AiRejected,
            ReviewEvent::AdminApproved { .. } => EventKind::AdminApproved,
            ReviewEvent::AdminRejected { .. } => EventKind::AdminRejected,
            ReviewEvent::SuperAdminApproved { .. } => EventKind::SuperAdminApproved,
            ReviewEvent::SuperAdminRejected { .. } => EventKind::SuperAdminRejected,
            ReviewEvent::ForceSubmitted { .. } => EventKind::ForceSubmitted,
            ReviewEvent::ReviewBacklogDigest { .. } => EventKind::ReviewBacklogDigest,
        }
    }

    pub fn audience(&self) -> Audience {
        self.kind().audience()
    }

    pub fn report_id(&self) -> Option<ReportId> {
        match &self.event {
            ReviewEvent::AnalysisCompleted { report_id, .. }
            | ReviewEvent::ReportSubmitted { report_id, .. }
            | ReviewEvent::PendingAdminReview { report_id }
            | ReviewEvent::AiRejected { report_id, .. }
            | ReviewEvent::AdminApproved { report_id, .. }
            | ReviewEvent::AdminRejected { report_id, .. }
            | ReviewEvent::SuperAdminApproved { report_id, .. }
            | ReviewEvent::SuperAdminRejected { report_id, .. }
            | ReviewEvent::ForceSubmitted { report_id, .. } => Some(*report_id),
            ReviewEvent::ReviewBacklogDigest { .. } => None,
        }
    }

    /// The user whose action triggered the event, if any.
    pub fn actor_id(&self) -> Option<UserId> {
        match &self.event {
            ReviewEvent::ReportSubmitted { author_id, .. } => Some(*author_id),
            ReviewEvent::AdminApproved { admin_id, .. }
            | ReviewEvent::AdminRejected { admin_id, .. }
            | ReviewEvent::SuperAdminApproved { admin_id, .. }
            | ReviewEvent::SuperAdminRejected { admin_id, .. } => Some(*admin_id),
            ReviewEvent::ForceSubmitted { supervisor_id, .. } => Some(*supervisor_id),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.event {
            ReviewEvent::AiRejected { reason, .. }
            | ReviewEvent::AdminRejected { reason, .. }
            | ReviewEvent::SuperAdminRejected { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Variables handed to the mail template.
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("event".to_string(), self.kind().as_str().to_string());
        vars.insert("occurred_at".to_string(), self.occurred_at.to_rfc3339());
        if let Some(id) = self.report_id() {
            vars.insert("report_id".to_string(), id.to_string());
        }
        if let Some(actor) = self.actor_id() {
            vars.insert("actor_id".to_string(), actor.to_string());
        }
        if let Some(reason) = self.reason() {
            vars.insert("reason".to_string(), reason.to_string());
        }
        match &self.event {
            ReviewEvent::AnalysisCompleted {
                analysis_id,
                status,
                confidence,
                ..
            } => {
                vars.insert("analysis_id".to_string(), analysis_id.to_string());
                vars.insert("analysis_status".to_string(), status.to_string());
                vars.insert("confidence".to_string(), format!("{:.2}", confidence));
            }
            ReviewEvent::ReviewBacklogDigest { pending } => {
                vars.insert("pending".to_string(), pending.to_string());
            }
            _ => {}
        }
        vars
    }
}
