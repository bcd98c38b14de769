use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Primary key of a status report.
    ReportId
);
id_type!(
    /// Primary key of a user in the external directory.
    UserId
);
id_type!(
    /// Primary key of an analysis row.
    AnalysisId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Draft,
    Submitted,
    AiReviewing,
    PendingAdminReview,
    AdminApproved,
    SuperAdminApproved,
    Rejected,
    ForceSubmitted,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::AiReviewing => "AI_REVIEWING",
            Self::PendingAdminReview => "PENDING_ADMIN_REVIEW",
            Self::AdminApproved => "ADMIN_APPROVED",
            Self::SuperAdminApproved => "SUPER_ADMIN_APPROVED",
            Self::Rejected => "REJECTED",
            Self::ForceSubmitted => "FORCE_SUBMITTED",
        }
    }

    /// Terminal states accept no further action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AdminApproved | Self::SuperAdminApproved | Self::ForceSubmitted
        )
    }

    /// The review transition table.
    pub fn permits(&self, action: ReviewAction) -> bool {
        match action {
            ReviewAction::Submit => matches!(self, Self::Draft | Self::Rejected),
            ReviewAction::BeginReview => *self == Self::Submitted,
            ReviewAction::ApplyAiDecision => *self == Self::AiReviewing,
            ReviewAction::Approve | ReviewAction::Reject => *self == Self::PendingAdminReview,
            ReviewAction::ForceSubmit => !self.is_terminal(),
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "SUBMITTED" => Ok(Self::Submitted),
            "AI_REVIEWING" => Ok(Self::AiReviewing),
            "PENDING_ADMIN_REVIEW" => Ok(Self::PendingAdminReview),
            "ADMIN_APPROVED" => Ok(Self::AdminApproved),
            "SUPER_ADMIN_APPROVED" => Ok(Self::SuperAdminApproved),
            "REJECTED" => Ok(Self::Rejected),
            "FORCE_SUBMITTED" => Ok(Self::ForceSubmitted),
            _ => Err(format!("Invalid report status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectedBy {
    #[default]
    None,
    Ai,
    Admin,
    SuperAdmin,
}

impl RejectedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Ai => "AI",
            Self::Admin => "ADMIN",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }
}

impl fmt::Display for RejectedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RejectedBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "AI" => Ok(Self::Ai),
            "ADMIN" => Ok(Self::Admin),
            "SUPER_ADMIN" => Ok(Self::SuperAdmin),
            _ => Err(format!("Invalid rejected_by: {}", s)),
        }
    }
}

/// Actions that move a report through the review state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewAction {
    Submit,
    BeginReview,
    ApplyAiDecision,
    Approve,
    Reject,
    ForceSubmit,
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submit => "submit",
            Self::BeginReview => "begin AI review of",
            Self::ApplyAiDecision => "apply AI decision to",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::ForceSubmit => "force-submit",
        };
        f.write_str(s)
    }
}

/// Who is acting on a report in an admin review step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Reviewer {
    Admin(UserId),
    SuperAdmin(UserId),
}

impl Reviewer {
    pub fn user_id(&self) -> UserId {
        match self {
            Self::Admin(id) | Self::SuperAdmin(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: ReportId,
    pub author_id: UserId,
    pub title: String,
    pub period: String,
    pub content: String,
    pub status: ReportStatus,
    pub rejected_by: RejectedBy,
    pub rejection_reason: Option<String>,
    pub ai_analysis_id: Option<AnalysisId>,
    /// Incremented by the store on every successful save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// Move to `status`, clearing rejection fields unless the new status is `Rejected`.
    pub(crate) fn set_status(&mut self, status: ReportStatus, rejected_by: RejectedBy, reason: Option<String>) {
        self.status = status;
        if status == ReportStatus::Rejected {
            self.rejected_by = rejected_by;
            self.rejection_reason = reason;
        } else {
            self.rejected_by = RejectedBy::None;
            self.rejection_reason = None;
        }
        self.updated_at = Utc::now();
    }
}

/// Fields an author supplies when creating a draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub author_id: UserId,
    pub title: String,
    pub period: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Pending,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid analysis status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub id: AnalysisId,
    pub report_id: ReportId,
    pub status: AnalysisStatus,
    pub confidence: f64,
    pub narrative: String,
    pub keywords: Vec<String>,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisResult {
    pub fn is_final(&self) -> bool {
        self.status != AnalysisStatus::Pending
    }
}

/// The terminal state an analysis row is finalized into.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisCompletion {
    Completed {
        confidence: f64,
        narrative: String,
        keywords: Vec<String>,
    },
    Failed {
        diagnostic: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ReportStatus::Draft,
            ReportStatus::AiReviewing,
            ReportStatus::SuperAdminApproved,
            ReportStatus::ForceSubmitted,
        ] {
            assert_eq!(status.as_str().parse::<ReportStatus>().unwrap(), status);
        }
        assert!("draft".parse::<ReportStatus>().is_err());
    }

    #[test]
    fn approve_and_reject_only_from_pending_admin_review() {
        for status in [
            ReportStatus::Draft,
            ReportStatus::Submitted,
            ReportStatus::AiReviewing,
            ReportStatus::Rejected,
        ] {
            assert!(!status.permits(ReviewAction::Approve));
            assert!(!status.permits(ReviewAction::Reject));
        }
        assert!(ReportStatus::PendingAdminReview.permits(ReviewAction::Approve));
        assert!(ReportStatus::PendingAdminReview.permits(ReviewAction::Reject));
    }

    #[test]
    fn force_submit_allowed_from_every_non_terminal_state() {
        assert!(ReportStatus::Draft.permits(ReviewAction::ForceSubmit));
        assert!(ReportStatus::AiReviewing.permits(ReviewAction::ForceSubmit));
        assert!(ReportStatus::Rejected.permits(ReviewAction::ForceSubmit));
        assert!(!ReportStatus::AdminApproved.permits(ReviewAction::ForceSubmit));
        assert!(!ReportStatus::ForceSubmitted.permits(ReviewAction::ForceSubmit));
    }

    #[test]
    fn submit_allowed_from_draft_and_rejected() {
        assert!(ReportStatus::Draft.permits(ReviewAction::Submit));
        assert!(ReportStatus::Rejected.permits(ReviewAction::Submit));
        assert!(!ReportStatus::Submitted.permits(ReviewAction::Submit));
        assert!(!ReportStatus::PendingAdminReview.permits(ReviewAction::Submit));
    }

    #[test]
    fn reviewer_serializes_with_role_tag() {
        let json = serde_json::to_string(&Reviewer::SuperAdmin(UserId(9))).unwrap();
        assert_eq!(json, r#"{"role":"super_admin","id":9}"#);
    }
}
