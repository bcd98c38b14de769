//! Persistence seams for reports and analysis rows.
//!
//! The review pipeline treats storage as an external collaborator. Two
//! adapters ship with the crate:
//!
//! - [`memory::MemoryStore`]: `RwLock<HashMap>` backed, used by tests and
//!   embedders that own persistence elsewhere
//! - [`sqlite::SqliteStore`]: single-file SQLite database used by the CLI
//!
//! Both enforce optimistic locking on [`ReportStore::save`]: the caller's
//! `version` must match the stored one, otherwise the save fails with
//! [`StoreError::Conflict`] and nothing is written.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StoreError;
use crate::models::{
    AnalysisCompletion, AnalysisId, AnalysisResult, NewReport, Report, ReportId, ReportStatus,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Create a report in `Draft`.
    async fn insert(&self, new: NewReport) -> Result<Report, StoreError>;

    async fn get(&self, id: ReportId) -> Result<Report, StoreError>;

    /// Persist `report` if its `version` is current. Returns the stored copy
    /// with the version incremented.
    async fn save(&self, report: Report) -> Result<Report, StoreError>;

    async fn list_by_status(&self, status: ReportStatus) -> Result<Vec<Report>, StoreError>;
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn create_pending(
        &self,
        report_id: ReportId,
        provider: &str,
    ) -> Result<AnalysisResult, StoreError>;

    /// Move a pending row to its final state. Final rows are immutable.
    async fn finalize(
        &self,
        id: AnalysisId,
        completion: AnalysisCompletion,
    ) -> Result<AnalysisResult, StoreError>;

    async fn get_analysis(&self, id: AnalysisId) -> Result<AnalysisResult, StoreError>;

    /// Most recently created row for `report_id`, if any.
    async fn latest_for_report(
        &self,
        report_id: ReportId,
    ) -> Result<Option<AnalysisResult>, StoreError>;

    /// Pending rows created before `cutoff`.
    async fn pending_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AnalysisResult>, StoreError>;
}

/// Apply a completion to a pending row in place.
pub(crate) fn apply_completion(
    row: &mut AnalysisResult,
    completion: AnalysisCompletion,
) -> Result<(), StoreError> {
    if row.is_final() {
        return Err(StoreError::AnalysisFinalized { id: row.id });
    }
    match completion {
        AnalysisCompletion::Completed {
            confidence,
            narrative,
            keywords,
        } => {
            row.status = crate::models::AnalysisStatus::Completed;
            row.confidence = confidence.clamp(0.0, 1.0);
            row.narrative = narrative;
            row.keywords = keywords;
        }
        AnalysisCompletion::Failed { diagnostic } => {
            row.status = crate::models::AnalysisStatus::Failed;
            row.confidence = 0.0;
            row.narrative = diagnostic;
            row.keywords = Vec::new();
        }
    }
    row.completed_at = Some(Utc::now());
    Ok(())
}
