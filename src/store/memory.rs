//! In-memory implementation of `ReportStore` and `AnalysisStore`.
//!
//! All state lives in `HashMap`s behind `RwLock`s and is lost on drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AnalysisStore, ReportStore, apply_completion};
use crate::errors::StoreError;
use crate::models::{
    AnalysisCompletion, AnalysisId, AnalysisResult, AnalysisStatus, NewReport, RejectedBy, Report,
    ReportId, ReportStatus,
};

pub struct MemoryStore {
    reports: RwLock<HashMap<ReportId, Report>>,
    analyses: RwLock<HashMap<AnalysisId, AnalysisResult>>,
    next_report_id: AtomicI64,
    next_analysis_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            reports: RwLock::new(HashMap::new()),
            analyses: RwLock::new(HashMap::new()),
            next_report_id: AtomicI64::new(1),
            next_analysis_id: AtomicI64::new(1),
        }
    }

    /// Number of analysis rows recorded for `report_id`.
    pub async fn analysis_count(&self, report_id: ReportId) -> usize {
        self.analyses
            .read()
            .await
            .values()
            .filter(|a| a.report_id == report_id)
            .count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn insert(&self, new: NewReport) -> Result<Report, StoreError> {
        let id = ReportId(self.next_report_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let report = Report {
            id,
            author_id: new.author_id,
            title: new.title,
            period: new.period,
            content: new.content,
            status: ReportStatus::Draft,
            rejected_by: RejectedBy::None,
            rejection_reason: None,
            ai_analysis_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.reports.write().await.insert(id, report.clone());
        Ok(report)
    }

    async fn get(&self, id: ReportId) -> Result<Report, StoreError> {
        self.reports
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    async fn save(&self, mut report: Report) -> Result<Report, StoreError> {
        let mut reports = self.reports.write().await;
        let stored = reports
            .get_mut(&report.id)
            .ok_or(StoreError::NotFound { id: report.id })?;
        if stored.version != report.version {
            return Err(StoreError::Conflict {
                id: report.id,
                expected: report.version,
                actual: stored.version,
            });
        }
        report.version += 1;
        *stored = report.clone();
        Ok(report)
    }

    async fn list_by_status(&self, status: ReportStatus) -> Result<Vec<Report>, StoreError> {
        let mut reports: Vec<Report> = self
            .reports
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        reports.sort_by_key(|r| r.id);
        Ok(reports)
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn create_pending(
        &self,
        report_id: ReportId,
        provider: &str,
    ) -> Result<AnalysisResult, StoreError> {
        let id = AnalysisId(self.next_analysis_id.fetch_add(1, Ordering::SeqCst));
        let row = AnalysisResult {
            id,
            report_id,
            status: AnalysisStatus::Pending,
            confidence: 0.0,
            narrative: String::new(),
            keywords: Vec::new(),
            provider: provider.to_string(),
            created_at: Utc::now(),
            completed_at: None,
        };
        self.analyses.write().await.insert(id, row.clone());
        Ok(row)
    }

    async fn finalize(
        &self,
        id: AnalysisId,
        completion: AnalysisCompletion,
    ) -> Result<AnalysisResult, StoreError> {
        let mut analyses = self.analyses.write().await;
        let row = analyses
            .get_mut(&id)
            .ok_or(StoreError::AnalysisNotFound { id })?;
        apply_completion(row, completion)?;
        Ok(row.clone())
    }

    async fn get_analysis(&self, id: AnalysisId) -> Result<AnalysisResult, StoreError> {
        self.analyses
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::AnalysisNotFound { id })
    }

    async fn latest_for_report(
        &self,
        report_id: ReportId,
    ) -> Result<Option<AnalysisResult>, StoreError> {
        Ok(self
            .analyses
            .read()
            .await
            .values()
            .filter(|a| a.report_id == report_id)
            .max_by_key(|a| a.id)
            .cloned())
    }

    async fn pending_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AnalysisResult>, StoreError> {
        let mut rows: Vec<AnalysisResult> = self
            .analyses
            .read()
            .await
            .values()
            .filter(|a| a.status == AnalysisStatus::Pending && a.created_at < cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.id);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;

    fn draft() -> NewReport {
        NewReport {
            author_id: UserId(1),
            title: "Week 12".into(),
            period: "2026-W12".into(),
            content: "Shipped the importer.".into(),
        }
    }

    #[tokio::test]
    async fn insert_creates_draft_with_first_version() {
        let store = MemoryStore::new();
        let report = store.insert(draft()).await.unwrap();
        assert_eq!(report.status, ReportStatus::Draft);
        assert_eq!(report.version, 1);
        assert_eq!(store.get(report.id).await.unwrap(), report);
    }

    #[tokio::test]
    async fn stale_save_is_rejected_without_writing() {
        let store = MemoryStore::new();
        let report = store.insert(draft()).await.unwrap();

        let mut first = report.clone();
        first.title = "first".into();
        store.save(first).await.unwrap();

        let mut stale = report;
        stale.title = "stale".into();
        let err = store.save(stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, actual: 2, .. }));

        let stored = store.get(ReportId(1)).await.unwrap();
        assert_eq!(stored.title, "first");
    }

    #[tokio::test]
    async fn get_missing_report_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get(ReportId(42)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { id } if id == ReportId(42)));
    }

    #[tokio::test]
    async fn finalized_analysis_is_immutable() {
        let store = MemoryStore::new();
        let row = store.create_pending(ReportId(1), "mock").await.unwrap();
        let done = store
            .finalize(
                row.id,
                AnalysisCompletion::Completed {
                    confidence: 0.8,
                    narrative: "fine".into(),
                    keywords: vec![],
                },
            )
            .await
            .unwrap();
        assert_eq!(done.status, AnalysisStatus::Completed);
        assert!(done.completed_at.is_some());

        let err = store
            .finalize(
                row.id,
                AnalysisCompletion::Failed {
                    diagnostic: "late".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AnalysisFinalized { .. }));
    }

    #[tokio::test]
    async fn pending_since_skips_final_rows() {
        let store = MemoryStore::new();
        let a = store.create_pending(ReportId(1), "mock").await.unwrap();
        let b = store.create_pending(ReportId(2), "mock").await.unwrap();
        store
            .finalize(b.id, AnalysisCompletion::Failed { diagnostic: "x".into() })
            .await
            .unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let pending = store.pending_since(cutoff).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);
    }
}
