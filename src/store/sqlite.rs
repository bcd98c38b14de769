use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{AnalysisStore, ReportStore, apply_completion};
use crate::errors::StoreError;
use crate::models::{
    AnalysisCompletion, AnalysisId, AnalysisResult, AnalysisStatus, NewReport, RejectedBy, Report,
    ReportId, ReportStatus, UserId,
};

const REPORT_COLUMNS: &str = "id, author_id, title, period, content, status, rejected_by, \
     rejection_reason, ai_analysis_id, version, created_at, updated_at";

const ANALYSIS_COLUMNS: &str =
    "id, report_id, status, confidence, narrative, keywords, provider, created_at, completed_at";

/// SQLite-backed store.
///
/// Wraps the connection behind `Arc<Mutex>` and runs every statement on
/// tokio's blocking pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<std::sync::Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                period TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'DRAFT',
                rejected_by TEXT NOT NULL DEFAULT 'NONE',
                rejection_reason TEXT,
                ai_analysis_id INTEGER,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS analyses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                status TEXT NOT NULL DEFAULT 'PENDING',
                confidence REAL NOT NULL DEFAULT 0,
                narrative TEXT NOT NULL DEFAULT '',
                keywords TEXT NOT NULL DEFAULT '[]',
                provider TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status);
            CREATE INDEX IF NOT EXISTS idx_analyses_report ON analyses(report_id);
            ",
        )?;
        Ok(Self {
            inner: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    /// Run a closure with the connection on a blocking thread.
    async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StoreError::Backend(format!("DB lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("DB task panicked: {}", e)))?
    }
}

struct ReportRow {
    id: i64,
    author_id: i64,
    title: String,
    period: String,
    content: String,
    status: String,
    rejected_by: String,
    rejection_reason: Option<String>,
    ai_analysis_id: Option<i64>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl ReportRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            author_id: row.get(1)?,
            title: row.get(2)?,
            period: row.get(3)?,
            content: row.get(4)?,
            status: row.get(5)?,
            rejected_by: row.get(6)?,
            rejection_reason: row.get(7)?,
            ai_analysis_id: row.get(8)?,
            version: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_report(self) -> Result<Report, StoreError> {
        Ok(Report {
            id: ReportId(self.id),
            author_id: UserId(self.author_id),
            title: self.title,
            period: self.period,
            content: self.content,
            status: ReportStatus::from_str(&self.status).map_err(StoreError::Backend)?,
            rejected_by: RejectedBy::from_str(&self.rejected_by).map_err(StoreError::Backend)?,
            rejection_reason: self.rejection_reason,
            ai_analysis_id: self.ai_analysis_id.map(AnalysisId),
            version: self.version as u64,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct AnalysisRow {
    id: i64,
    report_id: i64,
    status: String,
    confidence: f64,
    narrative: String,
    keywords: String,
    provider: String,
    created_at: String,
    completed_at: Option<String>,
}

impl AnalysisRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            report_id: row.get(1)?,
            status: row.get(2)?,
            confidence: row.get(3)?,
            narrative: row.get(4)?,
            keywords: row.get(5)?,
            provider: row.get(6)?,
            created_at: row.get(7)?,
            completed_at: row.get(8)?,
        })
    }

    fn into_result(self) -> Result<AnalysisResult, StoreError> {
        Ok(AnalysisResult {
            id: AnalysisId(self.id),
            report_id: ReportId(self.report_id),
            status: AnalysisStatus::from_str(&self.status).map_err(StoreError::Backend)?,
            confidence: self.confidence,
            narrative: self.narrative,
            keywords: serde_json::from_str(&self.keywords)
                .map_err(|e| StoreError::Backend(format!("Invalid keywords JSON: {}", e)))?,
            provider: self.provider,
            created_at: parse_timestamp(&self.created_at)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("Invalid timestamp '{}': {}", s, e)))
}

fn load_report(conn: &Connection, id: ReportId) -> Result<Report, StoreError> {
    let sql = format!("SELECT {} FROM reports WHERE id = ?1", REPORT_COLUMNS);
    conn.query_row(&sql, params![id.0], ReportRow::from_row)
        .optional()?
        .ok_or(StoreError::NotFound { id })?
        .into_report()
}

fn load_analysis(conn: &Connection, id: AnalysisId) -> Result<AnalysisResult, StoreError> {
    let sql = format!("SELECT {} FROM analyses WHERE id = ?1", ANALYSIS_COLUMNS);
    conn.query_row(&sql, params![id.0], AnalysisRow::from_row)
        .optional()?
        .ok_or(StoreError::AnalysisNotFound { id })?
        .into_result()
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn insert(&self, new: NewReport) -> Result<Report, StoreError> {
        self.call(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO reports (author_id, title, period, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![new.author_id.0, new.title, new.period, new.content, now],
            )?;
            load_report(conn, ReportId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn get(&self, id: ReportId) -> Result<Report, StoreError> {
        self.call(move |conn| load_report(conn, id)).await
    }

    async fn save(&self, report: Report) -> Result<Report, StoreError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE reports SET title = ?3, period = ?4, content = ?5, status = ?6,
                     rejected_by = ?7, rejection_reason = ?8, ai_analysis_id = ?9,
                     version = version + 1, updated_at = ?10
                 WHERE id = ?1 AND version = ?2",
                params![
                    report.id.0,
                    report.version as i64,
                    report.title,
                    report.period,
                    report.content,
                    report.status.as_str(),
                    report.rejected_by.as_str(),
                    report.rejection_reason,
                    report.ai_analysis_id.map(|a| a.0),
                    report.updated_at.to_rfc3339(),
                ],
            )?;
            if changed == 0 {
                let current = load_report(conn, report.id)?;
                return Err(StoreError::Conflict {
                    id: report.id,
                    expected: report.version,
                    actual: current.version,
                });
            }
            load_report(conn, report.id)
        })
        .await
    }

    async fn list_by_status(&self, status: ReportStatus) -> Result<Vec<Report>, StoreError> {
        self.call(move |conn| {
            let sql = format!(
                "SELECT {} FROM reports WHERE status = ?1 ORDER BY id",
                REPORT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![status.as_str()], ReportRow::from_row)?;
            rows.map(|r| r.map_err(StoreError::from).and_then(ReportRow::into_report))
                .collect()
        })
        .await
    }
}

#[async_trait]
impl AnalysisStore for SqliteStore {
    async fn create_pending(
        &self,
        report_id: ReportId,
        provider: &str,
    ) -> Result<AnalysisResult, StoreError> {
        let provider = provider.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO analyses (report_id, provider, created_at) VALUES (?1, ?2, ?3)",
                params![report_id.0, provider, Utc::now().to_rfc3339()],
            )?;
            load_analysis(conn, AnalysisId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn finalize(
        &self,
        id: AnalysisId,
        completion: AnalysisCompletion,
    ) -> Result<AnalysisResult, StoreError> {
        self.call(move |conn| {
            let mut row = load_analysis(conn, id)?;
            apply_completion(&mut row, completion)?;
            let keywords = serde_json::to_string(&row.keywords)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let changed = conn.execute(
                "UPDATE analyses SET status = ?2, confidence = ?3, narrative = ?4,
                     keywords = ?5, completed_at = ?6
                 WHERE id = ?1 AND status = 'PENDING'",
                params![
                    id.0,
                    row.status.as_str(),
                    row.confidence,
                    row.narrative,
                    keywords,
                    row.completed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::AnalysisFinalized { id });
            }
            Ok(row)
        })
        .await
    }

    async fn get_analysis(&self, id: AnalysisId) -> Result<AnalysisResult, StoreError> {
        self.call(move |conn| load_analysis(conn, id)).await
    }

    async fn latest_for_report(
        &self,
        report_id: ReportId,
    ) -> Result<Option<AnalysisResult>, StoreError> {
        self.call(move |conn| {
            let sql = format!(
                "SELECT {} FROM analyses WHERE report_id = ?1 ORDER BY id DESC LIMIT 1",
                ANALYSIS_COLUMNS
            );
            let row = conn
                .query_row(&sql, params![report_id.0], AnalysisRow::from_row)
                .optional()?;
            row.map(AnalysisRow::into_result).transpose()
        })
        .await
    }

    async fn pending_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AnalysisResult>, StoreError> {
        self.call(move |conn| {
            let sql = format!(
                "SELECT {} FROM analyses WHERE status = 'PENDING' ORDER BY id",
                ANALYSIS_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], AnalysisRow::from_row)?;
            let mut pending = Vec::new();
            for row in rows {
                let result = row?.into_result()?;
                // RFC 3339 text does not sort reliably across offsets, so compare parsed values.
                if result.created_at < cutoff {
                    pending.push(result);
                }
            }
            Ok(pending)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(author: i64) -> NewReport {
        NewReport {
            author_id: UserId(author),
            title: "Sprint 4".into(),
            period: "2026-10".into(),
            content: "Closed the billing epic.".into(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = store.insert(draft(5)).await.unwrap();
        assert_eq!(report.status, ReportStatus::Draft);
        assert_eq!(report.rejected_by, RejectedBy::None);
        assert_eq!(report.version, 1);

        let loaded = store.get(report.id).await.unwrap();
        assert_eq!(loaded.author_id, UserId(5));
        assert_eq!(loaded.title, "Sprint 4");
    }

    #[tokio::test]
    async fn save_bumps_version_and_detects_stale_writes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = store.insert(draft(1)).await.unwrap();

        let mut submitted = report.clone();
        submitted.status = ReportStatus::Submitted;
        let saved = store.save(submitted).await.unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(saved.status, ReportStatus::Submitted);

        let err = store.save(report).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn save_missing_report_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut report = store.insert(draft(1)).await.unwrap();
        report.id = ReportId(99);
        let err = store.save(report).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_by_status_filters() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.insert(draft(1)).await.unwrap();
        store.insert(draft(2)).await.unwrap();
        let mut a2 = a.clone();
        a2.status = ReportStatus::Submitted;
        store.save(a2).await.unwrap();

        let submitted = store.list_by_status(ReportStatus::Submitted).await.unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].id, a.id);
        assert_eq!(store.list_by_status(ReportStatus::Draft).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn analysis_lifecycle_persists_keywords() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = store.insert(draft(1)).await.unwrap();
        let pending = store.create_pending(report.id, "mock").await.unwrap();
        assert_eq!(pending.status, AnalysisStatus::Pending);

        store
            .finalize(
                pending.id,
                AnalysisCompletion::Completed {
                    confidence: 0.72,
                    narrative: "Clear progress summary".into(),
                    keywords: vec!["billing".into(), "epic".into()],
                },
            )
            .await
            .unwrap();

        let loaded = store.get_analysis(pending.id).await.unwrap();
        assert_eq!(loaded.status, AnalysisStatus::Completed);
        assert_eq!(loaded.keywords, vec!["billing", "epic"]);
        assert!((loaded.confidence - 0.72).abs() < f64::EPSILON);

        let err = store
            .finalize(pending.id, AnalysisCompletion::Failed { diagnostic: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AnalysisFinalized { .. }));
    }

    #[tokio::test]
    async fn latest_for_report_picks_newest_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = store.insert(draft(1)).await.unwrap();
        assert!(store.latest_for_report(report.id).await.unwrap().is_none());

        store.create_pending(report.id, "mock").await.unwrap();
        let second = store.create_pending(report.id, "openai").await.unwrap();
        let latest = store.latest_for_report(report.id).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.provider, "openai");
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.db");
        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.insert(draft(3)).await.unwrap().id
        };
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get(id).await.unwrap().author_id, UserId(3));
    }
}
