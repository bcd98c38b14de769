//! Analysis orchestrator.
//!
//! Schedules provider calls for submitted reports and owns everything that
//! happens when a call ends:
//!
//! 1. Finalize the analysis row (`Completed`, or `Failed` with a diagnostic)
//! 2. Free the report's in-flight slot
//! 3. Publish [`AnalysisCompleted`] for the gate
//! 4. Resolve every [`AnalysisHandle`] for the call
//!
//! These steps run whether or not anyone still holds a handle. A provider
//! call is bounded by the configured timeout and is never retried here;
//! retrying is an explicit operator action.

pub mod pool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::{Mutex, watch};
use tracing::Instrument;

use crate::analysis::AnalysisProvider;
use crate::bus::{AnalysisCompleted, AnalysisPublisher};
use crate::config::WorkersSection;
use crate::errors::{ProviderError, ReviewError, StoreError};
use crate::gate::StatusGate;
use crate::models::{AnalysisCompletion, AnalysisId, AnalysisResult, ReportId, ReviewAction};
use crate::store::{AnalysisStore, ReportStore};

pub use pool::{Job, Placement, WorkerPool};

/// A caller's view of one scheduled analysis.
///
/// Cloning is cheap; dropping every clone cancels nothing.
#[derive(Debug, Clone)]
pub struct AnalysisHandle {
    report_id: ReportId,
    analysis_id: AnalysisId,
    rx: watch::Receiver<Option<AnalysisResult>>,
}

impl AnalysisHandle {
    pub fn report_id(&self) -> ReportId {
        self.report_id
    }

    pub fn analysis_id(&self) -> AnalysisId {
        self.analysis_id
    }

    /// Wait up to `timeout` for the finalized row.
    ///
    /// `None` when the deadline passes first, or when the row could not be
    /// finalized (it stays `Pending` until a sweep fails it).
    pub async fn wait(&mut self, timeout: Duration) -> Option<AnalysisResult> {
        let finished = tokio::time::timeout(timeout, self.rx.wait_for(|r| r.is_some())).await;
        match finished {
            Ok(Ok(result)) => result.clone(),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

struct Inner {
    reports: Arc<dyn ReportStore>,
    analyses: Arc<dyn AnalysisStore>,
    provider: Arc<dyn AnalysisProvider>,
    gate: Arc<StatusGate>,
    publisher: AnalysisPublisher,
    pool: WorkerPool,
    call_timeout: Duration,
    in_flight: Mutex<HashMap<ReportId, AnalysisHandle>>,
    /// Per-report scheduling locks, present only while someone schedules.
    scheduling: Mutex<HashMap<ReportId, Arc<Mutex<()>>>>,
}

/// Result of claiming a report's in-flight slot.
enum Reservation {
    Running(AnalysisHandle),
    Scheduled {
        handle: AnalysisHandle,
        content: String,
        tx: watch::Sender<Option<AnalysisResult>>,
    },
}

pub struct AnalysisOrchestrator {
    inner: Arc<Inner>,
}

pub struct OrchestratorParts {
    pub reports: Arc<dyn ReportStore>,
    pub analyses: Arc<dyn AnalysisStore>,
    pub provider: Arc<dyn AnalysisProvider>,
    pub gate: Arc<StatusGate>,
    pub publisher: AnalysisPublisher,
}

impl AnalysisOrchestrator {
    /// Build the orchestrator and start its worker pool.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(parts: OrchestratorParts, workers: WorkersSection, call_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                reports: parts.reports,
                analyses: parts.analyses,
                provider: parts.provider,
                gate: parts.gate,
                publisher: parts.publisher,
                pool: WorkerPool::new(workers),
                call_timeout,
                in_flight: Mutex::new(HashMap::new()),
                scheduling: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.inner.provider.name()
    }

    /// Whether an analysis for `report_id` is running in this process.
    pub async fn is_in_flight(&self, report_id: ReportId) -> bool {
        self.inner.in_flight.lock().await.contains_key(&report_id)
    }

    /// Start analysing a submitted report.
    ///
    /// A report with an analysis already running gets that analysis' handle
    /// back, so at most one provider call per report is ever in progress.
    /// Scheduling is serialized per report; unrelated reports schedule in
    /// parallel, and the availability probe runs outside every lock.
    pub async fn schedule_analysis(&self, report_id: ReportId) -> Result<AnalysisHandle, ReviewError> {
        let inner = &self.inner;
        if let Some(handle) = inner.running(report_id).await {
            tracing::debug!(%report_id, analysis_id = %handle.analysis_id, "analysis already in flight");
            return Ok(handle);
        }

        if !inner.provider.is_available().await {
            tracing::error!(%report_id, provider = inner.provider.name(), "analysis engine unavailable");
            return Err(ReviewError::EngineUnavailable {
                provider: inner.provider.name().to_string(),
            });
        }

        let lock = inner.report_lock(report_id).await;
        let reservation = {
            let _turn = lock.lock().await;
            inner.reserve(report_id).await
        };
        inner.release_report_lock(report_id, lock).await;

        let (handle, content, tx) = match reservation? {
            Reservation::Running(handle) => {
                tracing::debug!(%report_id, analysis_id = %handle.analysis_id, "analysis already in flight");
                return Ok(handle);
            }
            Reservation::Scheduled {
                handle,
                content,
                tx,
            } => (handle, content, tx),
        };

        let analysis_id = handle.analysis_id;
        tracing::info!(%report_id, %analysis_id, provider = inner.provider.name(), "analysis scheduled");

        let worker = Arc::clone(inner);
        let placement = inner
            .pool
            .submit(Box::pin(
                async move {
                    worker.run(report_id, analysis_id, content, tx).await;
                }
                .instrument(tracing::info_span!("analysis", %report_id, %analysis_id)),
            ))
            .await;
        tracing::debug!(%report_id, %analysis_id, ?placement, "analysis job placed");

        Ok(handle)
    }

    /// Fail analyses left `Pending` for longer than `max_age`.
    ///
    /// Each swept row is published like any other completion, so its report
    /// ends `Rejected` by the AI gate rather than hanging in review. Rows
    /// whose report has a call running in this process are left alone.
    pub async fn sweep_stuck(&self, max_age: Duration) -> Result<Vec<AnalysisId>, ReviewError> {
        let inner = &self.inner;
        let Some(cutoff) = TimeDelta::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(Vec::new());
        };

        let mut swept = Vec::new();
        for row in inner.analyses.pending_since(cutoff).await? {
            if self.is_in_flight(row.report_id).await {
                continue;
            }
            let diagnostic = format!(
                "analysis stuck in PENDING for more than {}s",
                max_age.as_secs()
            );
            match inner
                .analyses
                .finalize(row.id, AnalysisCompletion::Failed { diagnostic })
                .await
            {
                Ok(_) => {}
                Err(StoreError::AnalysisFinalized { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
            tracing::warn!(report_id = %row.report_id, analysis_id = %row.id, "stuck analysis failed");
            inner
                .publisher
                .publish(AnalysisCompleted {
                    analysis_id: row.id,
                    report_id: row.report_id,
                })
                .await;
            swept.push(row.id);
        }
        Ok(swept)
    }
}

impl Inner {
    async fn running(&self, report_id: ReportId) -> Option<AnalysisHandle> {
        self.in_flight.lock().await.get(&report_id).cloned()
    }

    async fn report_lock(&self, report_id: ReportId) -> Arc<Mutex<()>> {
        let mut locks = self.scheduling.lock().await;
        Arc::clone(locks.entry(report_id).or_default())
    }

    async fn release_report_lock(&self, report_id: ReportId, lock: Arc<Mutex<()>>) {
        let mut locks = self.scheduling.lock().await;
        // The map and `lock` are the only owners once nobody else waits.
        let last = Arc::strong_count(&lock) == 2;
        drop(lock);
        if last {
            locks.remove(&report_id);
        }
    }

    /// Create the pending row and move the report to `AiReviewing`.
    /// Callers hold the report's scheduling lock.
    async fn reserve(&self, report_id: ReportId) -> Result<Reservation, ReviewError> {
        if let Some(handle) = self.running(report_id).await {
            return Ok(Reservation::Running(handle));
        }

        let report = self.reports.get(report_id).await?;
        if !report.status.permits(ReviewAction::BeginReview) {
            return Err(ReviewError::InvalidTransition {
                id: report_id,
                from: report.status,
                action: ReviewAction::BeginReview,
            });
        }

        let row = self
            .analyses
            .create_pending(report_id, self.provider.name())
            .await?;
        if let Err(e) = self.gate.begin_review(report_id, row.id).await {
            let diagnostic = format!("review could not start: {}", e);
            if let Err(fe) = self
                .analyses
                .finalize(row.id, AnalysisCompletion::Failed { diagnostic })
                .await
            {
                tracing::warn!(%report_id, analysis_id = %row.id, error = %fe, "could not close orphaned analysis");
            }
            return Err(e);
        }

        let (tx, rx) = watch::channel(None);
        let handle = AnalysisHandle {
            report_id,
            analysis_id: row.id,
            rx,
        };
        self.in_flight.lock().await.insert(report_id, handle.clone());
        Ok(Reservation::Scheduled {
            handle,
            content: report.content,
            tx,
        })
    }

    async fn run(
        &self,
        report_id: ReportId,
        analysis_id: AnalysisId,
        content: String,
        tx: watch::Sender<Option<AnalysisResult>>,
    ) {
        let outcome = tokio::time::timeout(self.call_timeout, self.provider.analyze(&content)).await;
        let completion = match outcome {
            Ok(Ok(outcome)) => AnalysisCompletion::Completed {
                confidence: outcome.confidence,
                narrative: outcome.narrative,
                keywords: outcome.keywords,
            },
            Ok(Err(e)) => {
                tracing::warn!(%report_id, %analysis_id, error = %e, "provider call failed");
                AnalysisCompletion::Failed {
                    diagnostic: e.to_string(),
                }
            }
            Err(_) => {
                let e = ProviderError::Timeout {
                    secs: self.call_timeout.as_secs(),
                };
                tracing::warn!(%report_id, %analysis_id, error = %e, "provider call timed out");
                AnalysisCompletion::Failed {
                    diagnostic: e.to_string(),
                }
            }
        };

        let finalized = self.analyses.finalize(analysis_id, completion).await;
        // Free the slot before the gate can act, so a retry schedules afresh.
        self.in_flight.lock().await.remove(&report_id);

        let result = match finalized {
            Ok(result) => {
                self.publisher
                    .publish(AnalysisCompleted {
                        analysis_id,
                        report_id,
                    })
                    .await;
                Some(result)
            }
            // Swept while the call was running; the sweep already published.
            Err(StoreError::AnalysisFinalized { .. }) => {
                self.analyses.get_analysis(analysis_id).await.ok()
            }
            Err(e) => {
                tracing::error!(%report_id, %analysis_id, error = %e, "failed to persist analysis result");
                None
            }
        };
        tx.send_replace(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisOutcome, MockProvider};
    use crate::bus::{analysis_channel, notification_channel};
    use crate::models::{AnalysisStatus, NewReport, ReportStatus, UserId};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::sync::{Notify, mpsc};

    /// Blocks every call until released; tracks peak concurrency.
    #[derive(Default)]
    struct GatedProvider {
        release: Notify,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AnalysisProvider for GatedProvider {
        fn name(&self) -> &str {
            "gated"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn analyze(&self, _content: &str) -> Result<AnalysisOutcome, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.release.notified().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(AnalysisOutcome {
                confidence: 0.9,
                narrative: "ok".into(),
                keywords: vec![],
            })
        }
    }

    /// Slow availability probe; calls optionally held until released.
    struct SlowProbeProvider {
        probe: Duration,
        hold: Option<Notify>,
    }

    #[async_trait]
    impl AnalysisProvider for SlowProbeProvider {
        fn name(&self) -> &str {
            "slow-probe"
        }

        async fn is_available(&self) -> bool {
            tokio::time::sleep(self.probe).await;
            true
        }

        async fn analyze(&self, _content: &str) -> Result<AnalysisOutcome, ProviderError> {
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            Ok(AnalysisOutcome {
                confidence: 0.9,
                narrative: "ok".into(),
                keywords: vec![],
            })
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        orchestrator: AnalysisOrchestrator,
        completions: mpsc::Receiver<AnalysisCompleted>,
    }

    fn fixture(provider: Arc<dyn AnalysisProvider>, timeout: Duration) -> Fixture {
        fixture_with_publisher(provider, timeout, analysis_channel(64))
    }

    fn fixture_with_publisher(
        provider: Arc<dyn AnalysisProvider>,
        timeout: Duration,
        (publisher, completions): (AnalysisPublisher, mpsc::Receiver<AnalysisCompleted>),
    ) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let (notify_tx, _notify_rx) = notification_channel(64);
        let gate = Arc::new(StatusGate::new(store.clone(), store.clone(), 0.7, notify_tx));
        let orchestrator = AnalysisOrchestrator::new(
            OrchestratorParts {
                reports: store.clone(),
                analyses: store.clone(),
                provider,
                gate,
                publisher,
            },
            WorkersSection::default(),
            timeout,
        );
        Fixture {
            store,
            orchestrator,
            completions,
        }
    }

    async fn submitted(store: &MemoryStore, content: &str) -> ReportId {
        let report = store
            .insert(NewReport {
                author_id: UserId(1),
                title: "t".into(),
                period: "p".into(),
                content: content.into(),
            })
            .await
            .unwrap();
        let mut report = report;
        report.status = ReportStatus::Submitted;
        store.save(report).await.unwrap().id
    }

    #[tokio::test]
    async fn completion_finalizes_row_and_publishes() {
        let mut fx = fixture(Arc::new(MockProvider::new()), Duration::from_secs(5));
        let id = submitted(&fx.store, &"a".repeat(850)).await;

        let mut handle = fx.orchestrator.schedule_analysis(id).await.unwrap();
        let report = fx.store.get(id).await.unwrap();
        assert_eq!(report.status, ReportStatus::AiReviewing);
        assert_eq!(report.ai_analysis_id, Some(handle.analysis_id()));

        let result = handle.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.status, AnalysisStatus::Completed);
        assert_eq!(result.confidence, 0.85);

        let message = fx.completions.recv().await.unwrap();
        assert_eq!(message.analysis_id, result.id);
        assert_eq!(message.report_id, id);
        assert!(!fx.orchestrator.is_in_flight(id).await);
    }

    #[tokio::test]
    async fn second_schedule_coalesces_onto_running_call() {
        let provider = Arc::new(GatedProvider::default());
        let fx = fixture(provider.clone(), Duration::from_secs(5));
        let id = submitted(&fx.store, "content").await;

        let mut first = fx.orchestrator.schedule_analysis(id).await.unwrap();
        let second = fx.orchestrator.schedule_analysis(id).await.unwrap();
        assert_eq!(first.analysis_id(), second.analysis_id());
        assert_eq!(fx.store.analysis_count(id).await, 1);

        // Let the call start, then release it.
        while provider.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        provider.release.notify_waiters();
        first.wait(Duration::from_secs(5)).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_provider_fails_fast_without_side_effects() {
        let provider = Arc::new(MockProvider::new().with_available(false));
        let fx = fixture(provider.clone(), Duration::from_secs(5));
        let id = submitted(&fx.store, "content").await;

        let err = fx.orchestrator.schedule_analysis(id).await.unwrap_err();
        assert!(matches!(err, ReviewError::EngineUnavailable { ref provider } if provider == "mock"));
        assert_eq!(fx.store.get(id).await.unwrap().status, ReportStatus::Submitted);
        assert_eq!(fx.store.analysis_count(id).await, 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn timeout_finalizes_as_failed() {
        let provider = Arc::new(GatedProvider::default());
        let mut fx = fixture(provider, Duration::from_millis(50));
        let id = submitted(&fx.store, "content").await;

        let mut handle = fx.orchestrator.schedule_analysis(id).await.unwrap();
        let result = handle.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.status, AnalysisStatus::Failed);
        assert!(result.narrative.contains("timed out"));
        assert!(fx.completions.recv().await.is_some());
    }

    #[tokio::test]
    async fn schedule_requires_submitted_report() {
        let fx = fixture(Arc::new(MockProvider::new()), Duration::from_secs(5));
        let draft = fx
            .store
            .insert(NewReport {
                author_id: UserId(1),
                title: "t".into(),
                period: "p".into(),
                content: "c".into(),
            })
            .await
            .unwrap();
        let err = fx.orchestrator.schedule_analysis(draft.id).await.unwrap_err();
        assert!(matches!(
            err,
            ReviewError::InvalidTransition {
                from: ReportStatus::Draft,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn abandoned_handle_still_completes() {
        let mut fx = fixture(Arc::new(MockProvider::new()), Duration::from_secs(5));
        let id = submitted(&fx.store, "some content").await;
        let handle = fx.orchestrator.schedule_analysis(id).await.unwrap();
        let analysis_id = handle.analysis_id();
        drop(handle);

        let message = fx.completions.recv().await.unwrap();
        assert_eq!(message.analysis_id, analysis_id);
        let row = fx.store.get_analysis(analysis_id).await.unwrap();
        assert!(row.is_final());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn distinct_reports_schedule_in_parallel() {
        let provider = Arc::new(SlowProbeProvider {
            probe: Duration::from_millis(300),
            hold: None,
        });
        let fx = fixture(provider, Duration::from_secs(5));
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(submitted(&fx.store, "content").await);
        }
        let orchestrator = Arc::new(fx.orchestrator);

        let started = Instant::now();
        let tasks = ids.iter().map(|&id| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.schedule_analysis(id).await })
        });
        for scheduled in futures::future::join_all(tasks).await {
            scheduled.unwrap().unwrap();
        }

        let elapsed = started.elapsed();
        assert!(
            elapsed < Duration::from_millis(900),
            "4 reports took {:?} to schedule",
            elapsed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_schedules_for_one_report_share_a_call() {
        let provider = Arc::new(SlowProbeProvider {
            probe: Duration::from_millis(50),
            hold: Some(Notify::new()),
        });
        let fx = fixture(provider.clone(), Duration::from_secs(5));
        let id = submitted(&fx.store, "content").await;
        let orchestrator = Arc::new(fx.orchestrator);

        let a = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.schedule_analysis(id).await }
        });
        let b = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.schedule_analysis(id).await }
        });
        let mut a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(a.analysis_id(), b.analysis_id());
        assert_eq!(fx.store.analysis_count(id).await, 1);

        if let Some(hold) = &provider.hold {
            hold.notify_one();
        }
        assert!(a.wait(Duration::from_secs(5)).await.is_some());
    }

    #[tokio::test]
    async fn slot_is_free_before_completion_is_delivered() {
        let (publisher, completions) = analysis_channel(1);
        // Fill the channel so the completion publish has to wait.
        let filler = AnalysisCompleted {
            analysis_id: AnalysisId(999),
            report_id: ReportId(999),
        };
        publisher.publish(filler).await;
        let mut fx = fixture_with_publisher(
            Arc::new(MockProvider::new()),
            Duration::from_secs(5),
            (publisher, completions),
        );
        let id = submitted(&fx.store, "content").await;

        let handle = fx.orchestrator.schedule_analysis(id).await.unwrap();
        let mut freed = false;
        for _ in 0..200 {
            if !fx.orchestrator.is_in_flight(id).await {
                freed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(freed, "in-flight slot held while the completion was undelivered");
        assert!(fx.store.get_analysis(handle.analysis_id()).await.unwrap().is_final());

        assert_eq!(fx.completions.recv().await.unwrap(), filler);
        assert_eq!(
            fx.completions.recv().await.unwrap().analysis_id,
            handle.analysis_id()
        );
    }

    #[tokio::test]
    async fn sweep_fails_stale_pending_rows() {
        let mut fx = fixture(Arc::new(MockProvider::new()), Duration::from_secs(5));
        let row = fx.store.create_pending(ReportId(1), "mock").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let swept = fx.orchestrator.sweep_stuck(Duration::ZERO).await.unwrap();
        assert_eq!(swept, vec![row.id]);
        let row = fx.store.get_analysis(row.id).await.unwrap();
        assert_eq!(row.status, AnalysisStatus::Failed);
        assert!(row.narrative.contains("stuck"));
        assert_eq!(fx.completions.recv().await.unwrap().analysis_id, row.id);

        assert!(fx.orchestrator.sweep_stuck(Duration::ZERO).await.unwrap().is_empty());
    }
}
