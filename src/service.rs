//! Review service: the pipeline wired together from configuration.
//!
//! [`ReviewService::start`] builds every component, spawns the bus
//! listeners and hands back one object exposing the review operations.
//! [`ReviewService::shutdown`] drops the publishers and waits for queued
//! analyses and notifications to drain.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::analysis::{AnalysisProvider, select_provider};
use crate::bus::{
    self, AnalysisCompleted, BusListeners, NotificationPublisher, spawn_dispatcher_listener,
    spawn_gate_listener,
};
use crate::config::GateConfig;
use crate::errors::{ConfigError, ReviewError};
use crate::gate::{GateOutcome, StatusGate};
use crate::models::{
    AnalysisId, AnalysisResult, NewReport, RejectedBy, Report, ReportId, ReportStatus,
    ReviewAction, Reviewer, UserId,
};
use crate::notify::{
    DeliverySnapshot, DeliveryStats, MailSender, NotificationDispatcher, ReviewEvent,
    StaticDirectory, UserDirectory, mailer_from_config,
};
use crate::orchestrator::{AnalysisHandle, AnalysisOrchestrator, OrchestratorParts};
use crate::store::{AnalysisStore, ReportStore};

/// A report together with the analysis it currently points at.
#[derive(Debug, Clone, Serialize)]
pub struct ReportView {
    pub report: Report,
    pub analysis: Option<AnalysisResult>,
}

/// Collaborators that are not derived from configuration.
pub struct Collaborators {
    pub reports: Arc<dyn ReportStore>,
    pub analyses: Arc<dyn AnalysisStore>,
    pub provider: Arc<dyn AnalysisProvider>,
    pub directory: Arc<dyn UserDirectory>,
    pub mailer: Arc<dyn MailSender>,
}

pub struct ReviewService {
    reports: Arc<dyn ReportStore>,
    analyses: Arc<dyn AnalysisStore>,
    gate: Arc<StatusGate>,
    orchestrator: AnalysisOrchestrator,
    notifications: NotificationPublisher,
    stats: Arc<DeliveryStats>,
    listeners: BusListeners,
    stuck_after: Duration,
}

impl ReviewService {
    /// Build provider, directory and mailer from `config` and start.
    pub fn start(
        config: &GateConfig,
        reports: Arc<dyn ReportStore>,
        analyses: Arc<dyn AnalysisStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let provider = select_provider(&config.analysis, &config.providers)?;
        let directory = Arc::new(StaticDirectory::new(
            config.directory.users.clone(),
            Arc::clone(&reports),
        ));
        let mailer = mailer_from_config(&config.mail)?;
        Self::start_with(
            config,
            Collaborators {
                reports,
                analyses,
                provider,
                directory,
                mailer,
            },
        )
    }

    /// Start with explicitly supplied collaborators.
    ///
    /// Spawns the worker pool and bus listeners, so it must run inside a
    /// Tokio runtime; outside one it returns [`ConfigError::NoRuntime`].
    pub fn start_with(config: &GateConfig, parts: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ConfigError::NoRuntime);
        }
        let (analysis_tx, analysis_rx) = bus::analysis_channel(config.bus.capacity);
        let (notify_tx, notify_rx) = bus::notification_channel(config.bus.capacity);

        let gate = Arc::new(StatusGate::new(
            Arc::clone(&parts.reports),
            Arc::clone(&parts.analyses),
            config.analysis.confidence_threshold,
            notify_tx.clone(),
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(parts.directory, parts.mailer));
        let stats = dispatcher.stats();

        let orchestrator = AnalysisOrchestrator::new(
            OrchestratorParts {
                reports: Arc::clone(&parts.reports),
                analyses: Arc::clone(&parts.analyses),
                provider: parts.provider,
                gate: Arc::clone(&gate),
                publisher: analysis_tx,
            },
            config.workers,
            config.analysis.timeout(),
        );

        let listeners = BusListeners::new(
            spawn_gate_listener(Arc::clone(&gate), analysis_rx),
            spawn_dispatcher_listener(dispatcher, notify_rx),
        );

        tracing::info!(
            provider = orchestrator.provider_name(),
            threshold = config.analysis.confidence_threshold,
            "review service started"
        );

        Ok(Self {
            reports: parts.reports,
            analyses: parts.analyses,
            gate,
            orchestrator,
            notifications: notify_tx,
            stats,
            listeners,
            stuck_after: config.analysis.stuck_after(),
        })
    }

    pub async fn create(&self, new: NewReport) -> Result<Report, ReviewError> {
        let report = self.reports.insert(new).await?;
        tracing::info!(report_id = %report.id, author_id = %report.author_id, "draft created");
        Ok(report)
    }

    pub async fn report(&self, id: ReportId) -> Result<ReportView, ReviewError> {
        let report = self.reports.get(id).await?;
        let analysis = match report.ai_analysis_id {
            Some(analysis_id) => Some(self.analyses.get_analysis(analysis_id).await?),
            None => self.analyses.latest_for_report(id).await?,
        };
        Ok(ReportView { report, analysis })
    }

    pub async fn analysis(&self, id: AnalysisId) -> Result<AnalysisResult, ReviewError> {
        Ok(self.analyses.get_analysis(id).await?)
    }

    /// Submit a report and schedule its AI review.
    ///
    /// If the engine is unavailable the report stays `Submitted` and the
    /// error is returned; `retry_analysis` picks it up later.
    pub async fn submit_report(
        &self,
        id: ReportId,
        author_id: UserId,
    ) -> Result<AnalysisHandle, ReviewError> {
        self.gate.submit(id, author_id).await?;
        self.orchestrator.schedule_analysis(id).await
    }

    pub async fn approve(&self, id: ReportId, reviewer: Reviewer) -> Result<Report, ReviewError> {
        self.gate.approve(id, reviewer).await
    }

    pub async fn reject(
        &self,
        id: ReportId,
        reviewer: Reviewer,
        reason: &str,
    ) -> Result<Report, ReviewError> {
        self.gate.reject(id, reviewer, reason).await
    }

    pub async fn force_submit(
        &self,
        id: ReportId,
        supervisor_id: UserId,
    ) -> Result<Report, ReviewError> {
        self.gate.force_submit(id, supervisor_id).await
    }

    /// Operator-driven re-run of the AI review.
    ///
    /// Accepts a report the AI gate rejected (it is resubmitted on behalf of
    /// its author) or one left `Submitted` because scheduling failed.
    pub async fn retry_analysis(&self, id: ReportId) -> Result<AnalysisHandle, ReviewError> {
        let report = self.reports.get(id).await?;
        match (report.status, report.rejected_by) {
            (ReportStatus::Rejected, RejectedBy::Ai) => {
                self.gate.submit(id, report.author_id).await?;
            }
            (ReportStatus::Submitted, _) => {}
            (from, _) => {
                return Err(ReviewError::InvalidTransition {
                    id,
                    from,
                    action: ReviewAction::BeginReview,
                });
            }
        }
        tracing::info!(report_id = %id, "retrying AI review");
        self.orchestrator.schedule_analysis(id).await
    }

    /// Re-run the gate for the report's current analysis.
    ///
    /// Re-sends the status mail for an already decided report, and applies
    /// the decision if a completion was never processed.
    pub async fn resend_decision(&self, id: ReportId) -> Result<GateOutcome, ReviewError> {
        let report = self.reports.get(id).await?;
        let Some(analysis_id) = report.ai_analysis_id else {
            return Ok(GateOutcome::Ignored);
        };
        self.gate
            .apply_analysis(AnalysisCompleted {
                analysis_id,
                report_id: id,
            })
            .await
    }

    /// Tell reviewers how many reports wait for them. Sends nothing when
    /// the backlog is empty.
    pub async fn send_pending_digest(&self) -> Result<usize, ReviewError> {
        let pending = self
            .reports
            .list_by_status(ReportStatus::PendingAdminReview)
            .await?
            .len();
        if pending > 0 {
            self.notifications
                .publish(ReviewEvent::ReviewBacklogDigest { pending })
                .await;
        }
        tracing::info!(pending, "review backlog digest");
        Ok(pending)
    }

    /// Fail analyses pending longer than `analysis.stuck_after_secs`.
    pub async fn sweep(&self) -> Result<Vec<AnalysisId>, ReviewError> {
        self.sweep_older_than(self.stuck_after).await
    }

    pub async fn sweep_older_than(&self, max_age: Duration) -> Result<Vec<AnalysisId>, ReviewError> {
        self.orchestrator.sweep_stuck(max_age).await
    }

    pub fn delivery_stats(&self) -> DeliverySnapshot {
        self.stats.snapshot()
    }

    /// Drain running analyses and queued notifications, then stop.
    pub async fn shutdown(self) -> DeliverySnapshot {
        let Self {
            gate,
            orchestrator,
            notifications,
            stats,
            listeners,
            ..
        } = self;
        drop(orchestrator);
        drop(notifications);
        drop(gate);
        listeners.join().await;
        let snapshot = stats.snapshot();
        tracing::info!(
            delivered = snapshot.delivered,
            failed = snapshot.failed,
            "review service stopped"
        );
        snapshot
    }
}
