//! In-process event bus.
//!
//! Two bounded channels, each drained by a single listener task:
//!
//! ```text
//! orchestrator ──AnalysisCompleted──▶ gate listener ──NotificationEvent──▶ dispatcher listener
//! ```
//!
//! One consumer per channel keeps delivery FIFO, so "analysis completed"
//! always reaches the dispatcher before the status event for the same
//! analysis, and the gate's save happens before that status event is sent.
//! A full channel applies backpressure to the publisher instead of
//! dropping messages.
//!
//! Listeners stop once every publisher for their channel is dropped, which
//! is how [`BusListeners::join`] drains in-flight work at shutdown.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::gate::{GateOutcome, StatusGate};
use crate::models::{AnalysisId, ReportId};
use crate::notify::{NotificationDispatcher, NotificationEvent};

/// Published once per finalized analysis row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnalysisCompleted {
    pub analysis_id: AnalysisId,
    pub report_id: ReportId,
}

#[derive(Debug, Clone)]
pub struct AnalysisPublisher {
    tx: mpsc::Sender<AnalysisCompleted>,
}

impl AnalysisPublisher {
    pub async fn publish(&self, message: AnalysisCompleted) {
        if self.tx.send(message).await.is_err() {
            tracing::warn!(
                report_id = %message.report_id,
                analysis_id = %message.analysis_id,
                "gate listener stopped; analysis completion not delivered"
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationPublisher {
    tx: mpsc::Sender<NotificationEvent>,
}

impl NotificationPublisher {
    pub async fn publish(&self, event: impl Into<NotificationEvent>) {
        let event = event.into();
        let kind = event.kind();
        if self.tx.send(event).await.is_err() {
            tracing::warn!(%kind, "dispatcher listener stopped; notification dropped");
        }
    }
}

pub fn analysis_channel(capacity: usize) -> (AnalysisPublisher, mpsc::Receiver<AnalysisCompleted>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AnalysisPublisher { tx }, rx)
}

pub fn notification_channel(
    capacity: usize,
) -> (NotificationPublisher, mpsc::Receiver<NotificationEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (NotificationPublisher { tx }, rx)
}

/// Consume analysis completions and let the gate act on each in order.
pub fn spawn_gate_listener(
    gate: Arc<StatusGate>,
    mut rx: mpsc::Receiver<AnalysisCompleted>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match gate.apply_analysis(message).await {
                Ok(GateOutcome::Applied(decision)) => {
                    tracing::debug!(report_id = %message.report_id, status = %decision.status, "gate applied");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        report_id = %message.report_id,
                        analysis_id = %message.analysis_id,
                        error = %e,
                        "gate failed to apply analysis"
                    );
                }
            }
        }
        tracing::debug!("gate listener stopped");
    })
}

/// Dispatch each notification in the order it was published.
pub fn spawn_dispatcher_listener(
    dispatcher: Arc<NotificationDispatcher>,
    mut rx: mpsc::Receiver<NotificationEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            dispatcher.dispatch(&event).await;
        }
        tracing::debug!("dispatcher listener stopped");
    })
}

/// Join handles of the two listener tasks.
pub struct BusListeners {
    gate: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl BusListeners {
    pub fn new(gate: JoinHandle<()>, dispatcher: JoinHandle<()>) -> Self {
        Self { gate, dispatcher }
    }

    /// Wait for both listeners to drain. Publishers must already be dropped.
    pub async fn join(self) {
        if let Err(e) = self.gate.await {
            tracing::error!(error = %e, "gate listener panicked");
        }
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "dispatcher listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ReviewEvent;

    #[tokio::test]
    async fn notification_channel_is_fifo() {
        let (publisher, mut rx) = notification_channel(4);
        for id in 1..=3 {
            publisher
                .publish(ReviewEvent::PendingAdminReview {
                    report_id: ReportId(id),
                })
                .await;
        }
        drop(publisher);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event.report_id().unwrap().0);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn publish_after_listener_stops_does_not_panic() {
        let (publisher, rx) = analysis_channel(1);
        drop(rx);
        publisher
            .publish(AnalysisCompleted {
                analysis_id: AnalysisId(1),
                report_id: ReportId(1),
            })
            .await;
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let (publisher, mut rx) = analysis_channel(0);
        let message = AnalysisCompleted {
            analysis_id: AnalysisId(2),
            report_id: ReportId(9),
        };
        publisher.publish(message).await;
        assert_eq!(rx.recv().await, Some(message));
    }
}
