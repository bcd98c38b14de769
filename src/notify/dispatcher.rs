//! Notification dispatcher.
//!
//! Resolves an event's audience to addresses and fans the mail out:
//! - Recipient classes come from the fixed kind → audience mapping
//! - Addresses are de-duplicated, so one person gets one mail per event
//! - Sends run concurrently and independently; one failure never blocks
//!   or cancels the others
//!
//! Delivery failures are logged and counted. They never propagate back to
//! whatever state transition produced the event.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use serde::Serialize;

use super::directory::{Recipient, UserDirectory};
use super::events::{EventKind, NotificationEvent};
use super::mail::MailSender;

/// Outcome of dispatching a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub kind: EventKind,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Running delivery counters across all dispatched events.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    events: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeliverySnapshot {
    pub events: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl DeliveryStats {
    fn record(&self, report: &DispatchReport) {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            events: self.events.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct NotificationDispatcher {
    directory: Arc<dyn UserDirectory>,
    mailer: Arc<dyn MailSender>,
    stats: Arc<DeliveryStats>,
}

impl NotificationDispatcher {
    pub fn new(directory: Arc<dyn UserDirectory>, mailer: Arc<dyn MailSender>) -> Self {
        Self {
            directory,
            mailer,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    /// Resolve every audience class and drop repeated addresses.
    ///
    /// A class that fails to resolve is skipped; the rest still receive mail.
    pub async fn recipients(&self, event: &NotificationEvent) -> Vec<Recipient> {
        let report_id = event.report_id();
        let mut seen = HashSet::new();
        let mut recipients = Vec::new();

        for class in event.audience().classes() {
            match self.directory.resolve_recipients(*class, report_id).await {
                Ok(resolved) => {
                    for recipient in resolved {
                        if seen.insert(recipient.address.to_lowercase()) {
                            recipients.push(recipient);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        kind = %event.kind(),
                        ?class,
                        error = %e,
                        "failed to resolve recipients"
                    );
                }
            }
        }
        recipients
    }

    pub async fn dispatch(&self, event: &NotificationEvent) -> DispatchReport {
        let kind = event.kind();
        let template_id = kind.template_id();
        let variables = event.template_vars();
        let recipients = self.recipients(event).await;

        let sends = recipients.iter().map(|recipient| {
            let template_id = template_id.as_str();
            let variables = &variables;
            async move {
                let result = self
                    .mailer
                    .send(&recipient.address, template_id, variables)
                    .await;
                if let Err(e) = &result {
                    tracing::warn!(
                        %kind,
                        user_id = %recipient.user_id,
                        error = %e,
                        "notification delivery failed"
                    );
                }
                result.is_ok()
            }
        });
        let outcomes = join_all(sends).await;

        let delivered = outcomes.iter().filter(|ok| **ok).count();
        let report = DispatchReport {
            kind,
            attempted: outcomes.len(),
            delivered,
            failed: outcomes.len() - delivered,
        };
        self.stats.record(&report);

        if report.attempted == 0 {
            tracing::debug!(%kind, report_id = ?event.report_id(), "no recipients for event");
        } else {
            tracing::info!(
                %kind,
                report_id = ?event.report_id(),
                attempted = report.attempted,
                delivered = report.delivered,
                failed = report.failed,
                "notification dispatched"
            );
        }
        report
    }
}
