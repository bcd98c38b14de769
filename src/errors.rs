//! Typed error hierarchy for the review pipeline.
//!
//! One enum per collaborator boundary plus a top-level `ReviewError`:
//! - `StoreError`: report / analysis persistence failures
//! - `ProviderError`: analysis provider failures (all transient)
//! - `MailError`: mail delivery failures (never fatal to the caller)
//! - `EventError`: notification events rejected at construction
//! - `ConfigError`: unusable configuration
//! - `ReviewError`: what synchronous review actions return to callers

use crate::models::{AnalysisId, ReportId, ReportStatus, ReviewAction};
use thiserror::Error;

/// Errors from the report and analysis stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Report {id} not found")]
    NotFound { id: ReportId },

    #[error("Analysis {id} not found")]
    AnalysisNotFound { id: AnalysisId },

    #[error("Stale write for report {id}: expected version {expected}, found {actual}")]
    Conflict {
        id: ReportId,
        expected: u64,
        actual: u64,
    },

    #[error("Analysis {id} is already finalized")]
    AnalysisFinalized { id: AnalysisId },

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Errors from an analysis provider call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider rate limited")]
    RateLimited,

    #[error("Provider call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Errors from the mail collaborator.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Delivery to {address} failed: {message}")]
    DeliveryFailed { address: String, message: String },
}

/// Errors raised while constructing a notification event.
#[derive(Debug, Error, PartialEq)]
pub enum EventError {
    #[error("Event '{kind}' requires a report id")]
    MissingReportId { kind: &'static str },

    #[error("Event '{kind}' requires field '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

/// Configuration that cannot be used to start the pipeline.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Confidence threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("Worker pool sizing invalid: core={core}, max={max}, queue_depth={queue_depth}")]
    InvalidPool {
        core: usize,
        max: usize,
        queue_depth: usize,
    },

    #[error("Provider call timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Unknown analysis provider '{0}'. Valid values: mock, openai, anthropic")]
    UnknownProvider(String),

    #[error("Unknown mail transport '{0}'. Valid values: log, http")]
    UnknownMailTransport(String),

    #[error("Mail transport 'http' requires mail.endpoint")]
    MissingMailEndpoint,

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Review service must be started inside a Tokio runtime")]
    NoRuntime,
}

/// Errors returned by review operations.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Report {id} not found")]
    ReportNotFound { id: ReportId },

    #[error("Cannot {action} report {id} while it is {from}")]
    InvalidTransition {
        id: ReportId,
        from: ReportStatus,
        action: ReviewAction,
    },

    #[error("Analysis engine unavailable: provider '{provider}' is not reachable")]
    EngineUnavailable { provider: String },

    #[error("A rejection reason is required")]
    EmptyReason,

    #[error("User {user_id} is not the author of report {id}")]
    NotAuthor { id: ReportId, user_id: i64 },

    #[error("Report {id} was modified concurrently; reload and retry")]
    Conflict { id: ReportId },

    #[error("Store error: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for ReviewError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { id } => ReviewError::ReportNotFound { id },
            StoreError::Conflict { id, .. } => ReviewError::Conflict { id },
            other => ReviewError::Store(other),
        }
    }
}
