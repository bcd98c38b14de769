//! Notification events and their delivery.
//!
//! - [`events`]: the event kinds, their audiences and templates
//! - [`directory`]: recipient class → address resolution
//! - [`mail`]: the mail collaborator and its transports
//! - [`dispatcher`]: fan-out of one event to its resolved recipients

pub mod directory;
pub mod dispatcher;
pub mod events;
pub mod mail;

use std::sync::Arc;
use std::time::Duration;

pub use directory::{Recipient, StaticDirectory, UserDirectory};
pub use dispatcher::{DeliverySnapshot, DeliveryStats, DispatchReport, NotificationDispatcher};
pub use events::{Audience, EventKind, EventPayload, NotificationEvent, RecipientClass, ReviewEvent};
pub use mail::{HttpMailer, LogMailer, MailSender};

use crate::config::MailSection;
use crate::errors::ConfigError;

/// Build the configured mail transport.
pub fn mailer_from_config(mail: &MailSection) -> Result<Arc<dyn MailSender>, ConfigError> {
    match mail.transport.as_str() {
        "log" => Ok(Arc::new(LogMailer)),
        "http" => {
            let endpoint = mail
                .endpoint
                .as_deref()
                .ok_or(ConfigError::MissingMailEndpoint)?;
            let mailer = HttpMailer::new(endpoint, Duration::from_secs(mail.timeout_secs))?;
            Ok(Arc::new(mailer))
        }
        other => Err(ConfigError::UnknownMailTransport(other.to_string())),
    }
}
