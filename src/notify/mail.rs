//! Mail delivery collaborators.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{ConfigError, MailError};

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(
        &self,
        address: &str,
        template_id: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), MailError>;
}

/// Records deliveries in the log only.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(
        &self,
        address: &str,
        template_id: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), MailError> {
        tracing::info!(
            to = address,
            template = template_id,
            vars = ?variables,
            "mail delivered (log transport)"
        );
        Ok(())
    }
}

/// Posts each delivery as JSON to a mail relay.
pub struct HttpMailer {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    delivery_id: Uuid,
    to: &'a str,
    template_id: &'a str,
    variables: &'a BTreeMap<String, String>,
}

impl HttpMailer {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl MailSender for HttpMailer {
    async fn send(
        &self,
        address: &str,
        template_id: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), MailError> {
        let failed = |message: String| MailError::DeliveryFailed {
            address: address.to_string(),
            message,
        };

        let body = RelayRequest {
            delivery_id: Uuid::new_v4(),
            to: address,
            template_id,
            variables,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("relay returned HTTP {}", response.status())));
        }
        Ok(())
    }
}
