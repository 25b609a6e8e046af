//! Violation Webhook
//!
//! Delivers each violation event as a JSON POST. One attempt per event;
//! failures are counted by the dispatcher and logged.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error};

use warden_policy_engine::decision::{Notifier, NotifyError, ViolationEvent};

pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, event: &ViolationEvent) -> Result<(), NotifyError> {
        debug!(url = %self.url, uid = %event.request_uid, "Posting violation event");

        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            error!(status, uid = %event.request_uid, "Violation webhook rejected event");
            return Err(NotifyError::Rejected { status });
        }

        Ok(())
    }
}
