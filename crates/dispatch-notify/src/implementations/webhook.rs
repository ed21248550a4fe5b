//! Webhook notification backend.
//!
//! Posts each notification as JSON to a configured endpoint, typically a
//! push-gateway bridge run by the platform team.

use crate::{Notification, NotificationInterface, NotifyError};
use async_trait::async_trait;
use std::time::Duration;

/// Backend that POSTs notifications to an HTTP endpoint.
pub struct WebhookNotifier {
	endpoint: String,
	client: reqwest::Client,
}

impl WebhookNotifier {
	pub fn new(endpoint: impl Into<String>) -> Self {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(5))
			.build()
			.unwrap_or_default();
		Self {
			endpoint: endpoint.into(),
			client,
		}
	}
}

#[async_trait]
impl NotificationInterface for WebhookNotifier {
	async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
		let response = self
			.client
			.post(&self.endpoint)
			.json(notification)
			.send()
			.await
			.map_err(|e| NotifyError::Backend(e.to_string()))?;

		if !response.status().is_success() {
			return Err(NotifyError::Backend(format!(
				"endpoint returned {}",
				response.status()
			)));
		}
		Ok(())
	}
}
