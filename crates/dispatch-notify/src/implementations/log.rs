//! Log-only notification backend, the default for local runs and tests.

use crate::{Notification, NotificationInterface, NotifyError};
use async_trait::async_trait;
use tracing::info;

/// Backend that records notifications in the service log instead of
/// delivering them anywhere.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl NotificationInterface for LogNotifier {
	async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
		info!(
			user = %notification.user_id,
			kind = ?notification.kind,
			title = %notification.title,
			"{}",
			notification.body
		);
		Ok(())
	}
}
