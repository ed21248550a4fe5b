//! Notification sink for riders and drivers.
//!
//! The dispatch core fires notifications and never awaits delivery
//! confirmation: transport (push, SMS, email) is an external collaborator
//! behind [`NotificationInterface`]. [`NotificationService`] fans a
//! notification out to every registered backend on detached tasks and logs
//! failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Re-export implementations
pub mod implementations {
	pub mod log;
	pub mod webhook;
}

use dispatch_types::UserId;

/// Errors that can occur while handing a notification to a backend.
#[derive(Debug, Error)]
pub enum NotifyError {
	#[error("delivery backend error: {0}")]
	Backend(String),
}

/// Well-known notification kinds sent by the dispatch workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
	RideOffer,
	DriverAssigned,
	RideCancelled,
	NoDriversAvailable,
	MatchingTimeout,
}

/// A single notification addressed to one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
	pub user_id: UserId,
	pub kind: NotificationKind,
	pub title: String,
	pub body: String,
	/// Structured payload for the client app (ride id, offer id, ...).
	pub data: Value,
}

/// Trait defining the transport contract for notification backends.
#[async_trait]
pub trait NotificationInterface: Send + Sync {
	async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Fire-and-forget notification dispatcher.
pub struct NotificationService {
	backends: Vec<Arc<dyn NotificationInterface>>,
}

impl NotificationService {
	pub fn new(backends: Vec<Arc<dyn NotificationInterface>>) -> Self {
		Self { backends }
	}

	/// Sends a notification without awaiting delivery.
	///
	/// Each backend runs on its own task; failures are logged and never
	/// propagate back into the dispatch workflow.
	pub fn send(&self, notification: Notification) {
		for backend in &self.backends {
			let backend = backend.clone();
			let notification = notification.clone();
			tokio::spawn(async move {
				if let Err(e) = backend.notify(&notification).await {
					warn!(
						user = %notification.user_id,
						kind = ?notification.kind,
						"notification delivery failed: {e}"
					);
				}
			});
		}
	}
}
