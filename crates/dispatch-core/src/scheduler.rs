//! Delayed task execution for offer timeouts and ride backstops.
//!
//! The core does not implement its own timer wheel; it asks a scheduler to
//! deliver a task after a delay and the engine loop executes it. Tests
//! substitute a recording implementation to drive timeouts deterministically.

use dispatch_types::{OfferId, RideId};
use std::time::Duration;
use tokio::sync::mpsc;

/// A delayed task the engine executes when due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledTask {
	/// Sweep one offer that may have passed its response window.
	OfferTimeout(OfferId),
	/// Fail the ride if nothing was accepted within the backstop window.
	RideBackstop(RideId),
}

/// Delayed-execution contract required by the dispatch workflow.
pub trait Scheduler: Send + Sync {
	fn run_after(&self, delay: Duration, task: ScheduledTask);
}

/// Tokio-backed scheduler feeding tasks to the engine loop.
pub struct TokioScheduler {
	tx: mpsc::UnboundedSender<ScheduledTask>,
}

impl TokioScheduler {
	/// Creates the scheduler and the receiver the engine loop drains.
	pub fn new() -> (Self, mpsc::UnboundedReceiver<ScheduledTask>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl Scheduler for TokioScheduler {
	fn run_after(&self, delay: Duration, task: ScheduledTask) {
		let tx = self.tx.clone();
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			// Receiver gone means the engine is shutting down; the periodic
			// sweep covers anything in flight on the next start.
			let _ = tx.send(task);
		});
	}
}
