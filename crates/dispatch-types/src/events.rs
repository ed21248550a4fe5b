//! Event definitions and the broadcast bus services publish them on.
//!
//! Events are observability and real-time-subscriber signals, not the source
//! of truth: every publish is best-effort and correctness never depends on a
//! subscriber seeing one.

use crate::{DriverId, GeoPoint, OfferId, RideId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchEvent {
	Location(LocationEvent),
	Ride(RideEvent),
	Offer(OfferEvent),
}

/// Location-store changes, scoped by tenant and driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LocationEvent {
	Updated {
		tenant: TenantId,
		driver_id: DriverId,
		position: GeoPoint,
		recorded_at: DateTime<Utc>,
	},
	Removed {
		tenant: TenantId,
		driver_id: DriverId,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RideEvent {
	SearchStarted {
		ride_id: RideId,
	},
	NoDriversAvailable {
		ride_id: RideId,
	},
	Accepted {
		ride_id: RideId,
		driver_id: DriverId,
	},
	Cancelled {
		ride_id: RideId,
	},
	Failed {
		ride_id: RideId,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OfferEvent {
	Created {
		offer_id: OfferId,
		ride_id: RideId,
		driver_id: DriverId,
		rank: usize,
	},
	Declined {
		offer_id: OfferId,
		ride_id: RideId,
	},
	Expired {
		offer_id: OfferId,
		ride_id: RideId,
	},
	TimedOut {
		offer_id: OfferId,
		ride_id: RideId,
	},
}

/// Broadcast bus for dispatch events.
///
/// Each subscriber receives its own copy of every event published after it
/// subscribed; when the channel is full the oldest events are dropped.
pub struct EventBus {
	sender: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
		self.sender.subscribe()
	}

	/// Publishes to all current subscribers. Returns an error when nobody
	/// is subscribed, which callers treat as non-fatal.
	pub fn publish(
		&self,
		event: DispatchEvent,
	) -> Result<(), broadcast::error::SendError<DispatchEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}

impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}
