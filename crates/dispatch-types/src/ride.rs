//! Ride requests and their state machine.
//!
//! Transitions are pure: [`RideStatus::apply`] returns the next state plus a
//! list of side-effect intents (timestamp stamping, driver binding, rider
//! notification) that the caller executes. The record itself is only mutated
//! through [`RideRequest::transition`], which runs the same pure function and
//! then applies the storage-visible effects.

use crate::{DriverId, GeoPoint, RideId, TenantId, TransitionError, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Service class of a ride, affecting pricing and driver eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
	Economy,
	#[default]
	Standard,
	Premium,
	Suv,
	Luxury,
}

impl Tier {
	pub fn as_str(&self) -> &'static str {
		match self {
			Tier::Economy => "economy",
			Tier::Standard => "standard",
			Tier::Premium => "premium",
			Tier::Suv => "suv",
			Tier::Luxury => "luxury",
		}
	}
}

impl fmt::Display for Tier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Dispatch state of a ride request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
	Requested,
	Searching,
	Accepted,
	DriverArrived,
	InProgress,
	Completed,
	Cancelled,
	Failed,
}

impl RideStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			RideStatus::Requested => "requested",
			RideStatus::Searching => "searching",
			RideStatus::Accepted => "accepted",
			RideStatus::DriverArrived => "driver_arrived",
			RideStatus::InProgress => "in_progress",
			RideStatus::Completed => "completed",
			RideStatus::Cancelled => "cancelled",
			RideStatus::Failed => "failed",
		}
	}

	/// Non-terminal states, counted as demand by surge pricing.
	pub fn is_active(&self) -> bool {
		!matches!(
			self,
			RideStatus::Completed | RideStatus::Cancelled | RideStatus::Failed
		)
	}

	pub fn is_terminal(&self) -> bool {
		!self.is_active()
	}
}

impl fmt::Display for RideStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Who requested a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
	Rider,
	Driver,
	System,
}

/// Command driving the ride state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum RideCommand {
	StartSearching,
	Accept { driver: DriverId },
	MarkDriverArrived,
	Start,
	Complete,
	Cancel { by: CancelledBy },
	Fail,
}

impl RideCommand {
	fn name(&self) -> &'static str {
		match self {
			RideCommand::StartSearching => "start_searching",
			RideCommand::Accept { .. } => "accept",
			RideCommand::MarkDriverArrived => "mark_driver_arrived",
			RideCommand::Start => "start",
			RideCommand::Complete => "complete",
			RideCommand::Cancel { .. } => "cancel",
			RideCommand::Fail => "fail",
		}
	}
}

/// Timestamp fields a transition asks the caller to stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideStamp {
	AcceptedAt,
	DriverArrivedAt,
	StartedAt,
	CompletedAt,
	CancelledAt,
}

/// Rider-facing notification a transition asks the caller to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideNotice {
	DriverAssigned,
	RideCancelled,
	NoDriverFound,
}

/// Side-effect intent emitted by a ride transition.
///
/// The state machine never performs I/O; callers interpret these.
#[derive(Debug, Clone, PartialEq)]
pub enum RideEffect {
	Stamp(RideStamp),
	BindDriver(DriverId),
	RecordCancelledBy(CancelledBy),
	/// All outstanding `offered` offers for this ride are moot.
	ReleaseOpenOffers,
	NotifyRider(RideNotice),
}

/// Result of a valid ride transition.
#[derive(Debug, Clone, PartialEq)]
pub struct RideTransition {
	pub next: RideStatus,
	pub effects: Vec<RideEffect>,
}

impl RideStatus {
	/// Applies a command, returning the next state and its effect intents.
	///
	/// `StartSearching` on an already-`searching` ride is a permitted no-op
	/// so that dispatch re-entry stays idempotent. Every other command is
	/// valid from exactly the states listed here; anything else is a
	/// conflict.
	pub fn apply(self, command: &RideCommand) -> Result<RideTransition, TransitionError> {
		use RideStatus::*;

		let transition = match (self, command) {
			(Requested, RideCommand::StartSearching) => RideTransition {
				next: Searching,
				effects: vec![],
			},
			(Searching, RideCommand::StartSearching) => RideTransition {
				next: Searching,
				effects: vec![],
			},
			(Searching, RideCommand::Accept { driver }) => RideTransition {
				next: Accepted,
				effects: vec![
					RideEffect::BindDriver(driver.clone()),
					RideEffect::Stamp(RideStamp::AcceptedAt),
					RideEffect::ReleaseOpenOffers,
					RideEffect::NotifyRider(RideNotice::DriverAssigned),
				],
			},
			(Accepted, RideCommand::MarkDriverArrived) => RideTransition {
				next: DriverArrived,
				effects: vec![RideEffect::Stamp(RideStamp::DriverArrivedAt)],
			},
			(DriverArrived, RideCommand::Start) => RideTransition {
				next: InProgress,
				effects: vec![RideEffect::Stamp(RideStamp::StartedAt)],
			},
			(InProgress, RideCommand::Complete) => RideTransition {
				next: Completed,
				effects: vec![RideEffect::Stamp(RideStamp::CompletedAt)],
			},
			(Requested | Searching | Accepted | DriverArrived, RideCommand::Cancel { by }) => {
				RideTransition {
					next: Cancelled,
					effects: vec![
						RideEffect::Stamp(RideStamp::CancelledAt),
						RideEffect::RecordCancelledBy(*by),
						RideEffect::ReleaseOpenOffers,
						RideEffect::NotifyRider(RideNotice::RideCancelled),
					],
				}
			}
			(Requested | Searching | Accepted, RideCommand::Fail) => RideTransition {
				next: Failed,
				effects: vec![
					RideEffect::ReleaseOpenOffers,
					RideEffect::NotifyRider(RideNotice::NoDriverFound),
				],
			},
			(from, command) => {
				return Err(TransitionError::Ride {
					from,
					command: command.name(),
				})
			}
		};

		Ok(transition)
	}
}

/// A rider's request for a ride.
///
/// Created by the ride inflow, mutated only through guarded transitions,
/// archived (never deleted) once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequest {
	pub id: RideId,
	pub tenant: TenantId,
	pub rider_id: UserId,
	pub pickup: GeoPoint,
	pub dropoff: GeoPoint,
	pub tier: Tier,
	pub status: RideStatus,
	/// Surge multiplier captured at request time.
	pub surge_multiplier: f64,
	pub estimated_distance_km: Option<f64>,
	pub estimated_duration_min: Option<u32>,
	pub driver_id: Option<DriverId>,
	pub requested_at: DateTime<Utc>,
	/// Deadline for the whole search, stamped when searching begins.
	pub search_deadline: Option<DateTime<Utc>>,
	pub accepted_at: Option<DateTime<Utc>>,
	pub driver_arrived_at: Option<DateTime<Utc>>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub cancelled_at: Option<DateTime<Utc>>,
	pub cancelled_by: Option<CancelledBy>,
	/// Bumped on every applied transition; audit only, concurrency control
	/// is the storage layer's compare-and-swap.
	pub version: u64,
}

impl RideRequest {
	pub fn new(
		tenant: TenantId,
		rider_id: UserId,
		pickup: GeoPoint,
		dropoff: GeoPoint,
		tier: Tier,
		surge_multiplier: f64,
	) -> Self {
		Self {
			id: RideId::new(),
			tenant,
			rider_id,
			pickup,
			dropoff,
			tier,
			status: RideStatus::Requested,
			surge_multiplier,
			estimated_distance_km: None,
			estimated_duration_min: None,
			driver_id: None,
			requested_at: Utc::now(),
			search_deadline: None,
			accepted_at: None,
			driver_arrived_at: None,
			started_at: None,
			completed_at: None,
			cancelled_at: None,
			cancelled_by: None,
			version: 0,
		}
	}

	pub fn can_cancel(&self) -> bool {
		matches!(
			self.status,
			RideStatus::Requested
				| RideStatus::Searching
				| RideStatus::Accepted
				| RideStatus::DriverArrived
		)
	}

	/// Applies a command to this record, stamping timestamps and binding the
	/// driver as the transition's effects dictate. Notification and offer
	/// release intents are returned for the caller to execute.
	pub fn transition(
		&mut self,
		command: &RideCommand,
		now: DateTime<Utc>,
	) -> Result<Vec<RideEffect>, TransitionError> {
		let RideTransition { next, effects } = self.status.apply(command)?;
		self.status = next;
		self.version += 1;

		let mut remaining = Vec::new();
		for effect in effects {
			match effect {
				RideEffect::Stamp(stamp) => {
					let field = match stamp {
						RideStamp::AcceptedAt => &mut self.accepted_at,
						RideStamp::DriverArrivedAt => &mut self.driver_arrived_at,
						RideStamp::StartedAt => &mut self.started_at,
						RideStamp::CompletedAt => &mut self.completed_at,
						RideStamp::CancelledAt => &mut self.cancelled_at,
					};
					*field = Some(now);
				}
				RideEffect::BindDriver(driver) => self.driver_id = Some(driver),
				RideEffect::RecordCancelledBy(by) => self.cancelled_by = Some(by),
				other => remaining.push(other),
			}
		}

		Ok(remaining)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ride() -> RideRequest {
		RideRequest::new(
			TenantId::from("acme"),
			UserId::from("rider-1"),
			GeoPoint::new(40.7128, -74.0060).unwrap(),
			GeoPoint::new(40.7580, -73.9855).unwrap(),
			Tier::Standard,
			1.0,
		)
	}

	#[test]
	fn happy_path_transitions() {
		let mut ride = ride();
		let now = Utc::now();
		ride.transition(&RideCommand::StartSearching, now).unwrap();
		assert_eq!(ride.status, RideStatus::Searching);

		let driver = DriverId::from("driver-1");
		let effects = ride
			.transition(
				&RideCommand::Accept {
					driver: driver.clone(),
				},
				now,
			)
			.unwrap();
		assert_eq!(ride.status, RideStatus::Accepted);
		assert_eq!(ride.driver_id, Some(driver));
		assert_eq!(ride.accepted_at, Some(now));
		assert!(effects.contains(&RideEffect::ReleaseOpenOffers));

		ride.transition(&RideCommand::MarkDriverArrived, now).unwrap();
		ride.transition(&RideCommand::Start, now).unwrap();
		ride.transition(&RideCommand::Complete, now).unwrap();
		assert_eq!(ride.status, RideStatus::Completed);
		assert!(ride.status.is_terminal());
	}

	#[test]
	fn start_searching_is_idempotent() {
		let mut ride = ride();
		let now = Utc::now();
		ride.transition(&RideCommand::StartSearching, now).unwrap();
		let version = ride.version;
		ride.transition(&RideCommand::StartSearching, now).unwrap();
		assert_eq!(ride.status, RideStatus::Searching);
		assert_eq!(ride.version, version + 1);
	}

	#[test]
	fn accept_requires_searching() {
		let command = RideCommand::Accept {
			driver: DriverId::from("driver-1"),
		};
		let err = RideStatus::Requested.apply(&command).unwrap_err();
		assert_eq!(
			err,
			TransitionError::Ride {
				from: RideStatus::Requested,
				command: "accept",
			}
		);
		assert!(RideStatus::Cancelled.apply(&command).is_err());
		assert!(RideStatus::Accepted.apply(&command).is_err());
	}

	#[test]
	fn cancel_allowed_until_trip_starts() {
		let cancel = RideCommand::Cancel {
			by: CancelledBy::Rider,
		};
		for from in [
			RideStatus::Requested,
			RideStatus::Searching,
			RideStatus::Accepted,
			RideStatus::DriverArrived,
		] {
			assert!(from.apply(&cancel).is_ok(), "cancel from {from}");
		}
		assert!(RideStatus::InProgress.apply(&cancel).is_err());
		assert!(RideStatus::Completed.apply(&cancel).is_err());
	}

	#[test]
	fn fail_not_reachable_from_terminal() {
		assert!(RideStatus::Searching.apply(&RideCommand::Fail).is_ok());
		assert!(RideStatus::Cancelled.apply(&RideCommand::Fail).is_err());
		assert!(RideStatus::Failed.apply(&RideCommand::Fail).is_err());
	}
}
