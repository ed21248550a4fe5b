//! Driver offers and their state machine.
//!
//! An offer is a time-boxed proposal to one driver for one ride. It reaches
//! exactly one terminal state and is never reopened; an `offered` record past
//! its `timeout_at` is stale and must be swept.

use crate::{DriverId, OfferId, RideId, TenantId, TransitionError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How long a driver has to respond to an offer.
pub const OFFER_TIMEOUT_SECS: i64 = 30;

/// Lifecycle state of a driver offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
	Offered,
	Accepted,
	Declined,
	Expired,
	TimedOut,
}

impl OfferStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			OfferStatus::Offered => "offered",
			OfferStatus::Accepted => "accepted",
			OfferStatus::Declined => "declined",
			OfferStatus::Expired => "expired",
			OfferStatus::TimedOut => "timed_out",
		}
	}

	pub fn is_terminal(&self) -> bool {
		!matches!(self, OfferStatus::Offered)
	}
}

impl fmt::Display for OfferStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Command driving the offer state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum OfferCommand {
	Accept,
	Decline { reason: Option<String> },
	/// The offer became moot (ride accepted elsewhere, or cancelled).
	Expire,
	/// The driver never responded within the offer window.
	MarkTimedOut,
}

impl OfferCommand {
	fn name(&self) -> &'static str {
		match self {
			OfferCommand::Accept => "accept",
			OfferCommand::Decline { .. } => "decline",
			OfferCommand::Expire => "expire",
			OfferCommand::MarkTimedOut => "mark_timed_out",
		}
	}
}

/// Side-effect intent emitted by an offer transition.
#[derive(Debug, Clone, PartialEq)]
pub enum OfferEffect {
	StampRespondedAt,
	RecordDeclineReason(Option<String>),
	/// The driver's lifetime acceptance counter should be incremented
	/// atomically at the storage layer.
	CreditDriverAcceptance,
}

/// Result of a valid offer transition.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferTransition {
	pub next: OfferStatus,
	pub effects: Vec<OfferEffect>,
}

impl OfferStatus {
	/// Applies a command. All four terminal commands are valid only from
	/// `offered`; anything else (double-accept, accept-after-decline) is a
	/// conflict.
	pub fn apply(self, command: &OfferCommand) -> Result<OfferTransition, TransitionError> {
		if self != OfferStatus::Offered {
			return Err(TransitionError::Offer {
				from: self,
				command: command.name(),
			});
		}

		let transition = match command {
			OfferCommand::Accept => OfferTransition {
				next: OfferStatus::Accepted,
				effects: vec![
					OfferEffect::StampRespondedAt,
					OfferEffect::CreditDriverAcceptance,
				],
			},
			OfferCommand::Decline { reason } => OfferTransition {
				next: OfferStatus::Declined,
				effects: vec![
					OfferEffect::StampRespondedAt,
					OfferEffect::RecordDeclineReason(reason.clone()),
				],
			},
			OfferCommand::Expire => OfferTransition {
				next: OfferStatus::Expired,
				effects: vec![OfferEffect::StampRespondedAt],
			},
			OfferCommand::MarkTimedOut => OfferTransition {
				next: OfferStatus::TimedOut,
				effects: vec![OfferEffect::StampRespondedAt],
			},
		};

		Ok(transition)
	}
}

/// A time-boxed proposal from the dispatch system to one driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverOffer {
	pub id: OfferId,
	pub ride_id: RideId,
	pub driver_id: DriverId,
	pub tenant: TenantId,
	pub status: OfferStatus,
	pub distance_to_pickup_km: f64,
	pub eta_minutes: u32,
	pub offered_at: DateTime<Utc>,
	pub timeout_at: DateTime<Utc>,
	pub responded_at: Option<DateTime<Utc>>,
	pub decline_reason: Option<String>,
	/// Audit counter; concurrency control is storage compare-and-swap.
	pub version: u64,
}

impl DriverOffer {
	pub fn new(
		ride_id: RideId,
		driver_id: DriverId,
		tenant: TenantId,
		distance_to_pickup_km: f64,
		eta_minutes: u32,
		now: DateTime<Utc>,
		response_window: Duration,
	) -> Self {
		Self {
			id: OfferId::new(),
			ride_id,
			driver_id,
			tenant,
			status: OfferStatus::Offered,
			distance_to_pickup_km,
			eta_minutes,
			offered_at: now,
			timeout_at: now + response_window,
			responded_at: None,
			decline_reason: None,
			version: 0,
		}
	}

	/// Still `offered` but past its response window.
	pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
		self.status == OfferStatus::Offered && now > self.timeout_at
	}

	/// Applies a command to this record, stamping fields per the
	/// transition's effects. Counter-credit intents are returned for the
	/// caller to execute at the storage layer.
	pub fn transition(
		&mut self,
		command: &OfferCommand,
		now: DateTime<Utc>,
	) -> Result<Vec<OfferEffect>, TransitionError> {
		let OfferTransition { next, effects } = self.status.apply(command)?;
		self.status = next;
		self.version += 1;

		let mut remaining = Vec::new();
		for effect in effects {
			match effect {
				OfferEffect::StampRespondedAt => self.responded_at = Some(now),
				OfferEffect::RecordDeclineReason(reason) => self.decline_reason = reason,
				other => remaining.push(other),
			}
		}

		Ok(remaining)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn offer() -> DriverOffer {
		DriverOffer::new(
			RideId::new(),
			DriverId::from("driver-1"),
			TenantId::from("acme"),
			1.4,
			3,
			Utc::now(),
			Duration::seconds(OFFER_TIMEOUT_SECS),
		)
	}

	#[test]
	fn timeout_is_thirty_seconds_after_offer() {
		let offer = offer();
		assert_eq!(
			offer.timeout_at - offer.offered_at,
			Duration::seconds(OFFER_TIMEOUT_SECS)
		);
	}

	#[test]
	fn accept_reaches_terminal_state() {
		let mut offer = offer();
		let effects = offer.transition(&OfferCommand::Accept, Utc::now()).unwrap();
		assert_eq!(offer.status, OfferStatus::Accepted);
		assert!(offer.responded_at.is_some());
		assert_eq!(effects, vec![OfferEffect::CreditDriverAcceptance]);
	}

	#[test]
	fn double_accept_is_a_conflict() {
		let mut offer = offer();
		offer.transition(&OfferCommand::Accept, Utc::now()).unwrap();
		let err = offer
			.transition(&OfferCommand::Accept, Utc::now())
			.unwrap_err();
		assert_eq!(
			err,
			TransitionError::Offer {
				from: OfferStatus::Accepted,
				command: "accept",
			}
		);
	}

	#[test]
	fn accept_after_decline_is_a_conflict() {
		let mut offer = offer();
		offer
			.transition(
				&OfferCommand::Decline {
					reason: Some("too far".to_string()),
				},
				Utc::now(),
			)
			.unwrap();
		assert_eq!(offer.decline_reason.as_deref(), Some("too far"));
		assert!(offer.transition(&OfferCommand::Accept, Utc::now()).is_err());
	}

	#[test]
	fn staleness_tracks_timeout_window() {
		let mut offer = offer();
		assert!(!offer.is_stale(offer.offered_at + Duration::seconds(10)));
		assert!(offer.is_stale(offer.offered_at + Duration::seconds(31)));

		offer
			.transition(&OfferCommand::MarkTimedOut, Utc::now())
			.unwrap();
		assert_eq!(offer.status, OfferStatus::TimedOut);
		assert!(!offer.is_stale(offer.offered_at + Duration::seconds(31)));
	}
}
