//! Error types shared across the dispatch domain model.

use crate::{OfferStatus, RideStatus};
use thiserror::Error;

/// Rejected coordinate input.
#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
	#[error("latitude {0} outside [-90, 90]")]
	InvalidLatitude(f64),
	#[error("longitude {0} outside [-180, 180]")]
	InvalidLongitude(f64),
}

/// A state machine command that is not valid from the current state.
///
/// Double-accepts, accepts after a decline, and similar conflicts surface
/// here rather than silently succeeding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
	#[error("ride cannot `{command}` from `{from}` state")]
	Ride {
		from: RideStatus,
		command: &'static str,
	},
	#[error("offer cannot `{command}` from `{from}` state")]
	Offer {
		from: OfferStatus,
		command: &'static str,
	},
}
