//! Dynamic pricing for the dispatch system.
//!
//! Surge multipliers are a pure function of live demand and supply counts
//! plus the ride tier; [`SurgeService`] adds the short-lived count cache.
//! Fare estimation combines the tier rate tables with the current surge.

use thiserror::Error;

pub mod fare;
pub mod surge;

pub use fare::{FareEstimate, FareEstimator};
pub use surge::{compute_multiplier, DemandSource, SurgeQuote, SurgeService};

/// Errors from pricing computations.
#[derive(Debug, Error)]
pub enum PricingError {
	/// The demand count could not be computed.
	#[error("demand source error: {0}")]
	Demand(String),
	/// The supply count could not be computed.
	#[error("supply source error: {0}")]
	Supply(String),
	/// The location could not be bucketed.
	#[error("location bucketing error: {0}")]
	Bucketing(String),
}
