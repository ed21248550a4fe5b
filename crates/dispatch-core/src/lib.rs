//! Dispatch orchestration core.
//!
//! [`DispatchService`] drives the end-to-end offer workflow: it finds
//! candidates in the location store, ranks them, creates time-boxed offers,
//! and moves the ride and offer state machines forward on driver responses,
//! timeouts, and cancellations. [`DispatchEngine`] wires the services
//! together and runs the background loops (scheduled timeouts, the periodic
//! sweep, history persistence).

use dispatch_types::{OfferId, RideId, TransitionError};
use thiserror::Error;

pub mod demand;
pub mod dispatcher;
pub mod engine;
pub mod persist;
pub mod scheduler;

pub use demand::StorageDemandSource;
pub use dispatcher::{DispatchOutcome, DispatchService, OfferResponse, SweepReport};
pub use engine::{DispatchEngine, DispatchEngineBuilder};
pub use persist::LocationPersistWorker;
pub use scheduler::{ScheduledTask, Scheduler, TokioScheduler};

/// Errors surfaced by the dispatch workflow.
///
/// Business-rule outcomes (`NoDriversAvailable`, `StaleOffer`,
/// `InvalidTransition`) are terminal for the invocation and carry a clear
/// user-facing meaning; `Upstream` is transient infrastructure failure that
/// the caller's retry policy handles.
#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("ride {0} not found")]
	RideNotFound(RideId),

	#[error("offer {0} not found")]
	OfferNotFound(OfferId),

	#[error("no drivers available near the pickup point for ride {0}")]
	NoDriversAvailable(RideId),

	/// The response targets an offer that is no longer open (or is not the
	/// responding driver's). Benign: logged, never shown to the rider.
	#[error("offer {0} is no longer open")]
	StaleOffer(OfferId),

	#[error(transparent)]
	InvalidTransition(#[from] TransitionError),

	#[error("upstream unavailable: {0}")]
	Upstream(String),
}

impl From<dispatch_storage::StorageError> for DispatchError {
	fn from(e: dispatch_storage::StorageError) -> Self {
		DispatchError::Upstream(e.to_string())
	}
}

impl From<dispatch_location::LocationError> for DispatchError {
	fn from(e: dispatch_location::LocationError) -> Self {
		DispatchError::Upstream(e.to_string())
	}
}
