//! Shared types for the ride dispatch system.
//!
//! This crate defines the domain model used by every other crate in the
//! workspace: identifiers, geographic primitives, the ride and offer state
//! machines, driver records, and the event bus that services use to
//! broadcast state changes.

pub mod common;
pub mod driver;
pub mod errors;
pub mod events;
pub mod geo;
pub mod offer;
pub mod ride;

pub use common::*;
pub use driver::*;
pub use errors::*;
pub use events::*;
pub use geo::*;
pub use offer::*;
pub use ride::*;
