//! Common identifier types used throughout the dispatch system.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a ride request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RideId(uuid::Uuid);

/// Unique identifier for a driver offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferId(uuid::Uuid);

impl RideId {
	pub fn new() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl OfferId {
	pub fn new() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl Default for RideId {
	fn default() -> Self {
		Self::new()
	}
}

impl Default for OfferId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for RideId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl fmt::Display for OfferId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Identifier for a driver, provisioned by the account system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriverId(String);

/// Identifier for a rider or any notifiable user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

/// Identifier for a tenant. Every location and dispatch operation is
/// scoped by tenant; there is no ambient "current tenant" state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

macro_rules! string_id {
	($name:ident) => {
		impl $name {
			pub fn new(value: impl Into<String>) -> Self {
				Self(value.into())
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl From<&str> for $name {
			fn from(value: &str) -> Self {
				Self(value.to_string())
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}
	};
}

string_id!(DriverId);
string_id!(UserId);
string_id!(TenantId);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ride_ids_are_unique() {
		assert_ne!(RideId::new(), RideId::new());
	}

	#[test]
	fn string_ids_round_trip() {
		let driver = DriverId::from("driver-1");
		assert_eq!(driver.as_str(), "driver-1");
		assert_eq!(driver.to_string(), "driver-1");
	}
}
