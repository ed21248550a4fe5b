//! Driver-side records: location fixes, nearby-query results, and the
//! metrics profile consulted by ranking.

use crate::{DriverId, GeoPoint, TenantId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time position fix for one driver.
///
/// Superseded, never merged, by each newer fix. Only the most recent fix
/// within the freshness window counts as current.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLocation {
	pub driver_id: DriverId,
	pub tenant: TenantId,
	pub position: GeoPoint,
	pub bearing: Option<f64>,
	pub speed_kmh: Option<f64>,
	pub accuracy_m: Option<f64>,
	pub recorded_at: DateTime<Utc>,
}

impl DriverLocation {
	pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
		now - self.recorded_at <= window
	}
}

/// One row of a nearby-drivers query, ordered ascending by distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyDriver {
	pub driver_id: DriverId,
	pub distance_km: f64,
	pub position: GeoPoint,
	pub bearing: Option<f64>,
	pub speed_kmh: Option<f64>,
	pub last_update: DateTime<Utc>,
}

/// Driver identity and rating, persisted in the transactional store by the
/// account system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverProfile {
	pub driver_id: DriverId,
	pub tenant: TenantId,
	pub user_id: UserId,
	/// 0.0 ..= 5.0 star rating.
	pub rating: f64,
}

/// Lifetime offer counters for one driver.
///
/// These live as storage-level atomic counters, never as fields updated by
/// read-modify-write, so concurrent offer creation cannot lose updates.
/// This struct is the assembled read-side view.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DriverMetrics {
	pub total_offers: i64,
	pub accepted_offers: i64,
}

impl DriverMetrics {
	/// Lifetime offer acceptance rate as a percentage. Drivers with no
	/// offer history rank as fully accepting, as the original system did.
	pub fn acceptance_rate(&self) -> f64 {
		if self.total_offers <= 0 {
			return 100.0;
		}
		(self.accepted_offers as f64 / self.total_offers as f64 * 100.0 * 100.0).round() / 100.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn acceptance_rate_defaults_to_full() {
		let metrics = DriverMetrics::default();
		assert_eq!(metrics.acceptance_rate(), 100.0);
	}

	#[test]
	fn acceptance_rate_rounds_to_two_decimals() {
		let metrics = DriverMetrics {
			total_offers: 3,
			accepted_offers: 2,
		};
		assert_eq!(metrics.acceptance_rate(), 66.67);
	}

	#[test]
	fn freshness_window() {
		let now = Utc::now();
		let fix = DriverLocation {
			driver_id: DriverId::from("d1"),
			tenant: TenantId::from("acme"),
			position: GeoPoint::new(40.7128, -74.0060).unwrap(),
			bearing: None,
			speed_kmh: None,
			accuracy_m: None,
			recorded_at: now - Duration::minutes(4),
		};
		assert!(fix.is_fresh(Duration::minutes(5), now));
		assert!(!fix.is_fresh(Duration::minutes(3), now));
	}
}
