//! Fare estimation from the tier rate tables and the current surge.

use crate::{PricingError, SurgeService};
use dispatch_matching::eta_minutes;
use dispatch_types::{GeoPoint, TenantId, Tier};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Base fare by tier, in USD.
fn base_fare(tier: Tier) -> Decimal {
	match tier {
		Tier::Economy => Decimal::new(250, 2),
		Tier::Standard => Decimal::new(350, 2),
		Tier::Premium => Decimal::new(500, 2),
		Tier::Suv => Decimal::new(600, 2),
		Tier::Luxury => Decimal::new(1000, 2),
	}
}

/// Per-kilometer rate by tier, in USD.
fn per_km_rate(tier: Tier) -> Decimal {
	match tier {
		Tier::Economy => Decimal::new(100, 2),
		Tier::Standard => Decimal::new(150, 2),
		Tier::Premium => Decimal::new(250, 2),
		Tier::Suv => Decimal::new(300, 2),
		Tier::Luxury => Decimal::new(500, 2),
	}
}

/// An up-front fare estimate shown before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FareEstimate {
	pub distance_km: f64,
	pub duration_min: u32,
	pub surge_multiplier: f64,
	pub estimated_fare: Decimal,
}

/// Pure estimate for a known surge multiplier.
///
/// Same great-circle distance as matching, duration at the assumed city
/// speed, then `(base + per_km × distance) × surge` rounded to cents.
pub fn estimate(
	pickup: GeoPoint,
	dropoff: GeoPoint,
	tier: Tier,
	surge_multiplier: f64,
	average_speed_kmh: f64,
) -> FareEstimate {
	let distance_km = (pickup.distance_km(&dropoff) * 100.0).round() / 100.0;
	let duration_min = eta_minutes(distance_km, average_speed_kmh);

	let distance = Decimal::try_from(distance_km).unwrap_or_default();
	let surge = Decimal::try_from(surge_multiplier).unwrap_or(Decimal::ONE);
	let fare = (base_fare(tier) + per_km_rate(tier) * distance) * surge;

	FareEstimate {
		distance_km,
		duration_min,
		surge_multiplier,
		estimated_fare: fare.round_dp(2),
	}
}

/// Fare estimator wired to the live surge engine.
pub struct FareEstimator {
	surge: Arc<SurgeService>,
	average_speed_kmh: f64,
}

impl FareEstimator {
	pub fn new(surge: Arc<SurgeService>, average_speed_kmh: f64) -> Self {
		Self {
			surge,
			average_speed_kmh,
		}
	}

	/// Estimates the fare between two points at the current surge for the
	/// pickup location.
	pub async fn estimate_fare(
		&self,
		tenant: &TenantId,
		pickup: GeoPoint,
		dropoff: GeoPoint,
		tier: Tier,
	) -> Result<FareEstimate, PricingError> {
		let quote = self.surge.compute_surge(tenant, pickup, tier).await?;
		Ok(estimate(
			pickup,
			dropoff,
			tier,
			quote.multiplier,
			self.average_speed_kmh,
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn point(lat: f64, lng: f64) -> GeoPoint {
		GeoPoint::new(lat, lng).unwrap()
	}

	#[test]
	fn standard_fare_without_surge() {
		// ~5.4 km between these points.
		let estimate = estimate(
			point(40.7128, -74.0060),
			point(40.7580, -73.9855),
			Tier::Standard,
			1.0,
			30.0,
		);
		assert!(estimate.distance_km > 5.0 && estimate.distance_km < 6.0);
		// base 3.50 + 1.50/km.
		let expected = (Decimal::new(350, 2)
			+ Decimal::new(150, 2) * Decimal::try_from(estimate.distance_km).unwrap())
		.round_dp(2);
		assert_eq!(estimate.estimated_fare, expected);
		assert_eq!(estimate.surge_multiplier, 1.0);
	}

	#[test]
	fn surge_scales_the_fare() {
		let pickup = point(40.7128, -74.0060);
		let dropoff = point(40.7580, -73.9855);
		let flat = estimate(pickup, dropoff, Tier::Standard, 1.0, 30.0);
		let surged = estimate(pickup, dropoff, Tier::Standard, 2.0, 30.0);
		assert_eq!(
			surged.estimated_fare,
			(flat.estimated_fare * Decimal::TWO).round_dp(2)
		);
	}

	#[test]
	fn luxury_costs_more_than_economy() {
		let pickup = point(40.7128, -74.0060);
		let dropoff = point(40.7580, -73.9855);
		let economy = estimate(pickup, dropoff, Tier::Economy, 1.0, 30.0);
		let luxury = estimate(pickup, dropoff, Tier::Luxury, 1.0, 30.0);
		assert!(luxury.estimated_fare > economy.estimated_fare);
	}

	#[test]
	fn duration_follows_city_speed() {
		let estimate = estimate(
			point(40.7128, -74.0060),
			point(40.7580, -73.9855),
			Tier::Standard,
			1.0,
			30.0,
		);
		let expected = (estimate.distance_km / 30.0 * 60.0).round() as u32;
		assert_eq!(estimate.duration_min, expected);
	}
}
