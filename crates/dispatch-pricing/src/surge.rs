//! Surge multiplier computation.
//!
//! [`compute_multiplier`] is a pure function of the demand count, the supply
//! count, and the tier; it carries no hidden state so the breakpoint table
//! is trivially testable. [`SurgeService`] supplies the two counts from live
//! sources and memoizes them per location bucket for a short window.

use crate::PricingError;
use async_trait::async_trait;
use dashmap::DashMap;
use dispatch_location::LocationService;
use dispatch_types::{GeoPoint, TenantId, Tier};
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const MIN_MULTIPLIER: f64 = 1.0;
pub const MAX_MULTIPLIER: f64 = 5.0;

/// Demand/supply ratio breakpoints and the multiplier for each band.
const RATIO_BANDS: [(f64, f64); 6] = [
	(0.5, 1.0),
	(1.0, 1.2),
	(1.5, 1.5),
	(2.0, 2.0),
	(3.0, 2.5),
	(4.0, 3.5),
];

fn ratio_multiplier(ratio: f64) -> f64 {
	for (upper, multiplier) in RATIO_BANDS {
		if ratio < upper {
			return multiplier;
		}
	}
	MAX_MULTIPLIER
}

/// Tier adjustment applied after the ratio mapping.
fn tier_adjustment(tier: Tier) -> f64 {
	match tier {
		Tier::Economy => 0.9,
		Tier::Standard => 1.0,
		Tier::Premium => 1.1,
		Tier::Suv | Tier::Luxury => 1.2,
	}
}

/// Computes the surge multiplier for the given counts and tier.
///
/// No supply with no demand is normal pricing; no supply with any demand is
/// maximum surge. Otherwise the demand/supply ratio maps through the band
/// table, the tier factor applies, and the result clamps to
/// `[1.0, 5.0]` rounded to two decimals.
pub fn compute_multiplier(demand: usize, supply: usize, tier: Tier) -> f64 {
	let base = if supply == 0 {
		if demand == 0 {
			MIN_MULTIPLIER
		} else {
			MAX_MULTIPLIER
		}
	} else {
		ratio_multiplier(demand as f64 / supply as f64)
	};

	let adjusted = (base * tier_adjustment(tier)).clamp(MIN_MULTIPLIER, MAX_MULTIPLIER);
	(adjusted * 100.0).round() / 100.0
}

/// Rider-facing banner for a multiplier.
pub fn banner(multiplier: f64) -> &'static str {
	if multiplier <= MIN_MULTIPLIER {
		"Normal pricing"
	} else if multiplier <= 1.5 {
		"Slightly busy"
	} else if multiplier <= 2.5 {
		"High demand - fares are higher"
	} else if multiplier <= 4.0 {
		"Very high demand - fares are much higher"
	} else {
		"Extreme demand - fares are at maximum"
	}
}

/// Result of a surge computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurgeQuote {
	pub multiplier: f64,
	pub active: bool,
	pub message: String,
}

/// Source of the demand count: active (non-terminal) ride requests near a
/// point.
#[async_trait]
pub trait DemandSource: Send + Sync {
	async fn active_requests_near(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
	) -> Result<usize, PricingError>;
}

#[derive(Clone, Copy)]
struct CachedCounts {
	demand: usize,
	supply: usize,
	fetched_at: Instant,
}

/// Surge pricing engine with a short-lived count cache.
///
/// Demand and supply counts are memoized per (tenant, location bucket) —
/// the bucket being a coarse H3 cell — because nearby requests within the
/// cache window would hit the same stores for the same answer. The tier
/// factor is pure and applied per call.
pub struct SurgeService {
	demand: Arc<dyn DemandSource>,
	locations: Arc<LocationService>,
	radius_km: f64,
	cache_ttl: Duration,
	bucket_resolution: Resolution,
	cache: DashMap<(TenantId, CellIndex), CachedCounts>,
}

impl SurgeService {
	pub fn new(
		demand: Arc<dyn DemandSource>,
		locations: Arc<LocationService>,
		radius_km: f64,
		cache_ttl: Duration,
	) -> Self {
		Self {
			demand,
			locations,
			radius_km,
			cache_ttl,
			// Resolution 6 cells are a few kilometers across, matching the
			// 5km sampling radius.
			bucket_resolution: Resolution::Six,
			cache: DashMap::new(),
		}
	}

	fn bucket(&self, point: GeoPoint) -> Result<CellIndex, PricingError> {
		let latlng = LatLng::new(point.latitude, point.longitude)
			.map_err(|e| PricingError::Bucketing(e.to_string()))?;
		Ok(latlng.to_cell(self.bucket_resolution))
	}

	async fn counts(
		&self,
		tenant: &TenantId,
		point: GeoPoint,
	) -> Result<(usize, usize), PricingError> {
		let bucket = self.bucket(point)?;
		let key = (tenant.clone(), bucket);

		if let Some(cached) = self.cache.get(&key) {
			if cached.fetched_at.elapsed() < self.cache_ttl {
				return Ok((cached.demand, cached.supply));
			}
		}

		let demand = self
			.demand
			.active_requests_near(tenant, point, self.radius_km)
			.await?;
		let supply = self
			.locations
			.count_available(tenant, point, self.radius_km)
			.await
			.map_err(|e| PricingError::Supply(e.to_string()))?;

		debug!(%tenant, demand, supply, "sampled surge counts");
		self.cache.insert(
			key,
			CachedCounts {
				demand,
				supply,
				fetched_at: Instant::now(),
			},
		);
		Ok((demand, supply))
	}

	/// Computes the surge quote for a location and tier.
	pub async fn compute_surge(
		&self,
		tenant: &TenantId,
		point: GeoPoint,
		tier: Tier,
	) -> Result<SurgeQuote, PricingError> {
		let (demand, supply) = self.counts(tenant, point).await?;
		let multiplier = compute_multiplier(demand, supply, tier);
		Ok(SurgeQuote {
			multiplier,
			active: multiplier > MIN_MULTIPLIER,
			message: banner(multiplier).to_string(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dispatch_location::implementations::memory::MemoryGeoCache;
	use dispatch_types::EventBus;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[test]
	fn no_supply_no_demand_is_normal() {
		assert_eq!(compute_multiplier(0, 0, Tier::Standard), 1.0);
	}

	#[test]
	fn no_supply_with_demand_is_maximum() {
		assert_eq!(compute_multiplier(3, 0, Tier::Standard), 5.0);
	}

	#[test]
	fn half_ratio_is_low_surge() {
		// demand 5 / supply 10 = 0.5 → 1.2 before tier adjustment.
		assert_eq!(compute_multiplier(5, 10, Tier::Standard), 1.2);
	}

	#[test]
	fn ratio_bands_map_to_expected_multipliers() {
		let cases = [
			(1, 10, 1.0),
			(7, 10, 1.2),
			(12, 10, 1.5),
			(17, 10, 2.0),
			(25, 10, 2.5),
			(35, 10, 3.5),
			(50, 10, 5.0),
		];
		for (demand, supply, expected) in cases {
			assert_eq!(
				compute_multiplier(demand, supply, Tier::Standard),
				expected,
				"demand={demand} supply={supply}"
			);
		}
	}

	#[test]
	fn tier_adjustment_scales_and_clamps() {
		// 1.2 base: economy shaves it, premium and above raise it.
		assert_eq!(compute_multiplier(5, 10, Tier::Economy), 1.08);
		assert_eq!(compute_multiplier(5, 10, Tier::Premium), 1.32);
		assert_eq!(compute_multiplier(5, 10, Tier::Luxury), 1.44);
		// Economy never dips below the floor...
		assert_eq!(compute_multiplier(0, 10, Tier::Economy), 1.0);
		// ...and luxury never exceeds the ceiling.
		assert_eq!(compute_multiplier(50, 10, Tier::Luxury), 5.0);
	}

	#[test]
	fn banners_track_the_bands() {
		assert_eq!(banner(1.0), "Normal pricing");
		assert_eq!(banner(1.2), "Slightly busy");
		assert_eq!(banner(2.0), "High demand - fares are higher");
		assert_eq!(banner(3.5), "Very high demand - fares are much higher");
		assert_eq!(banner(5.0), "Extreme demand - fares are at maximum");
	}

	struct CountingDemand {
		calls: AtomicUsize,
		demand: usize,
	}

	#[async_trait]
	impl DemandSource for CountingDemand {
		async fn active_requests_near(
			&self,
			_tenant: &TenantId,
			_center: GeoPoint,
			_radius_km: f64,
		) -> Result<usize, PricingError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(self.demand)
		}
	}

	fn locations() -> Arc<LocationService> {
		Arc::new(LocationService::new(
			Box::new(MemoryGeoCache::new(h3o::Resolution::Eight)),
			2,
			chrono::Duration::minutes(5),
			100,
			EventBus::new(16),
		))
	}

	#[tokio::test]
	async fn counts_are_cached_within_the_window() {
		let demand = Arc::new(CountingDemand {
			calls: AtomicUsize::new(0),
			demand: 3,
		});
		let service = SurgeService::new(
			demand.clone(),
			locations(),
			5.0,
			Duration::from_secs(30),
		);

		let tenant = TenantId::from("acme");
		let point = GeoPoint::new(40.7128, -74.0060).unwrap();

		let first = service
			.compute_surge(&tenant, point, Tier::Standard)
			.await
			.unwrap();
		// No drivers online, demand present: maximum surge.
		assert_eq!(first.multiplier, 5.0);
		assert!(first.active);

		service
			.compute_surge(&tenant, point, Tier::Economy)
			.await
			.unwrap();
		assert_eq!(demand.calls.load(Ordering::SeqCst), 1, "second call cached");
	}

	#[tokio::test]
	async fn expired_cache_is_refetched() {
		let demand = Arc::new(CountingDemand {
			calls: AtomicUsize::new(0),
			demand: 0,
		});
		let service = SurgeService::new(
			demand.clone(),
			locations(),
			5.0,
			Duration::from_millis(10),
		);

		let tenant = TenantId::from("acme");
		let point = GeoPoint::new(40.7128, -74.0060).unwrap();

		let quote = service
			.compute_surge(&tenant, point, Tier::Standard)
			.await
			.unwrap();
		assert_eq!(quote.multiplier, 1.0);
		assert!(!quote.active);

		tokio::time::sleep(Duration::from_millis(20)).await;
		service
			.compute_surge(&tenant, point, Tier::Standard)
			.await
			.unwrap();
		assert_eq!(demand.calls.load(Ordering::SeqCst), 2);
	}
}
