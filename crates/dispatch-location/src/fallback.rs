//! Secondary geospatial source consulted when the cache comes up empty.
//!
//! The fallback is slower and only correct to the last persisted batch of
//! fixes, but it applies the same freshness window as the cache: a driver
//! whose last persisted fix is older than the window is not a candidate.

use crate::LocationError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dispatch_storage::StorageService;
use dispatch_types::{DriverLocation, GeoPoint, NearbyDriver, TenantId};
use std::sync::Arc;

/// Storage namespace holding the newest persisted fix per driver.
pub const LOCATION_NAMESPACE: &str = "driver_locations";

/// A slower secondary source for nearby-driver queries.
#[async_trait]
pub trait FallbackLocationSource: Send + Sync {
	async fn nearby(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
		limit: usize,
	) -> Result<Vec<NearbyDriver>, LocationError>;
}

/// Fallback backed by the transactional store's persisted fixes, which the
/// history persistence worker keeps current in batches.
pub struct StorageFallbackSource {
	storage: Arc<StorageService>,
	freshness: Duration,
}

impl StorageFallbackSource {
	pub fn new(storage: Arc<StorageService>, freshness: Duration) -> Self {
		Self { storage, freshness }
	}

	/// Key of a driver's persisted fix within [`LOCATION_NAMESPACE`].
	pub fn record_id(tenant: &TenantId, driver_id: &dispatch_types::DriverId) -> String {
		format!("{}:{}", tenant, driver_id)
	}
}

#[async_trait]
impl FallbackLocationSource for StorageFallbackSource {
	async fn nearby(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
		limit: usize,
	) -> Result<Vec<NearbyDriver>, LocationError> {
		let now = Utc::now();
		let fixes: Vec<DriverLocation> = self
			.storage
			.retrieve_all(LOCATION_NAMESPACE)
			.await
			.map_err(|e| LocationError::Backend(e.to_string()))?;

		let mut found: Vec<NearbyDriver> = fixes
			.into_iter()
			.filter(|fix| &fix.tenant == tenant && fix.is_fresh(self.freshness, now))
			.filter_map(|fix| {
				let distance_km = center.distance_km(&fix.position);
				(distance_km <= radius_km).then(|| NearbyDriver {
					driver_id: fix.driver_id,
					distance_km: (distance_km * 100.0).round() / 100.0,
					position: fix.position,
					bearing: fix.bearing,
					speed_kmh: fix.speed_kmh,
					last_update: fix.recorded_at,
				})
			})
			.collect();

		found.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
		found.truncate(limit);
		Ok(found)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dispatch_storage::implementations::memory::MemoryStorage;
	use dispatch_types::DriverId;

	fn fix(tenant: &str, driver: &str, lat: f64, lng: f64, age_min: i64) -> DriverLocation {
		DriverLocation {
			driver_id: DriverId::from(driver),
			tenant: TenantId::from(tenant),
			position: GeoPoint::new(lat, lng).unwrap(),
			bearing: None,
			speed_kmh: None,
			accuracy_m: None,
			recorded_at: Utc::now() - Duration::minutes(age_min),
		}
	}

	#[tokio::test]
	async fn serves_fresh_persisted_fixes_in_distance_order() {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let tenant = TenantId::from("acme");

		for fix in [
			fix("acme", "far", 40.7328, -74.0260, 1),
			fix("acme", "near", 40.7228, -74.0160, 1),
			fix("acme", "stale", 40.7150, -74.0080, 20),
			fix("other", "wrong-tenant", 40.7228, -74.0160, 1),
		] {
			storage
				.store(
					LOCATION_NAMESPACE,
					&StorageFallbackSource::record_id(&fix.tenant, &fix.driver_id),
					&fix,
				)
				.await
				.unwrap();
		}

		let source = StorageFallbackSource::new(storage, Duration::minutes(5));
		let center = GeoPoint::new(40.7128, -74.0060).unwrap();
		let found = source.nearby(&tenant, center, 5.0, 10).await.unwrap();

		let ids: Vec<_> = found.iter().map(|d| d.driver_id.as_str()).collect();
		assert_eq!(ids, vec!["near", "far"]);
	}
}
