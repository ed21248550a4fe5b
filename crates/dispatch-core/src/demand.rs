//! Demand counting for surge pricing.

use crate::dispatcher::RIDES_NAMESPACE;
use async_trait::async_trait;
use dispatch_pricing::{DemandSource, PricingError};
use dispatch_storage::StorageService;
use dispatch_types::{GeoPoint, RideRequest, TenantId};
use std::sync::Arc;

/// Demand source backed by the ride records in the transactional store:
/// active (non-terminal) ride requests whose pickup is within the radius.
pub struct StorageDemandSource {
	storage: Arc<StorageService>,
}

impl StorageDemandSource {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}
}

#[async_trait]
impl DemandSource for StorageDemandSource {
	async fn active_requests_near(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
	) -> Result<usize, PricingError> {
		let rides: Vec<RideRequest> = self
			.storage
			.retrieve_all(RIDES_NAMESPACE)
			.await
			.map_err(|e| PricingError::Demand(e.to_string()))?;

		Ok(rides
			.iter()
			.filter(|ride| &ride.tenant == tenant)
			.filter(|ride| ride.status.is_active())
			.filter(|ride| center.distance_km(&ride.pickup) <= radius_km)
			.count())
	}
}
