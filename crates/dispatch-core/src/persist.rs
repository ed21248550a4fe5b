//! Batch persistence of the location history stream.
//!
//! The location store buffers accepted fixes in a capped in-memory stream;
//! this worker periodically drains it and writes the newest fix per driver
//! into the transactional store, which is what the dispatch fallback source
//! reads when the cache has no candidates.

use dispatch_location::{LocationService, StorageFallbackSource};
use dispatch_storage::{StorageError, StorageService};
use dispatch_types::{DriverId, DriverLocation};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// How many fixes to drain per tenant per pass.
const BATCH_SIZE: usize = 500;

pub struct LocationPersistWorker {
	locations: Arc<LocationService>,
	storage: Arc<StorageService>,
}

impl LocationPersistWorker {
	pub fn new(locations: Arc<LocationService>, storage: Arc<StorageService>) -> Self {
		Self { locations, storage }
	}

	/// Drains buffered history and persists the newest fix per driver.
	/// Returns how many driver records were written.
	pub async fn persist_batch(&self) -> Result<usize, StorageError> {
		let mut written = 0;
		for tenant in self.locations.tenants_with_history() {
			let batch = self.locations.drain_history(&tenant, BATCH_SIZE);
			if batch.is_empty() {
				continue;
			}

			// The stream is append-ordered, so the last fix per driver in
			// the batch is the newest.
			let mut newest: HashMap<DriverId, DriverLocation> = HashMap::new();
			for fix in batch {
				newest.insert(fix.driver_id.clone(), fix);
			}

			for (driver_id, fix) in newest {
				self.storage
					.store(
						dispatch_location::fallback::LOCATION_NAMESPACE,
						&StorageFallbackSource::record_id(&tenant, &driver_id),
						&fix,
					)
					.await?;
				written += 1;
			}
			debug!(%tenant, written, "persisted location batch");
		}
		Ok(written)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use dispatch_location::implementations::memory::MemoryGeoCache;
	use dispatch_location::service::FixDetails;
	use dispatch_storage::implementations::memory::MemoryStorage;
	use dispatch_types::{EventBus, GeoPoint, TenantId};
	use h3o::Resolution;

	#[tokio::test]
	async fn persists_newest_fix_per_driver() {
		let locations = Arc::new(LocationService::new(
			Box::new(MemoryGeoCache::new(Resolution::Eight)),
			// Generous limit so both updates land in one second.
			10,
			Duration::minutes(5),
			100,
			EventBus::new(16),
		));
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let tenant = TenantId::from("acme");
		let driver = DriverId::from("d1");

		for (lat, lng) in [(40.7128, -74.0060), (40.7228, -74.0160)] {
			assert!(locations
				.update_location(
					tenant.clone(),
					driver.clone(),
					GeoPoint::new(lat, lng).unwrap(),
					FixDetails::default(),
				)
				.await
				.unwrap());
		}

		let worker = LocationPersistWorker::new(locations.clone(), storage.clone());
		assert_eq!(worker.persist_batch().await.unwrap(), 1);

		let persisted: DriverLocation = storage
			.retrieve(
				dispatch_location::fallback::LOCATION_NAMESPACE,
				&StorageFallbackSource::record_id(&tenant, &driver),
			)
			.await
			.unwrap();
		assert_eq!(persisted.position.latitude, 40.7228);

		// Stream drained; nothing further to persist.
		assert_eq!(worker.persist_batch().await.unwrap(), 0);
	}
}
