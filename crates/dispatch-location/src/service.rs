//! High-level location service: rate limiting, history, event publishing.

use crate::rate_limit::RateLimiter;
use crate::{GeoCacheInterface, LocationError};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use dispatch_types::{
	DispatchEvent, DriverId, DriverLocation, EventBus, GeoPoint, LocationEvent, NearbyDriver,
	TenantId,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// Optional attributes of a position fix.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixDetails {
	pub bearing: Option<f64>,
	pub speed_kmh: Option<f64>,
	pub accuracy_m: Option<f64>,
}

/// Location store front door.
///
/// Wraps a geospatial cache backend with the write-time per-driver rate
/// limit, the capped recent-history stream consumed by batch persistence,
/// and best-effort location event publishing. An event publish failure
/// never rolls back the index write; correctness depends only on the index
/// and fix table.
pub struct LocationService {
	cache: Box<dyn GeoCacheInterface>,
	rate_limiter: RateLimiter,
	history: DashMap<TenantId, Mutex<VecDeque<DriverLocation>>>,
	history_capacity: usize,
	freshness: Duration,
	events: EventBus,
}

impl LocationService {
	pub fn new(
		cache: Box<dyn GeoCacheInterface>,
		max_updates_per_second: u32,
		freshness: Duration,
		history_capacity: usize,
		events: EventBus,
	) -> Self {
		Self {
			cache,
			rate_limiter: RateLimiter::new(max_updates_per_second),
			history: DashMap::new(),
			history_capacity,
			freshness,
			events,
		}
	}

	/// Records a new position fix for an online driver.
	///
	/// Returns `Ok(false)` with no state change when the driver exceeded
	/// the update rate; the client retries on its own cadence.
	pub async fn update_location(
		&self,
		tenant: TenantId,
		driver_id: DriverId,
		position: GeoPoint,
		details: FixDetails,
	) -> Result<bool, LocationError> {
		let now = Utc::now();
		if !self
			.rate_limiter
			.admit(&driver_id, now.timestamp() as u64)
		{
			debug!(%tenant, %driver_id, "location update rate limited");
			return Ok(false);
		}

		let fix = DriverLocation {
			driver_id: driver_id.clone(),
			tenant: tenant.clone(),
			position,
			bearing: details.bearing,
			speed_kmh: details.speed_kmh,
			accuracy_m: details.accuracy_m,
			recorded_at: now,
		};

		self.cache.upsert(fix.clone()).await?;
		self.append_history(fix);

		// Best-effort broadcast for real-time subscribers; a failed publish
		// never rolls back the index write.
		let _ = self.events.publish(DispatchEvent::Location(LocationEvent::Updated {
			tenant,
			driver_id,
			position,
			recorded_at: now,
		}));

		Ok(true)
	}

	/// Fresh drivers within `radius_km` of `center`, closest first.
	pub async fn nearby_drivers(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
		limit: usize,
	) -> Result<Vec<NearbyDriver>, LocationError> {
		self.cache
			.nearby(tenant, center, radius_km, limit, self.freshness)
			.await
	}

	/// Count of fresh drivers within `radius_km`, for surge pricing.
	pub async fn count_available(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
	) -> Result<usize, LocationError> {
		self.cache
			.count(tenant, center, radius_km, self.freshness)
			.await
	}

	/// Evicts a driver entirely; used when a driver goes offline.
	pub async fn remove_driver(
		&self,
		tenant: &TenantId,
		driver_id: &DriverId,
	) -> Result<(), LocationError> {
		self.cache.remove(tenant, driver_id).await?;
		let _ = self
			.events
			.publish(DispatchEvent::Location(LocationEvent::Removed {
				tenant: tenant.clone(),
				driver_id: driver_id.clone(),
			}));
		Ok(())
	}

	/// Current fresh fix for one driver.
	pub async fn current_fix(
		&self,
		tenant: &TenantId,
		driver_id: &DriverId,
	) -> Result<Option<DriverLocation>, LocationError> {
		self.cache.get(tenant, driver_id, self.freshness).await
	}

	fn append_history(&self, fix: DriverLocation) {
		let entry = self
			.history
			.entry(fix.tenant.clone())
			.or_insert_with(|| Mutex::new(VecDeque::new()));
		let Ok(mut stream) = entry.lock() else {
			return;
		};
		stream.push_back(fix);
		while stream.len() > self.history_capacity {
			stream.pop_front();
		}
	}

	/// Hands up to `max` of the oldest buffered fixes to the batch
	/// persistence worker, removing them from the stream.
	pub fn drain_history(&self, tenant: &TenantId, max: usize) -> Vec<DriverLocation> {
		let Some(entry) = self.history.get(tenant) else {
			return Vec::new();
		};
		let Ok(mut stream) = entry.lock() else {
			return Vec::new();
		};
		let take = max.min(stream.len());
		stream.drain(..take).collect()
	}

	/// Tenants that currently have buffered history.
	pub fn tenants_with_history(&self) -> Vec<TenantId> {
		self.history
			.iter()
			.filter(|entry| entry.value().lock().map(|s| !s.is_empty()).unwrap_or(false))
			.map(|entry| entry.key().clone())
			.collect()
	}
}
