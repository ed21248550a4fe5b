//! Geospatial location store for online drivers.
//!
//! Tracks each driver's last known position with a freshness window and
//! answers "who is near this point" queries. The queryable index and the
//! detailed-fix table live behind [`GeoCacheInterface`]; [`LocationService`]
//! layers the write-time rate limit, the bounded recent-history stream for
//! batch persistence, and best-effort location event publishing on top.
//!
//! Location updates are the highest-frequency operation in the system and
//! must never block on dispatch logic; the in-memory implementation uses
//! sharded maps so writers and the dispatch read path do not share a lock.

use async_trait::async_trait;
use chrono::Duration;
use dispatch_types::{DriverId, DriverLocation, GeoError, GeoPoint, NearbyDriver, TenantId};
use thiserror::Error;

pub mod fallback;
pub mod rate_limit;
pub mod service;

/// Re-export implementations
pub mod implementations {
	pub mod memory;
}

pub use fallback::{FallbackLocationSource, StorageFallbackSource};
pub use service::LocationService;

/// Errors from the geospatial store.
#[derive(Debug, Error)]
pub enum LocationError {
	/// Coordinates outside the valid WGS-84 ranges.
	#[error("invalid coordinates: {0}")]
	InvalidCoordinates(#[from] GeoError),
	/// The geospatial backend or fallback source failed.
	#[error("geospatial backend error: {0}")]
	Backend(String),
}

/// Trait defining the low-level geospatial cache contract.
///
/// Implementations keep two structures per tenant: a coarse queryable index
/// (position bucketed by cell) and the detailed fix per driver. Queries must
/// filter out fixes older than `freshness` even when the index still holds
/// the entry.
#[async_trait]
pub trait GeoCacheInterface: Send + Sync {
	/// Upserts a driver's position into the index and fix table. Every new
	/// fix supersedes the previous one.
	async fn upsert(&self, fix: DriverLocation) -> Result<(), LocationError>;

	/// Radius query ordered ascending by distance, at most `limit` rows.
	async fn nearby(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
		limit: usize,
		freshness: Duration,
	) -> Result<Vec<NearbyDriver>, LocationError>;

	/// Count-only variant of [`GeoCacheInterface::nearby`].
	async fn count(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
		freshness: Duration,
	) -> Result<usize, LocationError>;

	/// Evicts a driver from the index and deletes its fix.
	async fn remove(&self, tenant: &TenantId, driver_id: &DriverId) -> Result<(), LocationError>;

	/// Current fix for a driver, if still fresh.
	async fn get(
		&self,
		tenant: &TenantId,
		driver_id: &DriverId,
		freshness: Duration,
	) -> Result<Option<DriverLocation>, LocationError>;
}
