//! In-memory geospatial cache backed by an H3 cell index.
//!
//! Positions are bucketed into hexagonal cells at a configurable resolution;
//! radius queries expand a grid disk around the center cell and then filter
//! by exact haversine distance. Stale index entries are dropped lazily
//! during queries rather than eagerly on a timer.

use crate::{GeoCacheInterface, LocationError};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use dispatch_types::{DriverId, DriverLocation, GeoPoint, NearbyDriver, TenantId};
use h3o::{CellIndex, LatLng, Resolution};
use std::collections::HashSet;

/// Average H3 hexagon edge length in kilometers, by resolution.
///
/// Used to size the grid disk for a radius query; the exact distance filter
/// afterwards makes a generous disk harmless.
const AVG_EDGE_KM: [f64; 16] = [
	1107.712591,
	418.676005,
	158.244655,
	59.810857,
	22.606379,
	8.544408,
	3.229482,
	1.220629,
	0.461354,
	0.174375,
	0.065907,
	0.024910,
	0.009415,
	0.003559,
	0.001348,
	0.000509,
];

/// Memory-backed implementation of [`GeoCacheInterface`].
pub struct MemoryGeoCache {
	resolution: Resolution,
	/// Coarse index: which drivers are in which cell.
	cells: DashMap<(TenantId, CellIndex), HashSet<DriverId>>,
	/// Detailed fix per driver.
	fixes: DashMap<(TenantId, DriverId), DriverLocation>,
}

impl MemoryGeoCache {
	pub fn new(resolution: Resolution) -> Self {
		Self {
			resolution,
			cells: DashMap::new(),
			fixes: DashMap::new(),
		}
	}

	fn cell_of(&self, position: GeoPoint) -> Result<CellIndex, LocationError> {
		let latlng = LatLng::new(position.latitude, position.longitude)
			.map_err(|e| LocationError::Backend(e.to_string()))?;
		Ok(latlng.to_cell(self.resolution))
	}

	/// Number of rings needed for a grid disk to cover `radius_km`.
	fn disk_size(&self, radius_km: f64) -> u32 {
		let edge = AVG_EDGE_KM[usize::from(u8::from(self.resolution))];
		(radius_km / (edge * 1.5)).ceil() as u32 + 1
	}

	fn drop_from_cell(&self, tenant: &TenantId, cell: CellIndex, driver_id: &DriverId) {
		if let Some(mut members) = self.cells.get_mut(&(tenant.clone(), cell)) {
			members.remove(driver_id);
		}
	}

	/// Fresh candidates within the radius, ascending by distance, unbounded.
	fn scan(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
		freshness: Duration,
	) -> Result<Vec<NearbyDriver>, LocationError> {
		let now = Utc::now();
		let origin = self.cell_of(center)?;
		let disk: Vec<CellIndex> = origin.grid_disk(self.disk_size(radius_km));

		let mut found = Vec::new();
		for cell in disk {
			let Some(members) = self.cells.get(&(tenant.clone(), cell)) else {
				continue;
			};
			let mut stale = Vec::new();
			for driver_id in members.iter() {
				let Some(fix) = self.fixes.get(&(tenant.clone(), driver_id.clone())) else {
					stale.push(driver_id.clone());
					continue;
				};
				if !fix.is_fresh(freshness, now) {
					stale.push(driver_id.clone());
					continue;
				}
				let distance_km = center.distance_km(&fix.position);
				if distance_km <= radius_km {
					found.push(NearbyDriver {
						driver_id: driver_id.clone(),
						distance_km: (distance_km * 100.0).round() / 100.0,
						position: fix.position,
						bearing: fix.bearing,
						speed_kmh: fix.speed_kmh,
						last_update: fix.recorded_at,
					});
				}
			}
			drop(members);
			for driver_id in stale {
				self.drop_from_cell(tenant, cell, &driver_id);
			}
		}

		found.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
		Ok(found)
	}
}

#[async_trait]
impl GeoCacheInterface for MemoryGeoCache {
	async fn upsert(&self, fix: DriverLocation) -> Result<(), LocationError> {
		let cell = self.cell_of(fix.position)?;
		let key = (fix.tenant.clone(), fix.driver_id.clone());

		// Move the driver between cells when the position crossed a
		// boundary; the fix table write below supersedes the old fix.
		if let Some(previous) = self.fixes.get(&key).map(|f| f.position) {
			let old_cell = self.cell_of(previous)?;
			if old_cell != cell {
				self.drop_from_cell(&fix.tenant, old_cell, &fix.driver_id);
			}
		}

		self.cells
			.entry((fix.tenant.clone(), cell))
			.or_default()
			.insert(fix.driver_id.clone());
		self.fixes.insert(key, fix);
		Ok(())
	}

	async fn nearby(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
		limit: usize,
		freshness: Duration,
	) -> Result<Vec<NearbyDriver>, LocationError> {
		let mut found = self.scan(tenant, center, radius_km, freshness)?;
		found.truncate(limit);
		Ok(found)
	}

	async fn count(
		&self,
		tenant: &TenantId,
		center: GeoPoint,
		radius_km: f64,
		freshness: Duration,
	) -> Result<usize, LocationError> {
		Ok(self.scan(tenant, center, radius_km, freshness)?.len())
	}

	async fn remove(&self, tenant: &TenantId, driver_id: &DriverId) -> Result<(), LocationError> {
		if let Some((_, fix)) = self.fixes.remove(&(tenant.clone(), driver_id.clone())) {
			let cell = self.cell_of(fix.position)?;
			self.drop_from_cell(tenant, cell, driver_id);
		}
		Ok(())
	}

	async fn get(
		&self,
		tenant: &TenantId,
		driver_id: &DriverId,
		freshness: Duration,
	) -> Result<Option<DriverLocation>, LocationError> {
		let now = Utc::now();
		Ok(self
			.fixes
			.get(&(tenant.clone(), driver_id.clone()))
			.filter(|fix| fix.is_fresh(freshness, now))
			.map(|fix| fix.value().clone()))
	}
}
