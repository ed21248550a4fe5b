//! Geographic primitives: validated coordinates and great-circle distance.

use crate::errors::GeoError;
use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers, as used by the haversine formula.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS-84 coordinate pair.
///
/// Construction through [`GeoPoint::new`] validates the ranges; deserialized
/// values coming from storage are assumed to have been validated at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
	pub latitude: f64,
	pub longitude: f64,
}

impl GeoPoint {
	pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
		if !(-90.0..=90.0).contains(&latitude) {
			return Err(GeoError::InvalidLatitude(latitude));
		}
		if !(-180.0..=180.0).contains(&longitude) {
			return Err(GeoError::InvalidLongitude(longitude));
		}
		Ok(Self {
			latitude,
			longitude,
		})
	}

	/// Haversine great-circle distance to another point, in kilometers.
	///
	/// Symmetric, and zero for identical points.
	pub fn distance_km(&self, other: &GeoPoint) -> f64 {
		let (lat1, lon1) = (self.latitude.to_radians(), self.longitude.to_radians());
		let (lat2, lon2) = (other.latitude.to_radians(), other.longitude.to_radians());
		let dlat = lat2 - lat1;
		let dlon = lon2 - lon1;
		let sin_dlat = (dlat * 0.5).sin();
		let sin_dlon = (dlon * 0.5).sin();
		let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
		let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
		EARTH_RADIUS_KM * c
	}
}
