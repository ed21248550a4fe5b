//! Arrival time estimation.

/// Estimated minutes to cover `distance_km` at the assumed city traffic
/// speed. Rounded to whole minutes, as shown to riders and drivers.
pub fn eta_minutes(distance_km: f64, average_speed_kmh: f64) -> u32 {
	(distance_km / average_speed_kmh * 60.0).round() as u32
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn eta_at_city_speed() {
		// 5 km at 30 km/h is 10 minutes.
		assert_eq!(eta_minutes(5.0, 30.0), 10);
		// 1.4 km rounds to 3 minutes.
		assert_eq!(eta_minutes(1.4, 30.0), 3);
		assert_eq!(eta_minutes(0.0, 30.0), 0);
	}
}
