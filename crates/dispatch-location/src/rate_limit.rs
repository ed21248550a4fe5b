//! Per-driver location update rate limiting.

use dashmap::DashMap;
use dispatch_types::DriverId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-window rate limiter, one window per driver per wall-clock second.
///
/// The window second and the count are packed into a single atomic so the
/// reset at a second boundary and concurrent increments cannot race: every
/// admit is one compare-exchange over both halves.
pub struct RateLimiter {
	max_per_second: u32,
	windows: DashMap<DriverId, AtomicU64>,
}

impl RateLimiter {
	pub fn new(max_per_second: u32) -> Self {
		Self {
			max_per_second,
			windows: DashMap::new(),
		}
	}

	/// Returns whether an update arriving at `epoch_secs` is admitted.
	pub fn admit(&self, driver_id: &DriverId, epoch_secs: u64) -> bool {
		let second = epoch_secs & 0xffff_ffff;
		let window = self
			.windows
			.entry(driver_id.clone())
			.or_insert_with(|| AtomicU64::new(0));

		loop {
			let current = window.load(Ordering::Acquire);
			let (window_second, count) = (current >> 32, current & 0xffff_ffff);

			let (next_second, next_count) = if window_second == second {
				(window_second, count + 1)
			} else {
				(second, 1)
			};
			if next_count > u64::from(self.max_per_second) {
				return false;
			}

			let next = (next_second << 32) | next_count;
			if window
				.compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
				.is_ok()
			{
				return true;
			}
		}
	}
}
