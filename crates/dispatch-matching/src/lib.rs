//! Driver scoring and ranking.
//!
//! Pure, synchronous computation: given candidates with their distance to
//! the pickup point and their metrics, produce the ordered list of drivers
//! to offer the ride to. No I/O happens here; the orchestrator assembles
//! the candidates and consumes the ranking.

use dispatch_types::DriverId;
use serde::{Deserialize, Serialize};

pub mod eta;

pub use eta::eta_minutes;

/// Weighting of the composite score components.
const DISTANCE_WEIGHT: f64 = 0.5;
const RATING_WEIGHT: f64 = 0.3;
const ACCEPTANCE_WEIGHT: f64 = 0.2;

/// A driver under consideration for one ride.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
	pub driver_id: DriverId,
	/// Great-circle distance from the driver to the pickup point.
	pub distance_km: f64,
	/// 0.0 ..= 5.0 star rating.
	pub rating: f64,
	/// Lifetime offer acceptance rate percentage.
	pub acceptance_rate: f64,
}

/// A candidate with its computed desirability score.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
	pub candidate: Candidate,
	pub score: f64,
}

/// Distance component: 100 at the pickup point, falling linearly to 0 at
/// the search radius edge.
fn distance_score(distance_km: f64, radius_km: f64) -> f64 {
	((radius_km - distance_km) / radius_km * 100.0).max(0.0)
}

/// Composite desirability score for one candidate.
///
/// Distance dominates, then rating (0-50 band), then acceptance history
/// (0-10 band).
pub fn score(candidate: &Candidate, radius_km: f64) -> f64 {
	let distance = distance_score(candidate.distance_km, radius_km);
	let rating = candidate.rating * 10.0;
	let acceptance = candidate.acceptance_rate / 10.0;
	DISTANCE_WEIGHT * distance + RATING_WEIGHT * rating + ACCEPTANCE_WEIGHT * acceptance
}

/// Orders candidates by descending score and truncates to the top `limit`.
///
/// Candidates at or beyond the radius are excluded: their distance score is
/// zero and they are not worth an offer. Ties break by ascending distance,
/// then by the caller's original order (the sort is stable).
pub fn rank_candidates(
	candidates: Vec<Candidate>,
	radius_km: f64,
	limit: usize,
) -> Vec<RankedCandidate> {
	let mut ranked: Vec<RankedCandidate> = candidates
		.into_iter()
		.filter(|c| c.distance_km < radius_km)
		.map(|candidate| {
			let score = score(&candidate, radius_km);
			RankedCandidate { candidate, score }
		})
		.collect();

	ranked.sort_by(|a, b| {
		b.score
			.total_cmp(&a.score)
			.then(a.candidate.distance_km.total_cmp(&b.candidate.distance_km))
	});
	ranked.truncate(limit);
	ranked
}
