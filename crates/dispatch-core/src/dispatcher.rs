//! The dispatch orchestrator.
//!
//! Every ride and offer transition here goes through the storage layer's
//! compare-and-swap (`mutate`), because an accept and a sweep timeout can
//! race on the same record. The ride record is the single authority for
//! acceptance: whichever driver's accept transitions the ride from
//! `searching` wins, and every later accept attempt fails on that guard no
//! matter what state its offer is in.

use crate::scheduler::{ScheduledTask, Scheduler};
use crate::DispatchError;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dispatch_config::DispatchConfig;
use dispatch_location::{FallbackLocationSource, LocationService};
use dispatch_matching::{eta_minutes, rank_candidates, Candidate};
use dispatch_notify::{Notification, NotificationKind, NotificationService};
use dispatch_storage::{MutateOutcome, StorageError, StorageService};
use dispatch_types::{
	CancelledBy, DispatchEvent, DriverId, DriverMetrics, DriverOffer, DriverProfile, EventBus,
	NearbyDriver, OfferCommand, OfferEvent, OfferId, OfferStatus, RideCommand, RideEvent, RideId,
	RideRequest, RideStatus, TransitionError, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Storage namespaces for the records the orchestrator owns.
pub const RIDES_NAMESPACE: &str = "rides";
pub const OFFERS_NAMESPACE: &str = "offers";
/// Per-ride list of offer ids, for the release/expiry cascades.
pub const RIDE_OFFERS_NAMESPACE: &str = "ride_offers";
pub const PROFILES_NAMESPACE: &str = "driver_profiles";
pub const METRICS_NAMESPACE: &str = "driver_metrics";

/// Result of one dispatch pass.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
	pub ride_id: RideId,
	pub drivers_found: usize,
	pub offers_sent: usize,
}

/// Result of a driver's response to an offer.
#[derive(Debug, Clone)]
pub enum OfferResponse {
	Accepted {
		ride_id: RideId,
	},
	/// Declined; dispatch continued down the ranked list and sent this many
	/// further offers.
	Declined {
		ride_id: RideId,
		continued_offers: usize,
	},
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
	pub offers_timed_out: usize,
	pub rides_failed: usize,
}

/// The matching service: finds candidates, creates offers, and drives the
/// ride/offer state machines on responses, timeouts, and cancellations.
pub struct DispatchService {
	config: Arc<ArcSwap<DispatchConfig>>,
	storage: Arc<StorageService>,
	locations: Arc<LocationService>,
	fallback: Option<Arc<dyn FallbackLocationSource>>,
	notifications: Arc<NotificationService>,
	scheduler: Arc<dyn Scheduler>,
	events: EventBus,
}

impl DispatchService {
	pub fn new(
		config: Arc<ArcSwap<DispatchConfig>>,
		storage: Arc<StorageService>,
		locations: Arc<LocationService>,
		fallback: Option<Arc<dyn FallbackLocationSource>>,
		notifications: Arc<NotificationService>,
		scheduler: Arc<dyn Scheduler>,
		events: EventBus,
	) -> Self {
		Self {
			config,
			storage,
			locations,
			fallback,
			notifications,
			scheduler,
			events,
		}
	}

	/// Starts or continues the offer workflow for a ride.
	///
	/// Idempotent re-entry: a ride already `searching` is re-dispatched
	/// without duplicating offers to drivers who still hold a live one.
	/// Callers enforce single-flight per ride; concurrent invocations for
	/// different rides are fine.
	pub async fn dispatch(&self, ride_id: RideId) -> Result<DispatchOutcome, DispatchError> {
		let config = self.config.load_full();
		let now = Utc::now();
		let ride = self.load_ride(&ride_id).await?;

		if !matches!(ride.status, RideStatus::Requested | RideStatus::Searching) {
			return Err(TransitionError::Ride {
				from: ride.status,
				command: "start_searching",
			}
			.into());
		}
		let first_entry = ride.status == RideStatus::Requested;

		let backstop = chrono::Duration::seconds(config.matching.ride_backstop_secs as i64);
		let outcome = self
			.storage
			.mutate::<RideRequest, _>(RIDES_NAMESPACE, &ride_id.to_string(), |ride| {
				if ride.transition(&RideCommand::StartSearching, now).is_err() {
					return false;
				}
				if ride.search_deadline.is_none() {
					ride.search_deadline = Some(now + backstop);
				}
				true
			})
			.await?;
		let ride = match outcome {
			MutateOutcome::Applied(ride) => ride,
			MutateOutcome::Abandoned(ride) => {
				return Err(TransitionError::Ride {
					from: ride.status,
					command: "start_searching",
				}
				.into())
			}
		};

		if first_entry {
			// One backstop per ride, independent of the per-offer timeouts.
			self.scheduler.run_after(
				Duration::from_secs(config.matching.ride_backstop_secs),
				ScheduledTask::RideBackstop(ride_id),
			);
			let _ = self
				.events
				.publish(DispatchEvent::Ride(RideEvent::SearchStarted { ride_id }));
		}

		// Candidate search, with the slower secondary source as fallback.
		let radius_km = config.search_radius_km(&ride.tenant);
		let fetch_limit = config.matching.max_offers * 2;
		let mut nearby = self
			.locations
			.nearby_drivers(&ride.tenant, ride.pickup, radius_km, fetch_limit)
			.await?;
		if nearby.is_empty() {
			if let Some(fallback) = &self.fallback {
				debug!(%ride_id, "location cache empty, querying fallback source");
				nearby = fallback
					.nearby(&ride.tenant, ride.pickup, radius_km, fetch_limit)
					.await?;
			}
		}
		if nearby.is_empty() {
			info!(%ride_id, "no drivers available within {radius_km}km");
			let _ = self
				.events
				.publish(DispatchEvent::Ride(RideEvent::NoDriversAvailable { ride_id }));
			return Err(DispatchError::NoDriversAvailable(ride_id));
		}
		let drivers_found = nearby.len();

		let (candidates, contacts) = self.assemble_candidates(nearby).await?;

		// Drivers who already received an offer for this ride are excluded
		// before ranking: live offers make re-entry idempotent, and settled
		// ones keep a decline cascade moving to the remaining candidates
		// instead of re-offering the driver who just said no.
		let prior_drivers: HashSet<DriverId> = self
			.offers_for_ride(&ride_id)
			.await?
			.into_iter()
			.map(|offer| offer.driver_id)
			.collect();
		let candidates: Vec<Candidate> = candidates
			.into_iter()
			.filter(|candidate| !prior_drivers.contains(&candidate.driver_id))
			.collect();
		let ranked = rank_candidates(candidates, radius_km, config.matching.max_offers);

		let window = chrono::Duration::seconds(config.matching.offer_timeout_secs as i64);
		let mut offers_sent = 0;
		for (rank, ranked_candidate) in ranked.iter().enumerate() {
			// A rider cancel (or a racing accept) aborts the rest of the
			// ranked list.
			let current = self.load_ride(&ride_id).await?;
			if current.status != RideStatus::Searching {
				debug!(%ride_id, status = %current.status, "stopping offer creation");
				break;
			}

			let driver_id = &ranked_candidate.candidate.driver_id;
			let distance_km = ranked_candidate.candidate.distance_km;
			let offer = DriverOffer::new(
				ride_id,
				driver_id.clone(),
				ride.tenant.clone(),
				distance_km,
				eta_minutes(distance_km, config.matching.average_speed_kmh),
				Utc::now(),
				window,
			);
			self.storage
				.create(OFFERS_NAMESPACE, &offer.id.to_string(), &offer)
				.await?;
			self.append_ride_offer(&ride_id, offer.id).await?;
			self.storage
				.increment(
					METRICS_NAMESPACE,
					&format!("{}:total_offers", driver_id),
					1,
				)
				.await?;

			if let Some(user_id) = contacts.get(driver_id) {
				self.notifications.send(Notification {
					user_id: user_id.clone(),
					kind: NotificationKind::RideOffer,
					title: "New Ride Request".to_string(),
					body: format!("Pickup in {:.1} km", distance_km),
					data: serde_json::json!({
						"ride_id": ride_id.to_string(),
						"offer_id": offer.id.to_string(),
						"eta_minutes": offer.eta_minutes,
					}),
				});
			}
			let _ = self.events.publish(DispatchEvent::Offer(OfferEvent::Created {
				offer_id: offer.id,
				ride_id,
				driver_id: driver_id.clone(),
				rank,
			}));
			self.scheduler.run_after(
				Duration::from_secs(config.matching.offer_timeout_secs),
				ScheduledTask::OfferTimeout(offer.id),
			);

			offers_sent += 1;
		}

		info!(%ride_id, drivers_found, offers_sent, "dispatch pass complete");
		Ok(DispatchOutcome {
			ride_id,
			drivers_found,
			offers_sent,
		})
	}

	/// Handles a driver's accept or decline of an offer.
	pub async fn handle_offer_response(
		&self,
		driver_id: &DriverId,
		offer_id: OfferId,
		accept: bool,
		reason: Option<String>,
	) -> Result<OfferResponse, DispatchError> {
		let now = Utc::now();
		let offer = self.load_offer(&offer_id).await?;

		if &offer.driver_id != driver_id {
			warn!(%offer_id, %driver_id, "response from a driver who does not own the offer");
			return Err(DispatchError::StaleOffer(offer_id));
		}
		if offer.status != OfferStatus::Offered {
			debug!(%offer_id, status = %offer.status, "response for a settled offer");
			return Err(DispatchError::StaleOffer(offer_id));
		}

		if accept {
			self.accept_offer(offer, now).await
		} else {
			self.decline_offer(offer, reason, now).await
		}
	}

	async fn accept_offer(
		&self,
		offer: DriverOffer,
		now: DateTime<Utc>,
	) -> Result<OfferResponse, DispatchError> {
		let ride_id = offer.ride_id;
		let driver_id = offer.driver_id.clone();

		// Ride first: this compare-and-swap decides the winner. A ride that
		// already left `searching` rejects the accept without mutation, even
		// when the targeted offer is technically still `offered`.
		let command = RideCommand::Accept {
			driver: driver_id.clone(),
		};
		let outcome = self
			.storage
			.mutate::<RideRequest, _>(RIDES_NAMESPACE, &ride_id.to_string(), |ride| {
				ride.transition(&command, now).is_ok()
			})
			.await
			.map_err(|e| match e {
				StorageError::NotFound => DispatchError::RideNotFound(ride_id),
				other => other.into(),
			})?;
		let ride = match outcome {
			MutateOutcome::Applied(ride) => ride,
			MutateOutcome::Abandoned(ride) => {
				info!(%ride_id, status = %ride.status, "accept rejected, ride no longer searching");
				return Err(TransitionError::Ride {
					from: ride.status,
					command: "accept",
				}
				.into());
			}
		};

		let offer_outcome = self
			.storage
			.mutate::<DriverOffer, _>(OFFERS_NAMESPACE, &offer.id.to_string(), |o| {
				o.transition(&OfferCommand::Accept, now).is_ok()
			})
			.await?;
		if matches!(offer_outcome, MutateOutcome::Abandoned(_)) {
			// A sweep can settle the offer in the window after the ride
			// transition; the ride acceptance stands.
			warn!(offer_id = %offer.id, "offer settled concurrently with accept");
		}

		self.storage
			.increment(
				METRICS_NAMESPACE,
				&format!("{}:accepted_offers", driver_id),
				1,
			)
			.await?;
		self.expire_open_offers(&ride_id, Some(offer.id), now).await?;

		self.notifications.send(Notification {
			user_id: ride.rider_id.clone(),
			kind: NotificationKind::DriverAssigned,
			title: "Driver Assigned".to_string(),
			body: format!("Your driver is {} minutes away", offer.eta_minutes),
			data: serde_json::json!({
				"ride_id": ride_id.to_string(),
				"driver_id": driver_id.to_string(),
			}),
		});
		let _ = self.events.publish(DispatchEvent::Ride(RideEvent::Accepted {
			ride_id,
			driver_id,
		}));

		Ok(OfferResponse::Accepted { ride_id })
	}

	async fn decline_offer(
		&self,
		offer: DriverOffer,
		reason: Option<String>,
		now: DateTime<Utc>,
	) -> Result<OfferResponse, DispatchError> {
		let ride_id = offer.ride_id;
		let command = OfferCommand::Decline { reason };
		let outcome = self
			.storage
			.mutate::<DriverOffer, _>(OFFERS_NAMESPACE, &offer.id.to_string(), |o| {
				o.transition(&command, now).is_ok()
			})
			.await?;
		if matches!(outcome, MutateOutcome::Abandoned(_)) {
			return Err(DispatchError::StaleOffer(offer.id));
		}
		let _ = self.events.publish(DispatchEvent::Offer(OfferEvent::Declined {
			offer_id: offer.id,
			ride_id,
		}));

		// Keep working the ranked list (or re-run the search) while the
		// ride is still searching.
		match self.dispatch(ride_id).await {
			Ok(outcome) => Ok(OfferResponse::Declined {
				ride_id,
				continued_offers: outcome.offers_sent,
			}),
			Err(DispatchError::NoDriversAvailable(_)) | Err(DispatchError::InvalidTransition(_)) => {
				Ok(OfferResponse::Declined {
					ride_id,
					continued_offers: 0,
				})
			}
			Err(e) => Err(e),
		}
	}

	/// Rider- or system-initiated cancellation.
	///
	/// Transitions the ride, expires every outstanding offer, and notifies
	/// the counterpart. Offer creation mid-flight re-checks the ride state,
	/// so a cancel also suppresses the rest of a running dispatch pass.
	pub async fn cancel_ride(
		&self,
		ride_id: RideId,
		by: CancelledBy,
		reason: Option<String>,
	) -> Result<(), DispatchError> {
		let now = Utc::now();
		let command = RideCommand::Cancel { by };
		let outcome = self
			.storage
			.mutate::<RideRequest, _>(RIDES_NAMESPACE, &ride_id.to_string(), |ride| {
				ride.transition(&command, now).is_ok()
			})
			.await
			.map_err(|e| match e {
				StorageError::NotFound => DispatchError::RideNotFound(ride_id),
				other => other.into(),
			})?;
		let ride = match outcome {
			MutateOutcome::Applied(ride) => ride,
			MutateOutcome::Abandoned(ride) => {
				return Err(TransitionError::Ride {
					from: ride.status,
					command: "cancel",
				}
				.into())
			}
		};

		self.expire_open_offers(&ride_id, None, now).await?;

		// Notify whichever side did not cancel.
		let recipient = match by {
			CancelledBy::Rider => match &ride.driver_id {
				Some(driver) => self.driver_contact(driver).await?,
				None => None,
			},
			CancelledBy::Driver | CancelledBy::System => Some(ride.rider_id.clone()),
		};
		if let Some(user_id) = recipient {
			self.notifications.send(Notification {
				user_id,
				kind: NotificationKind::RideCancelled,
				title: "Ride Cancelled".to_string(),
				body: match by {
					CancelledBy::Rider => "The rider has cancelled the ride".to_string(),
					CancelledBy::Driver => "The driver has cancelled the ride".to_string(),
					CancelledBy::System => "The ride has been cancelled".to_string(),
				},
				data: serde_json::json!({
					"ride_id": ride_id.to_string(),
					"reason": reason,
				}),
			});
		}
		let _ = self
			.events
			.publish(DispatchEvent::Ride(RideEvent::Cancelled { ride_id }));

		Ok(())
	}

	/// Periodic safety net: settles offers past their response window and
	/// fails rides past their search backstop.
	pub async fn sweep_expired(&self) -> Result<SweepReport, DispatchError> {
		let now = Utc::now();
		let mut report = SweepReport::default();

		let offers: Vec<DriverOffer> = self.storage.retrieve_all(OFFERS_NAMESPACE).await?;
		for offer in offers {
			if offer.is_stale(now) && self.timeout_offer(&offer, now).await? {
				report.offers_timed_out += 1;
			}
		}

		let rides: Vec<RideRequest> = self.storage.retrieve_all(RIDES_NAMESPACE).await?;
		for ride in rides {
			if ride.status != RideStatus::Searching {
				continue;
			}
			let Some(deadline) = ride.search_deadline else {
				continue;
			};
			if now > deadline && self.fail_ride(ride.id, now).await? {
				report.rides_failed += 1;
			}
		}

		if report.offers_timed_out > 0 || report.rides_failed > 0 {
			info!(
				offers_timed_out = report.offers_timed_out,
				rides_failed = report.rides_failed,
				"sweep pass complete"
			);
		}
		Ok(report)
	}

	/// Executes one scheduled task from the engine loop.
	pub async fn handle_task(&self, task: ScheduledTask) -> Result<(), DispatchError> {
		let now = Utc::now();
		match task {
			ScheduledTask::OfferTimeout(offer_id) => {
				match self.load_offer(&offer_id).await {
					Ok(offer) if offer.is_stale(now) => {
						self.timeout_offer(&offer, now).await?;
					}
					Ok(_) => {}
					Err(DispatchError::OfferNotFound(_)) => {}
					Err(e) => return Err(e),
				}
				Ok(())
			}
			ScheduledTask::RideBackstop(ride_id) => {
				let ride = self.load_ride(&ride_id).await?;
				if ride.status == RideStatus::Searching {
					self.fail_ride(ride_id, now).await?;
				}
				Ok(())
			}
		}
	}

	async fn timeout_offer(
		&self,
		offer: &DriverOffer,
		now: DateTime<Utc>,
	) -> Result<bool, DispatchError> {
		let outcome = self
			.storage
			.mutate::<DriverOffer, _>(OFFERS_NAMESPACE, &offer.id.to_string(), |o| {
				o.is_stale(now) && o.transition(&OfferCommand::MarkTimedOut, now).is_ok()
			})
			.await?;
		if matches!(outcome, MutateOutcome::Applied(_)) {
			let _ = self.events.publish(DispatchEvent::Offer(OfferEvent::TimedOut {
				offer_id: offer.id,
				ride_id: offer.ride_id,
			}));
			return Ok(true);
		}
		Ok(false)
	}

	async fn fail_ride(&self, ride_id: RideId, now: DateTime<Utc>) -> Result<bool, DispatchError> {
		let outcome = self
			.storage
			.mutate::<RideRequest, _>(RIDES_NAMESPACE, &ride_id.to_string(), |ride| {
				ride.status == RideStatus::Searching
					&& ride.transition(&RideCommand::Fail, now).is_ok()
			})
			.await?;
		let ride = match outcome {
			MutateOutcome::Applied(ride) => ride,
			MutateOutcome::Abandoned(_) => return Ok(false),
		};

		self.expire_open_offers(&ride_id, None, now).await?;
		self.notifications.send(Notification {
			user_id: ride.rider_id.clone(),
			kind: NotificationKind::MatchingTimeout,
			title: "No Driver Found".to_string(),
			body: "We could not find a driver for your ride. Please try again.".to_string(),
			data: serde_json::json!({ "ride_id": ride_id.to_string() }),
		});
		let _ = self
			.events
			.publish(DispatchEvent::Ride(RideEvent::Failed { ride_id }));
		Ok(true)
	}

	/// Expires every still-open offer for a ride, optionally sparing one.
	async fn expire_open_offers(
		&self,
		ride_id: &RideId,
		except: Option<OfferId>,
		now: DateTime<Utc>,
	) -> Result<(), DispatchError> {
		for offer in self.offers_for_ride(ride_id).await? {
			if Some(offer.id) == except || offer.status != OfferStatus::Offered {
				continue;
			}
			let outcome = self
				.storage
				.mutate::<DriverOffer, _>(OFFERS_NAMESPACE, &offer.id.to_string(), |o| {
					o.transition(&OfferCommand::Expire, now).is_ok()
				})
				.await?;
			if matches!(outcome, MutateOutcome::Applied(_)) {
				let _ = self.events.publish(DispatchEvent::Offer(OfferEvent::Expired {
					offer_id: offer.id,
					ride_id: *ride_id,
				}));
			}
		}
		Ok(())
	}

	/// Joins nearby drivers with their profiles and metrics, producing the
	/// ranking input plus the notification contact per driver.
	async fn assemble_candidates(
		&self,
		nearby: Vec<NearbyDriver>,
	) -> Result<(Vec<Candidate>, HashMap<DriverId, UserId>), DispatchError> {
		let mut candidates = Vec::with_capacity(nearby.len());
		let mut contacts = HashMap::with_capacity(nearby.len());

		for found in nearby {
			let (rating, user_id) = match self
				.storage
				.retrieve::<DriverProfile>(PROFILES_NAMESPACE, found.driver_id.as_str())
				.await
			{
				Ok(profile) => (profile.rating, profile.user_id),
				// Unregistered profile: rank with the default rating and
				// address notifications to the driver id.
				Err(StorageError::NotFound) => (5.0, UserId::new(found.driver_id.as_str())),
				Err(e) => return Err(e.into()),
			};
			let metrics = self.load_metrics(&found.driver_id).await?;

			contacts.insert(found.driver_id.clone(), user_id);
			candidates.push(Candidate {
				driver_id: found.driver_id,
				distance_km: found.distance_km,
				rating,
				acceptance_rate: metrics.acceptance_rate(),
			});
		}

		Ok((candidates, contacts))
	}

	async fn load_metrics(&self, driver_id: &DriverId) -> Result<DriverMetrics, DispatchError> {
		// Zero-delta increments read the counters without a separate get
		// path on the storage contract.
		let total_offers = self
			.storage
			.increment(METRICS_NAMESPACE, &format!("{}:total_offers", driver_id), 0)
			.await?;
		let accepted_offers = self
			.storage
			.increment(
				METRICS_NAMESPACE,
				&format!("{}:accepted_offers", driver_id),
				0,
			)
			.await?;
		Ok(DriverMetrics {
			total_offers,
			accepted_offers,
		})
	}

	async fn driver_contact(
		&self,
		driver_id: &DriverId,
	) -> Result<Option<UserId>, DispatchError> {
		match self
			.storage
			.retrieve::<DriverProfile>(PROFILES_NAMESPACE, driver_id.as_str())
			.await
		{
			Ok(profile) => Ok(Some(profile.user_id)),
			Err(StorageError::NotFound) => Ok(Some(UserId::new(driver_id.as_str()))),
			Err(e) => Err(e.into()),
		}
	}

	async fn load_ride(&self, ride_id: &RideId) -> Result<RideRequest, DispatchError> {
		match self
			.storage
			.retrieve(RIDES_NAMESPACE, &ride_id.to_string())
			.await
		{
			Ok(ride) => Ok(ride),
			Err(StorageError::NotFound) => Err(DispatchError::RideNotFound(*ride_id)),
			Err(e) => Err(e.into()),
		}
	}

	async fn load_offer(&self, offer_id: &OfferId) -> Result<DriverOffer, DispatchError> {
		match self
			.storage
			.retrieve(OFFERS_NAMESPACE, &offer_id.to_string())
			.await
		{
			Ok(offer) => Ok(offer),
			Err(StorageError::NotFound) => Err(DispatchError::OfferNotFound(*offer_id)),
			Err(e) => Err(e.into()),
		}
	}

	/// Offers created against a ride, in creation (rank) order.
	pub async fn offers_for_ride(
		&self,
		ride_id: &RideId,
	) -> Result<Vec<DriverOffer>, DispatchError> {
		let ids: Vec<OfferId> = match self
			.storage
			.retrieve(RIDE_OFFERS_NAMESPACE, &ride_id.to_string())
			.await
		{
			Ok(ids) => ids,
			Err(StorageError::NotFound) => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};

		let mut offers = Vec::with_capacity(ids.len());
		for id in ids {
			match self.storage.retrieve(OFFERS_NAMESPACE, &id.to_string()).await {
				Ok(offer) => offers.push(offer),
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e.into()),
			}
		}
		Ok(offers)
	}

	async fn append_ride_offer(
		&self,
		ride_id: &RideId,
		offer_id: OfferId,
	) -> Result<(), DispatchError> {
		let id = ride_id.to_string();
		match self
			.storage
			.create(RIDE_OFFERS_NAMESPACE, &id, &vec![offer_id])
			.await
		{
			Ok(()) => Ok(()),
			Err(StorageError::AlreadyExists) => {
				self.storage
					.mutate::<Vec<OfferId>, _>(RIDE_OFFERS_NAMESPACE, &id, |ids| {
						if !ids.contains(&offer_id) {
							ids.push(offer_id);
						}
						true
					})
					.await?;
				Ok(())
			}
			Err(e) => Err(e.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use dispatch_location::implementations::memory::MemoryGeoCache;
	use dispatch_location::service::FixDetails;
	use dispatch_location::StorageFallbackSource;
	use dispatch_notify::{NotificationInterface, NotifyError};
	use dispatch_storage::implementations::memory::MemoryStorage;
	use dispatch_types::{GeoPoint, TenantId, Tier};
	use h3o::Resolution;
	use std::sync::Mutex;

	const PICKUP: (f64, f64) = (40.7128, -74.0060);
	const NEAR: (f64, f64) = (40.7228, -74.0160);
	const FAR: (f64, f64) = (40.7328, -74.0260);

	#[derive(Default)]
	struct RecordingScheduler {
		tasks: Mutex<Vec<(Duration, ScheduledTask)>>,
	}

	impl Scheduler for RecordingScheduler {
		fn run_after(&self, delay: Duration, task: ScheduledTask) {
			self.tasks.lock().unwrap().push((delay, task));
		}
	}

	#[derive(Default)]
	struct RecordingNotifier {
		sent: Mutex<Vec<Notification>>,
	}

	#[async_trait]
	impl NotificationInterface for RecordingNotifier {
		async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
			self.sent.lock().unwrap().push(notification.clone());
			Ok(())
		}
	}

	struct Harness {
		service: DispatchService,
		storage: Arc<StorageService>,
		locations: Arc<LocationService>,
		scheduler: Arc<RecordingScheduler>,
	}

	fn harness() -> Harness {
		harness_with(DispatchConfig::default(), false)
	}

	fn harness_with(config: DispatchConfig, with_fallback: bool) -> Harness {
		let events = EventBus::new(64);
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let freshness = chrono::Duration::minutes(5);
		let locations = Arc::new(LocationService::new(
			Box::new(MemoryGeoCache::new(Resolution::Eight)),
			// Tests seed several fixes within one second.
			100,
			freshness,
			1000,
			events.clone(),
		));
		let scheduler = Arc::new(RecordingScheduler::default());
		let fallback = with_fallback.then(|| {
			Arc::new(StorageFallbackSource::new(storage.clone(), freshness))
				as Arc<dyn FallbackLocationSource>
		});
		let service = DispatchService::new(
			Arc::new(ArcSwap::from_pointee(config)),
			storage.clone(),
			locations.clone(),
			fallback,
			Arc::new(NotificationService::new(vec![Arc::new(
				RecordingNotifier::default(),
			)])),
			scheduler.clone(),
			events,
		);
		Harness {
			service,
			storage,
			locations,
			scheduler,
		}
	}

	async fn seed_ride(harness: &Harness) -> RideId {
		let ride = RideRequest::new(
			TenantId::from("acme"),
			UserId::from("rider-1"),
			GeoPoint::new(PICKUP.0, PICKUP.1).unwrap(),
			GeoPoint::new(40.7580, -73.9855).unwrap(),
			Tier::Standard,
			1.0,
		);
		harness
			.storage
			.store(RIDES_NAMESPACE, &ride.id.to_string(), &ride)
			.await
			.unwrap();
		ride.id
	}

	/// Puts a driver online with a 4.8 rating and a 95% acceptance history.
	async fn seed_driver(harness: &Harness, id: &str, position: (f64, f64)) {
		let driver_id = DriverId::from(id);
		assert!(harness
			.locations
			.update_location(
				TenantId::from("acme"),
				driver_id.clone(),
				GeoPoint::new(position.0, position.1).unwrap(),
				FixDetails::default(),
			)
			.await
			.unwrap());
		harness
			.storage
			.store(
				PROFILES_NAMESPACE,
				id,
				&DriverProfile {
					driver_id: driver_id.clone(),
					tenant: TenantId::from("acme"),
					user_id: UserId::new(format!("user-{id}")),
					rating: 4.8,
				},
			)
			.await
			.unwrap();
		harness
			.storage
			.increment(METRICS_NAMESPACE, &format!("{driver_id}:total_offers"), 20)
			.await
			.unwrap();
		harness
			.storage
			.increment(
				METRICS_NAMESPACE,
				&format!("{driver_id}:accepted_offers"),
				19,
			)
			.await
			.unwrap();
	}

	async fn ride_status(harness: &Harness, ride_id: RideId) -> RideRequest {
		harness
			.storage
			.retrieve(RIDES_NAMESPACE, &ride_id.to_string())
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn dispatch_offers_both_drivers_closest_first() {
		let harness = harness();
		let ride_id = seed_ride(&harness).await;
		seed_driver(&harness, "far", FAR).await;
		seed_driver(&harness, "near", NEAR).await;

		let outcome = harness.service.dispatch(ride_id).await.unwrap();
		assert_eq!(outcome.drivers_found, 2);
		assert_eq!(outcome.offers_sent, 2);

		let offers = harness.service.offers_for_ride(&ride_id).await.unwrap();
		assert_eq!(offers.len(), 2);
		assert_eq!(offers[0].driver_id, DriverId::from("near"));
		assert_eq!(offers[1].driver_id, DriverId::from("far"));
		for offer in &offers {
			assert_eq!(offer.status, OfferStatus::Offered);
			assert_eq!(
				offer.timeout_at - offer.offered_at,
				chrono::Duration::seconds(30)
			);
		}

		let ride = ride_status(&harness, ride_id).await;
		assert_eq!(ride.status, RideStatus::Searching);
		assert!(ride.search_deadline.is_some());

		// One 60s backstop and one 30s timeout per offer.
		let tasks = harness.scheduler.tasks.lock().unwrap();
		let backstops: Vec<_> = tasks
			.iter()
			.filter(|(_, t)| matches!(t, ScheduledTask::RideBackstop(_)))
			.collect();
		assert_eq!(backstops.len(), 1);
		assert_eq!(backstops[0].0, Duration::from_secs(60));
		let timeouts = tasks
			.iter()
			.filter(|(d, t)| {
				matches!(t, ScheduledTask::OfferTimeout(_)) && *d == Duration::from_secs(30)
			})
			.count();
		assert_eq!(timeouts, 2);
	}

	#[tokio::test]
	async fn dispatch_is_idempotent_for_live_offers() {
		let harness = harness();
		let ride_id = seed_ride(&harness).await;
		seed_driver(&harness, "near", NEAR).await;
		seed_driver(&harness, "far", FAR).await;

		harness.service.dispatch(ride_id).await.unwrap();
		let second = harness.service.dispatch(ride_id).await.unwrap();
		assert_eq!(second.offers_sent, 0);

		let offers = harness.service.offers_for_ride(&ride_id).await.unwrap();
		assert_eq!(offers.len(), 2);
		// The backstop was only scheduled on first entry.
		let backstops = harness
			.scheduler
			.tasks
			.lock()
			.unwrap()
			.iter()
			.filter(|(_, t)| matches!(t, ScheduledTask::RideBackstop(_)))
			.count();
		assert_eq!(backstops, 1);
	}

	#[tokio::test]
	async fn no_drivers_leaves_the_ride_searching() {
		let harness = harness();
		let ride_id = seed_ride(&harness).await;

		match harness.service.dispatch(ride_id).await {
			Err(DispatchError::NoDriversAvailable(id)) => assert_eq!(id, ride_id),
			other => panic!("expected NoDriversAvailable, got {other:?}"),
		}
		// The orchestrator does not fail the ride itself; the caller does.
		let ride = ride_status(&harness, ride_id).await;
		assert_eq!(ride.status, RideStatus::Searching);
	}

	#[tokio::test]
	async fn fallback_source_supplies_candidates_when_cache_is_empty() {
		let harness = harness_with(DispatchConfig::default(), true);
		let ride_id = seed_ride(&harness).await;

		// Nothing in the live cache; one fresh fix persisted in storage.
		let fix = dispatch_types::DriverLocation {
			driver_id: DriverId::from("persisted"),
			tenant: TenantId::from("acme"),
			position: GeoPoint::new(NEAR.0, NEAR.1).unwrap(),
			bearing: None,
			speed_kmh: None,
			accuracy_m: None,
			recorded_at: Utc::now(),
		};
		harness
			.storage
			.store(
				dispatch_location::fallback::LOCATION_NAMESPACE,
				&StorageFallbackSource::record_id(&fix.tenant, &fix.driver_id),
				&fix,
			)
			.await
			.unwrap();

		let outcome = harness.service.dispatch(ride_id).await.unwrap();
		assert_eq!(outcome.offers_sent, 1);
		let offers = harness.service.offers_for_ride(&ride_id).await.unwrap();
		assert_eq!(offers[0].driver_id, DriverId::from("persisted"));
	}

	#[tokio::test]
	async fn first_accept_wins_and_releases_the_rest() {
		let harness = harness();
		let ride_id = seed_ride(&harness).await;
		seed_driver(&harness, "near", NEAR).await;
		seed_driver(&harness, "far", FAR).await;
		harness.service.dispatch(ride_id).await.unwrap();

		let offers = harness.service.offers_for_ride(&ride_id).await.unwrap();
		let near_offer = offers[0].clone();
		let far_offer = offers[1].clone();

		let response = harness
			.service
			.handle_offer_response(&near_offer.driver_id, near_offer.id, true, None)
			.await
			.unwrap();
		assert!(matches!(response, OfferResponse::Accepted { .. }));

		let ride = ride_status(&harness, ride_id).await;
		assert_eq!(ride.status, RideStatus::Accepted);
		assert_eq!(ride.driver_id, Some(DriverId::from("near")));
		assert!(ride.accepted_at.is_some());

		let offers = harness.service.offers_for_ride(&ride_id).await.unwrap();
		assert_eq!(offers[0].status, OfferStatus::Accepted);
		assert_eq!(offers[1].status, OfferStatus::Expired);

		// The acceptance counter moved through the atomic increment path.
		let accepted = harness
			.storage
			.increment(METRICS_NAMESPACE, "near:accepted_offers", 0)
			.await
			.unwrap();
		assert_eq!(accepted, 20);

		// Second accept targets a released offer and is rejected by the
		// ride-state guard without touching the ride.
		let err = harness
			.service
			.handle_offer_response(&far_offer.driver_id, far_offer.id, true, None)
			.await
			.unwrap_err();
		assert!(matches!(err, DispatchError::StaleOffer(_)));
		let ride = ride_status(&harness, ride_id).await;
		assert_eq!(ride.driver_id, Some(DriverId::from("near")));
	}

	#[tokio::test]
	async fn accept_after_cancel_is_rejected_without_mutation() {
		let harness = harness();
		let ride_id = seed_ride(&harness).await;
		seed_driver(&harness, "near", NEAR).await;
		harness.service.dispatch(ride_id).await.unwrap();

		harness
			.service
			.cancel_ride(ride_id, CancelledBy::Rider, Some("changed plans".to_string()))
			.await
			.unwrap();
		let ride = ride_status(&harness, ride_id).await;
		assert_eq!(ride.status, RideStatus::Cancelled);
		assert_eq!(ride.cancelled_by, Some(CancelledBy::Rider));

		// The outstanding offer was expired by the cancel cascade, so the
		// accept is rejected up front as stale; the ride is untouched.
		let offers = harness.service.offers_for_ride(&ride_id).await.unwrap();
		assert_eq!(offers[0].status, OfferStatus::Expired);
		let err = harness
			.service
			.handle_offer_response(&offers[0].driver_id, offers[0].id, true, None)
			.await
			.unwrap_err();
		assert!(matches!(err, DispatchError::StaleOffer(_)));

		let ride = ride_status(&harness, ride_id).await;
		assert_eq!(ride.status, RideStatus::Cancelled);
		assert_eq!(ride.driver_id, None);
	}

	#[tokio::test]
	async fn accept_on_open_offer_after_ride_left_searching_is_conflict() {
		let harness = harness();
		let ride_id = seed_ride(&harness).await;
		seed_driver(&harness, "near", NEAR).await;
		harness.service.dispatch(ride_id).await.unwrap();
		let offer = harness.service.offers_for_ride(&ride_id).await.unwrap()[0].clone();

		// Force the ride out of `searching` while leaving the offer open,
		// as a racing cancel that has not cascaded yet would.
		harness
			.storage
			.mutate::<RideRequest, _>(RIDES_NAMESPACE, &ride_id.to_string(), |ride| {
				ride.transition(
					&RideCommand::Cancel {
						by: CancelledBy::Rider,
					},
					Utc::now(),
				)
				.is_ok()
			})
			.await
			.unwrap();

		let err = harness
			.service
			.handle_offer_response(&offer.driver_id, offer.id, true, None)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			DispatchError::InvalidTransition(TransitionError::Ride {
				from: RideStatus::Cancelled,
				..
			})
		));
		let ride = ride_status(&harness, ride_id).await;
		assert_eq!(ride.status, RideStatus::Cancelled);
		assert_eq!(ride.driver_id, None);
	}

	#[tokio::test]
	async fn decline_continues_down_the_ranked_list() {
		let mut config = DispatchConfig::default();
		config.matching.max_offers = 1;
		let harness = harness_with(config, false);
		let ride_id = seed_ride(&harness).await;
		seed_driver(&harness, "near", NEAR).await;
		seed_driver(&harness, "far", FAR).await;

		let outcome = harness.service.dispatch(ride_id).await.unwrap();
		assert_eq!(outcome.offers_sent, 1);
		let first = harness.service.offers_for_ride(&ride_id).await.unwrap()[0].clone();
		assert_eq!(first.driver_id, DriverId::from("near"));

		let response = harness
			.service
			.handle_offer_response(
				&first.driver_id,
				first.id,
				false,
				Some("too far".to_string()),
			)
			.await
			.unwrap();
		match response {
			OfferResponse::Declined {
				continued_offers, ..
			} => assert_eq!(continued_offers, 1),
			other => panic!("expected a declined response, got {other:?}"),
		}

		let offers = harness.service.offers_for_ride(&ride_id).await.unwrap();
		assert_eq!(offers.len(), 2);
		assert_eq!(offers[0].status, OfferStatus::Declined);
		assert_eq!(offers[0].decline_reason.as_deref(), Some("too far"));
		assert_eq!(offers[1].driver_id, DriverId::from("far"));
		assert_eq!(offers[1].status, OfferStatus::Offered);
	}

	#[tokio::test]
	async fn sweep_times_out_offers_and_fails_backstopped_rides() {
		let harness = harness();
		let ride_id = seed_ride(&harness).await;
		seed_driver(&harness, "near", NEAR).await;
		harness.service.dispatch(ride_id).await.unwrap();

		// Nothing is stale yet.
		let report = harness.service.sweep_expired().await.unwrap();
		assert_eq!(report.offers_timed_out, 0);
		assert_eq!(report.rides_failed, 0);

		// Backdate the offer window and the ride backstop.
		let offer = harness.service.offers_for_ride(&ride_id).await.unwrap()[0].clone();
		harness
			.storage
			.mutate::<DriverOffer, _>(OFFERS_NAMESPACE, &offer.id.to_string(), |o| {
				o.timeout_at = Utc::now() - chrono::Duration::seconds(5);
				true
			})
			.await
			.unwrap();
		harness
			.storage
			.mutate::<RideRequest, _>(RIDES_NAMESPACE, &ride_id.to_string(), |r| {
				r.search_deadline = Some(Utc::now() - chrono::Duration::seconds(5));
				true
			})
			.await
			.unwrap();

		let report = harness.service.sweep_expired().await.unwrap();
		assert_eq!(report.offers_timed_out, 1);
		assert_eq!(report.rides_failed, 1);

		let ride = ride_status(&harness, ride_id).await;
		assert_eq!(ride.status, RideStatus::Failed);
		let offers = harness.service.offers_for_ride(&ride_id).await.unwrap();
		assert_eq!(offers[0].status, OfferStatus::TimedOut);
	}

	#[tokio::test]
	async fn backstop_task_fails_only_searching_rides() {
		let harness = harness();
		let ride_id = seed_ride(&harness).await;
		seed_driver(&harness, "near", NEAR).await;
		harness.service.dispatch(ride_id).await.unwrap();

		let offer = harness.service.offers_for_ride(&ride_id).await.unwrap()[0].clone();
		harness
			.service
			.handle_offer_response(&offer.driver_id, offer.id, true, None)
			.await
			.unwrap();

		// Backstop firing after acceptance is a no-op.
		harness
			.service
			.handle_task(ScheduledTask::RideBackstop(ride_id))
			.await
			.unwrap();
		assert_eq!(ride_status(&harness, ride_id).await.status, RideStatus::Accepted);
	}

	#[tokio::test]
	async fn responses_to_unknown_or_foreign_offers_are_rejected() {
		let harness = harness();
		let ride_id = seed_ride(&harness).await;
		seed_driver(&harness, "near", NEAR).await;
		harness.service.dispatch(ride_id).await.unwrap();
		let offer = harness.service.offers_for_ride(&ride_id).await.unwrap()[0].clone();

		let missing = OfferId::new();
		assert!(matches!(
			harness
				.service
				.handle_offer_response(&offer.driver_id, missing, true, None)
				.await,
			Err(DispatchError::OfferNotFound(_))
		));

		let imposter = DriverId::from("imposter");
		assert!(matches!(
			harness
				.service
				.handle_offer_response(&imposter, offer.id, true, None)
				.await,
			Err(DispatchError::StaleOffer(_))
		));
	}
}
