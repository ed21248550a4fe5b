//! Engine wiring and the background run loop.

use crate::demand::StorageDemandSource;
use crate::dispatcher::DispatchService;
use crate::persist::LocationPersistWorker;
use crate::scheduler::{ScheduledTask, TokioScheduler};
use crate::DispatchError;
use arc_swap::ArcSwap;
use dispatch_config::DispatchConfig;
use dispatch_location::implementations::memory::MemoryGeoCache;
use dispatch_location::{
	FallbackLocationSource, GeoCacheInterface, LocationService, StorageFallbackSource,
};
use dispatch_notify::implementations::log::LogNotifier;
use dispatch_notify::{NotificationInterface, NotificationService};
use dispatch_pricing::{FareEstimator, SurgeService};
use dispatch_storage::implementations::memory::MemoryStorage;
use dispatch_storage::{StorageInterface, StorageService};
use dispatch_types::EventBus;
use h3o::Resolution;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// How often buffered location history is flushed to storage.
const PERSIST_INTERVAL_SECS: u64 = 10;

/// Fully wired dispatch system plus its background loop.
pub struct DispatchEngine {
	config: Arc<ArcSwap<DispatchConfig>>,
	dispatcher: Arc<DispatchService>,
	locations: Arc<LocationService>,
	surge: Arc<SurgeService>,
	fares: Arc<FareEstimator>,
	persist: LocationPersistWorker,
	events: EventBus,
	task_rx: Mutex<mpsc::UnboundedReceiver<ScheduledTask>>,
}

impl DispatchEngine {
	/// Runs scheduled timeouts, the periodic sweep, and history persistence
	/// until a shutdown signal arrives.
	pub async fn run(&self) -> Result<(), DispatchError> {
		let config = self.config.load_full();
		let mut sweep =
			tokio::time::interval(Duration::from_secs(config.matching.sweep_interval_secs));
		let mut persist = tokio::time::interval(Duration::from_secs(PERSIST_INTERVAL_SECS));
		let mut task_rx = self.task_rx.lock().await;

		info!("dispatch engine running");
		loop {
			tokio::select! {
				Some(task) = task_rx.recv() => {
					if let Err(e) = self.dispatcher.handle_task(task).await {
						warn!("scheduled task failed: {e}");
					}
				}

				_ = sweep.tick() => {
					if let Err(e) = self.dispatcher.sweep_expired().await {
						warn!("sweep failed: {e}");
					}
				}

				_ = persist.tick() => {
					if let Err(e) = self.persist.persist_batch().await {
						warn!("location persistence failed: {e}");
					}
				}

				_ = tokio::signal::ctrl_c() => {
					info!("shutting down dispatch engine");
					break;
				}
			}
		}
		Ok(())
	}

	pub fn dispatcher(&self) -> Arc<DispatchService> {
		self.dispatcher.clone()
	}

	pub fn locations(&self) -> Arc<LocationService> {
		self.locations.clone()
	}

	pub fn surge(&self) -> Arc<SurgeService> {
		self.surge.clone()
	}

	pub fn fares(&self) -> Arc<FareEstimator> {
		self.fares.clone()
	}

	pub fn event_bus(&self) -> &EventBus {
		&self.events
	}

	/// Swaps the live configuration snapshot.
	pub fn update_config(&self, config: DispatchConfig) {
		self.config.store(Arc::new(config));
	}
}

/// Builder assembling the engine from a configuration plus pluggable
/// backends. Defaults: in-memory storage, in-memory geo cache, log-only
/// notifications, storage-backed fallback source.
pub struct DispatchEngineBuilder {
	config: DispatchConfig,
	storage_backend: Option<Box<dyn StorageInterface>>,
	geo_cache: Option<Box<dyn GeoCacheInterface>>,
	notifiers: Vec<Arc<dyn NotificationInterface>>,
	storage_fallback: bool,
}

impl DispatchEngineBuilder {
	pub fn new(config: DispatchConfig) -> Self {
		Self {
			config,
			storage_backend: None,
			geo_cache: None,
			notifiers: Vec::new(),
			storage_fallback: true,
		}
	}

	pub fn with_storage_backend(mut self, backend: Box<dyn StorageInterface>) -> Self {
		self.storage_backend = Some(backend);
		self
	}

	pub fn with_geo_cache(mut self, cache: Box<dyn GeoCacheInterface>) -> Self {
		self.geo_cache = Some(cache);
		self
	}

	pub fn with_notifier(mut self, notifier: Arc<dyn NotificationInterface>) -> Self {
		self.notifiers.push(notifier);
		self
	}

	pub fn with_storage_fallback(mut self, enabled: bool) -> Self {
		self.storage_fallback = enabled;
		self
	}

	pub fn build(self) -> Result<DispatchEngine, DispatchError> {
		let resolution = Resolution::try_from(self.config.location.index_resolution)
			.map_err(|e| DispatchError::Upstream(format!("invalid index resolution: {e}")))?;
		let freshness = chrono::Duration::seconds(self.config.location.freshness_secs as i64);

		let events = EventBus::new(self.config.service.event_bus_capacity);
		let storage = Arc::new(StorageService::new(
			self.storage_backend
				.unwrap_or_else(|| Box::new(MemoryStorage::new())),
		));
		let locations = Arc::new(LocationService::new(
			self.geo_cache
				.unwrap_or_else(|| Box::new(MemoryGeoCache::new(resolution))),
			self.config.location.max_updates_per_second,
			freshness,
			self.config.location.history_capacity,
			events.clone(),
		));

		let notifiers = if self.notifiers.is_empty() {
			vec![Arc::new(LogNotifier::new()) as Arc<dyn NotificationInterface>]
		} else {
			self.notifiers
		};
		let notifications = Arc::new(NotificationService::new(notifiers));

		let fallback = self.storage_fallback.then(|| {
			Arc::new(StorageFallbackSource::new(storage.clone(), freshness))
				as Arc<dyn FallbackLocationSource>
		});

		let (scheduler, task_rx) = TokioScheduler::new();
		let config = Arc::new(ArcSwap::from_pointee(self.config));

		let dispatcher = Arc::new(DispatchService::new(
			config.clone(),
			storage.clone(),
			locations.clone(),
			fallback,
			notifications,
			Arc::new(scheduler),
			events.clone(),
		));

		let loaded = config.load_full();
		let surge = Arc::new(SurgeService::new(
			Arc::new(StorageDemandSource::new(storage.clone())),
			locations.clone(),
			loaded.surge.radius_km,
			Duration::from_secs(loaded.surge.cache_ttl_secs),
		));
		let fares = Arc::new(FareEstimator::new(
			surge.clone(),
			loaded.matching.average_speed_kmh,
		));
		let persist = LocationPersistWorker::new(locations.clone(), storage.clone());

		Ok(DispatchEngine {
			config,
			dispatcher,
			locations,
			surge,
			fares,
			persist,
			events,
			task_rx: Mutex::new(task_rx),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::DispatchError;
	use dispatch_types::RideId;

	#[tokio::test]
	async fn builds_with_defaults_and_serves_requests() {
		let engine = DispatchEngineBuilder::new(DispatchConfig::default())
			.build()
			.unwrap();

		let missing = RideId::new();
		match engine.dispatcher().dispatch(missing).await {
			Err(DispatchError::RideNotFound(id)) => assert_eq!(id, missing),
			other => panic!("expected RideNotFound, got {other:?}"),
		}
	}
}
