//! Configuration types for the dispatch service.

use dispatch_types::TenantId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DispatchConfig {
	#[serde(default)]
	pub service: ServiceConfig,
	#[serde(default)]
	pub storage: StorageConfig,
	#[serde(default)]
	pub location: LocationConfig,
	#[serde(default)]
	pub matching: MatchingConfig,
	#[serde(default)]
	pub surge: SurgeConfig,
	#[serde(default)]
	pub notifications: NotificationsConfig,
	/// Per-tenant overrides, keyed by tenant id.
	#[serde(default)]
	pub tenants: HashMap<String, TenantConfig>,
}

impl DispatchConfig {
	/// Search radius for a tenant, falling back to the workspace default.
	pub fn search_radius_km(&self, tenant: &TenantId) -> f64 {
		self.tenants
			.get(tenant.as_str())
			.and_then(|t| t.search_radius_km)
			.unwrap_or(self.matching.search_radius_km)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
	#[serde(default = "default_service_name")]
	pub name: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
	#[serde(default = "default_event_bus_capacity")]
	pub event_bus_capacity: usize,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			name: default_service_name(),
			log_level: default_log_level(),
			event_bus_capacity: default_event_bus_capacity(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
	Memory,
	File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
	#[serde(default = "default_storage_backend")]
	pub backend: StorageBackend,
	/// Base directory for the file backend.
	#[serde(default)]
	pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: default_storage_backend(),
			path: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
	/// Write-time rate limit per driver.
	#[serde(default = "default_max_updates_per_second")]
	pub max_updates_per_second: u32,
	/// Maximum age of a fix before nearby queries ignore it.
	#[serde(default = "default_freshness_secs")]
	pub freshness_secs: u64,
	/// Cap on the per-tenant recent-fix history stream.
	#[serde(default = "default_history_capacity")]
	pub history_capacity: usize,
	/// H3 resolution of the index cells.
	#[serde(default = "default_index_resolution")]
	pub index_resolution: u8,
}

impl Default for LocationConfig {
	fn default() -> Self {
		Self {
			max_updates_per_second: default_max_updates_per_second(),
			freshness_secs: default_freshness_secs(),
			history_capacity: default_history_capacity(),
			index_resolution: default_index_resolution(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
	#[serde(default = "default_search_radius_km")]
	pub search_radius_km: f64,
	/// Offers created per dispatch pass.
	#[serde(default = "default_max_offers")]
	pub max_offers: usize,
	/// Response window per offer.
	#[serde(default = "default_offer_timeout_secs")]
	pub offer_timeout_secs: u64,
	/// Whole-search backstop per ride.
	#[serde(default = "default_ride_backstop_secs")]
	pub ride_backstop_secs: u64,
	#[serde(default = "default_sweep_interval_secs")]
	pub sweep_interval_secs: u64,
	/// Assumed city traffic speed for ETA estimates.
	#[serde(default = "default_average_speed_kmh")]
	pub average_speed_kmh: f64,
}

impl Default for MatchingConfig {
	fn default() -> Self {
		Self {
			search_radius_km: default_search_radius_km(),
			max_offers: default_max_offers(),
			offer_timeout_secs: default_offer_timeout_secs(),
			ride_backstop_secs: default_ride_backstop_secs(),
			sweep_interval_secs: default_sweep_interval_secs(),
			average_speed_kmh: default_average_speed_kmh(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurgeConfig {
	#[serde(default = "default_surge_radius_km")]
	pub radius_km: f64,
	#[serde(default = "default_surge_cache_ttl_secs")]
	pub cache_ttl_secs: u64,
}

impl Default for SurgeConfig {
	fn default() -> Self {
		Self {
			radius_km: default_surge_radius_km(),
			cache_ttl_secs: default_surge_cache_ttl_secs(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationBackend {
	Log,
	Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
	#[serde(default = "default_notification_backend")]
	pub backend: NotificationBackend,
	/// Endpoint for the webhook backend.
	#[serde(default)]
	pub endpoint: Option<String>,
}

impl Default for NotificationsConfig {
	fn default() -> Self {
		Self {
			backend: default_notification_backend(),
			endpoint: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TenantConfig {
	pub search_radius_km: Option<f64>,
}

fn default_service_name() -> String {
	"ride-dispatch".to_string()
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_event_bus_capacity() -> usize {
	1024
}

fn default_storage_backend() -> StorageBackend {
	StorageBackend::Memory
}

fn default_max_updates_per_second() -> u32 {
	2
}

fn default_freshness_secs() -> u64 {
	300
}

fn default_history_capacity() -> usize {
	10_000
}

fn default_index_resolution() -> u8 {
	8
}

fn default_search_radius_km() -> f64 {
	5.0
}

fn default_max_offers() -> usize {
	10
}

fn default_offer_timeout_secs() -> u64 {
	30
}

fn default_ride_backstop_secs() -> u64 {
	60
}

fn default_sweep_interval_secs() -> u64 {
	5
}

fn default_average_speed_kmh() -> f64 {
	30.0
}

fn default_surge_radius_km() -> f64 {
	5.0
}

fn default_surge_cache_ttl_secs() -> u64 {
	30
}

fn default_notification_backend() -> NotificationBackend {
	NotificationBackend::Log
}
