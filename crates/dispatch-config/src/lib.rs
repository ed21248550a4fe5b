//! Configuration loading for the dispatch service.
//!
//! TOML files with `${ENV_VAR}` substitution, a small set of environment
//! overrides, and validation of the values the dispatch core depends on.

use std::env;
use std::path::Path;
use thiserror::Error;

pub mod types;

pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution
#[derive(Default)]
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "DISPATCH_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<DispatchConfig, ConfigError> {
		// Load base configuration from file
		let mut config = if let Some(file_path) = &self.file_path {
			self.load_from_file(file_path).await?
		} else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};

		// Apply environment variable overrides
		self.apply_env_overrides(&mut config)?;

		// Validate configuration
		validate_config(&config)?;

		Ok(config)
	}

	async fn load_from_file(&self, file_path: &str) -> Result<DispatchConfig, ConfigError> {
		let content = match tokio::fs::read_to_string(file_path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(ConfigError::FileNotFound(file_path.to_string()))
			}
			Err(e) => return Err(ConfigError::IoError(e)),
		};

		let substituted = substitute_env_vars(&content)?;

		let config: DispatchConfig =
			toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))?;

		Ok(config)
	}

	fn apply_env_overrides(&self, config: &mut DispatchConfig) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			config.service.log_level = log_level;
		}

		if let Ok(radius) = env::var(format!("{}SEARCH_RADIUS_KM", self.env_prefix)) {
			config.matching.search_radius_km = radius.parse().map_err(|e| {
				ConfigError::ValidationError(format!("Invalid search radius: {}", e))
			})?;
		}

		Ok(())
	}
}

/// Replaces `${VAR_NAME}` occurrences with the variable's value, failing
/// when a referenced variable is not set.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
	let mut result = String::with_capacity(content.len());
	let mut rest = content;

	while let Some(start) = rest.find("${") {
		let Some(len) = rest[start..].find('}') else {
			break;
		};
		result.push_str(&rest[..start]);
		let var_name = &rest[start + 2..start + len];
		let value =
			env::var(var_name).map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
		result.push_str(&value);
		rest = &rest[start + len + 1..];
	}
	result.push_str(rest);

	Ok(result)
}

/// Validates the values the dispatch core depends on.
pub fn validate_config(config: &DispatchConfig) -> Result<(), ConfigError> {
	if config.matching.search_radius_km <= 0.0 {
		return Err(ConfigError::ValidationError(
			"matching.search_radius_km must be positive".to_string(),
		));
	}
	if config.matching.max_offers == 0 {
		return Err(ConfigError::ValidationError(
			"matching.max_offers must be at least 1".to_string(),
		));
	}
	if config.matching.average_speed_kmh <= 0.0 {
		return Err(ConfigError::ValidationError(
			"matching.average_speed_kmh must be positive".to_string(),
		));
	}
	if config.location.max_updates_per_second == 0 {
		return Err(ConfigError::ValidationError(
			"location.max_updates_per_second must be at least 1".to_string(),
		));
	}
	if config.location.index_resolution > 15 {
		return Err(ConfigError::ValidationError(
			"location.index_resolution must be an H3 resolution (0-15)".to_string(),
		));
	}
	if config.storage.backend == StorageBackend::File && config.storage.path.is_none() {
		return Err(ConfigError::ValidationError(
			"storage.path is required for the file backend".to_string(),
		));
	}
	if config.notifications.backend == NotificationBackend::Webhook
		&& config.notifications.endpoint.is_none()
	{
		return Err(ConfigError::ValidationError(
			"notifications.endpoint is required for the webhook backend".to_string(),
		));
	}
	for (tenant, overrides) in &config.tenants {
		if let Some(radius) = overrides.search_radius_km {
			if radius <= 0.0 {
				return Err(ConfigError::ValidationError(format!(
					"tenants.{}.search_radius_km must be positive",
					tenant
				)));
			}
		}
	}

	Ok(())
}
