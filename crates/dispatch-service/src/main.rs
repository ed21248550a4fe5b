use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dispatch_config::{ConfigLoader, NotificationBackend, StorageBackend};
use dispatch_core::DispatchEngineBuilder;
use dispatch_notify::implementations::webhook::WebhookNotifier;
use dispatch_storage::implementations::file::FileStorage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "dispatchd")]
#[command(about = "Ride dispatch service", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	#[arg(long, env = "DISPATCH_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the dispatch service
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_service(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn start_service(cli: Cli) -> Result<()> {
	info!("Starting ride dispatch service");
	info!("Loading configuration from: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration loaded successfully");
	info!("Service name: {}", config.service.name);
	info!(
		"Search radius: {} km, max offers per ride: {}",
		config.matching.search_radius_km, config.matching.max_offers
	);

	let mut builder = DispatchEngineBuilder::new(config.clone());

	if config.storage.backend == StorageBackend::File {
		// Validated at load time: the file backend always has a path.
		let path = config
			.storage
			.path
			.clone()
			.context("storage.path missing for file backend")?;
		info!("Using file storage at {:?}", path);
		builder = builder.with_storage_backend(Box::new(FileStorage::new(path)));
	}

	if config.notifications.backend == NotificationBackend::Webhook {
		let endpoint = config
			.notifications
			.endpoint
			.clone()
			.context("notifications.endpoint missing for webhook backend")?;
		info!("Delivering notifications via webhook: {}", endpoint);
		builder = builder.with_notifier(Arc::new(WebhookNotifier::new(endpoint)));
	}

	let engine = builder.build().context("Failed to build dispatch engine")?;

	info!("Ride dispatch service started");
	engine.run().await.context("Engine terminated with error")?;
	info!("Ride dispatch service stopped");

	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Configuration is invalid")?;

	println!("Configuration is valid");
	println!("  service name:   {}", config.service.name);
	println!("  storage:        {:?}", config.storage.backend);
	println!("  notifications:  {:?}", config.notifications.backend);
	println!("  search radius:  {} km", config.matching.search_radius_km);
	println!("  tenants:        {}", config.tenants.len());

	Ok(())
}

fn setup_tracing(level: &str) -> Result<()> {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

	tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer())
		.try_init()
		.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

	Ok(())
}
