//! Harvester Provider
//!
//! Provisions Talos Linux machines as KubeVirt virtual machines on a
//! Harvester cluster in response to `MachineRequest` resources:
//! - registers a schematic with the Talos image factory
//! - imports the matching boot image once and shares it between machines
//! - creates the boot disk claim and the virtual machine
//! - deletes the machine when its request is withdrawn

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconcile_helpers;
mod reconciler;
mod schematic;
mod watcher;

use crate::config::ProviderConfig;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Harvester provider");

    let config = ProviderConfig::from_env()?;

    info!("Configuration:");
    info!("  Image factory: {}", config.image_factory_url);
    info!("  Wait timeout: {:?}", config.wait_timeout);
    info!("  Metrics address: {}", config.metrics_addr);
    info!("  Extra kernel args: {:?}", config.extra_kernel_args);
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );

    let controller = Controller::new(&config).await?;
    controller.run().await?;

    Ok(())
}
