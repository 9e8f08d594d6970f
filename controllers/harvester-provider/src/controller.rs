//! Main controller implementation.
//!
//! Wires the Kubernetes client, the Harvester client, the image factory
//! client and the metrics endpoint together, then runs the watcher until a
//! shutdown signal arrives.

use crate::config::ProviderConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::schematic::ImageFactoryClient;
use crate::watcher::watch_machine_requests;
use crds::MachineRequest;
use harvester_client::HarvesterClient;
use kube::api::ListParams;
use kube::{Api, Client};
use provisioner::Provisioner;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Harvester provider controller.
pub struct Controller {
    api: Api<MachineRequest>,
    reconciler: Arc<Reconciler>,
    metrics: Metrics,
    metrics_addr: SocketAddr,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: &ProviderConfig) -> Result<Self, ControllerError> {
        info!("Initializing Harvester provider controller");

        let client = Client::try_default().await?;

        let api: Api<MachineRequest> = match config.watch_namespace.as_deref() {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        };
        api.list(&ListParams::default().limit(1)).await.map_err(|e| {
            ControllerError::Watch(format!("MachineRequest resources can not be listed, is the CRD installed? {}", e))
        })?;

        let schematics = ImageFactoryClient::new(&config.image_factory_url)?;
        info!("Schematics are registered at {}", schematics.schematics_url());

        let provisioner = Provisioner::new(
            Arc::new(HarvesterClient::new(client.clone())),
            Arc::new(schematics),
            config.provisioner_config(),
        );
        let metrics = Metrics::new()?;
        let reconciler = Arc::new(Reconciler::new(client, provisioner, metrics.clone()));

        Ok(Self {
            api,
            reconciler,
            metrics,
            metrics_addr: config.metrics_addr,
        })
    }

    /// Runs until the watcher fails or the process is asked to stop.
    pub async fn run(self) -> Result<(), ControllerError> {
        let Self {
            api,
            reconciler,
            metrics,
            metrics_addr,
        } = self;

        let metrics_server = tokio::spawn(async move {
            if let Err(e) = metrics::serve(metrics_addr, metrics).await {
                error!("Metrics server stopped: {}", e);
            }
        });

        let result = tokio::select! {
            result = watch_machine_requests(api, reconciler) => result,
            () = shutdown_signal() => {
                info!("Shutdown signal received, stopping controller");
                Ok(())
            }
        };

        metrics_server.abort();
        result
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
