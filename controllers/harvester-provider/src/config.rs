//! Provider configuration loaded from environment variables.

use crate::error::ControllerError;
use provisioner::{ProvisionerConfig, DEFAULT_IMAGE_FACTORY_URL, DEFAULT_KERNEL_ARG};
use reqwest::Url;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_WAIT_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Runtime configuration of the provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Namespace to watch for machine requests; all namespaces when unset
    pub watch_namespace: Option<String>,
    pub image_factory_url: Url,
    pub wait_timeout: Duration,
    pub metrics_addr: SocketAddr,
    pub extra_kernel_args: Vec<String>,
}

impl ProviderConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let watch_namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());

        let factory = lookup("IMAGE_FACTORY_URL").unwrap_or_else(|| DEFAULT_IMAGE_FACTORY_URL.to_string());
        let image_factory_url = Url::parse(&factory).map_err(|e| {
            ControllerError::InvalidConfig(format!("IMAGE_FACTORY_URL {} is not a valid URL: {}", factory, e))
        })?;
        if image_factory_url.cannot_be_a_base() {
            return Err(ControllerError::InvalidConfig(format!(
                "IMAGE_FACTORY_URL {} can not be used as a base URL",
                factory
            )));
        }

        let wait_timeout = match lookup("WAIT_TIMEOUT_SECONDS") {
            Some(value) => {
                let seconds: u64 = value.parse().map_err(|_| {
                    ControllerError::InvalidConfig(format!("WAIT_TIMEOUT_SECONDS {} is not a number", value))
                })?;
                if seconds == 0 {
                    return Err(ControllerError::InvalidConfig(
                        "WAIT_TIMEOUT_SECONDS must be greater than zero".to_string(),
                    ));
                }
                Duration::from_secs(seconds)
            }
            None => Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECONDS),
        };

        let addr = lookup("METRICS_ADDR").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = addr.parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("METRICS_ADDR {} is not a socket address", addr))
        })?;

        let extra_kernel_args = match lookup("EXTRA_KERNEL_ARGS") {
            Some(args) => args
                .split(',')
                .map(str::trim)
                .filter(|arg| !arg.is_empty())
                .map(String::from)
                .collect(),
            None => vec![DEFAULT_KERNEL_ARG.to_string()],
        };

        Ok(Self {
            watch_namespace,
            image_factory_url,
            wait_timeout,
            metrics_addr,
            extra_kernel_args,
        })
    }

    /// Settings handed to the provisioning pipeline.
    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            wait_timeout: self.wait_timeout,
            extra_kernel_args: self.extra_kernel_args.clone(),
            ..ProvisionerConfig::new(self.image_factory_url.clone())
        }
    }
}
