//! Talos image factory client
//!
//! Registers boot customizations with the image factory and returns the
//! schematic id the factory derives for them. The factory deduplicates, so
//! posting the same customization again yields the same id.

use crate::error::ControllerError;
use async_trait::async_trait;
use provisioner::{ProvisionError, SchematicGenerator, SchematicRequest};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct Schematic {
    customization: Customization,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Customization {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    extra_kernel_args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_extensions: Option<SystemExtensions>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemExtensions {
    official_extensions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SchematicResponse {
    id: String,
}

/// YAML document the factory expects for a customization.
fn schematic_body(request: &SchematicRequest) -> Result<String, serde_yaml::Error> {
    let system_extensions = (!request.extensions.is_empty()).then(|| SystemExtensions {
        official_extensions: request.extensions.clone(),
    });
    serde_yaml::to_string(&Schematic {
        customization: Customization {
            extra_kernel_args: request.kernel_args.clone(),
            system_extensions,
        },
    })
}

/// HTTP client for the image factory's schematic API.
#[derive(Debug, Clone)]
pub struct ImageFactoryClient {
    http: reqwest::Client,
    schematics_url: Url,
}

impl ImageFactoryClient {
    pub fn new(base_url: &Url) -> Result<Self, ControllerError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ControllerError::Schematic(e.to_string()))?;

        let mut schematics_url = base_url.clone();
        schematics_url
            .path_segments_mut()
            .map_err(|()| ControllerError::InvalidConfig(format!("{} can not be a base URL", base_url)))?
            .pop_if_empty()
            .push("schematics");

        Ok(Self { http, schematics_url })
    }

    pub fn schematics_url(&self) -> &Url {
        &self.schematics_url
    }
}

#[async_trait]
impl SchematicGenerator for ImageFactoryClient {
    async fn generate_schematic(&self, request: &SchematicRequest) -> Result<String, ProvisionError> {
        let body = schematic_body(request).map_err(|e| ProvisionError::Schematic(e.to_string()))?;
        debug!("Requesting schematic from {}:\n{}", self.schematics_url, body);

        let response = self
            .http
            .post(self.schematics_url.clone())
            .header(CONTENT_TYPE, "application/yaml")
            .body(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ProvisionError::Schematic(e.to_string()))?;

        let schematic: SchematicResponse = response
            .json()
            .await
            .map_err(|e| ProvisionError::Schematic(format!("invalid factory response: {}", e)))?;
        Ok(schematic.id)
    }
}
