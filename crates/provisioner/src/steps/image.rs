//! Boot image step
//!
//! Boot images are shared by every request that wants the same Talos build.
//! They are looked up by the content-addressed identifier label first and
//! only created when no match exists; they are never modified or deleted.

use crate::context::ProvisionContext;
use crate::error::ProvisionError;
use crate::identity::{ImageIdentity, ImageSource};
use crate::labels::{creator_labels, volume_id_selector, STORAGE_CLASS_ANNOTATION, VOLUME_ID_LABEL};
use crate::pipeline::{Outcome, Provisioner};
use crds::{ImageSourceType, VirtualMachineImage, VirtualMachineImageSpec};
use harvester_client::{HarvesterClientTrait, HarvesterError, WaitOutcome};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Download attempts Harvester makes before marking an image failed.
const IMAGE_DOWNLOAD_RETRIES: i32 = 3;

/// Desired boot image for `source`, named by Harvester from the volume name.
pub fn build_image(
    request_id: &str,
    namespace: &str,
    source: &ImageSource,
    identity: &ImageIdentity,
    storage_class: &str,
) -> VirtualMachineImage {
    let mut labels = creator_labels();
    labels.insert(VOLUME_ID_LABEL.to_string(), identity.identifier().to_string());

    VirtualMachineImage {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", identity.volume_name())),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(
                STORAGE_CLASS_ANNOTATION.to_string(),
                storage_class.to_string(),
            )])),
            ..Default::default()
        },
        spec: VirtualMachineImageSpec {
            display_name: request_id.to_string(),
            source_type: ImageSourceType::Download,
            url: source.url().to_string(),
            retry: Some(IMAGE_DOWNLOAD_RETRIES),
            description: None,
        },
        status: None,
    }
}

impl<C: HarvesterClientTrait> Provisioner<C> {
    /// Ensures the boot image for the request's schematic, version and
    /// architecture exists and records its name as the volume id.
    pub(crate) async fn ensure_volume(
        &self,
        ctx: &mut ProvisionContext,
    ) -> Result<Outcome, ProvisionError> {
        let talos_version = ctx.talos_version().to_string();
        ctx.state_mut().set_talos_version(talos_version.as_str());

        let namespace = ctx.namespace().to_string();
        let data = ctx.provider_data().clone();
        let source = ImageSource::new(
            &self.config.image_factory_url,
            &ctx.state().schematic,
            &talos_version,
            &data.architecture,
        );
        let identity = source.identity();
        let volume_name = identity.volume_name();

        match self.find_image(&namespace, &identity).await {
            Ok(Some(existing)) => {
                info!("Boot image {} already exists as {}, skipping creation", volume_name, existing);
                ctx.state_mut().set_volume_id(existing);
                return Ok(Outcome::Continue);
            }
            Ok(None) => {}
            Err(e) => return self.retry_transient(e, &format!("list boot images {}", volume_name)),
        }

        info!("Boot image {} not found, creating it from {}", volume_name, source.url());

        match self.client.get_storage_class(&data.storage_class).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(ProvisionError::InvalidConfig(format!(
                    "storage class {} does not exist",
                    data.storage_class
                )));
            }
            Err(e) => return self.retry_transient(e, &format!("look up storage class {}", data.storage_class)),
        }

        let image = build_image(ctx.request_id(), &namespace, &source, &identity, &data.storage_class);
        let created = match self.client.create_image(&namespace, &image).await {
            Ok(created) => created,
            Err(e) if e.is_already_exists() => {
                // Another request created the same image concurrently.
                info!("Boot image {} was created concurrently", volume_name);
                return match self.find_image(&namespace, &identity).await {
                    Ok(Some(existing)) => {
                        ctx.state_mut().set_volume_id(existing);
                        Ok(Outcome::Continue)
                    }
                    Ok(None) => Ok(self.retry()),
                    Err(e) => self.retry_transient(e, &format!("list boot images {}", volume_name)),
                };
            }
            Err(e) => {
                warn!("Failed to create boot image {}: {}", volume_name, e);
                return Ok(self.retry());
            }
        };

        let Some(name) = created.metadata.name else {
            warn!("Created boot image {} has no name", volume_name);
            return Ok(self.retry());
        };

        match self
            .client
            .wait_for_image(&namespace, &name, self.config.wait_timeout)
            .await
        {
            Ok(WaitOutcome::Ready(image)) => {
                info!("Boot image {} imported ({}%)", name, image.progress());
                ctx.state_mut().set_volume_id(name);
                Ok(Outcome::Continue)
            }
            Ok(WaitOutcome::NotReady) => {
                warn!(
                    "Boot image {} not imported within {:?}",
                    name, self.config.wait_timeout
                );
                Ok(self.retry())
            }
            Err(e) => {
                warn!("Failed to watch boot image {}: {}", name, e);
                Ok(self.retry())
            }
        }
    }

    /// Name of an existing image carrying the identifier label.
    async fn find_image(
        &self,
        namespace: &str,
        identity: &ImageIdentity,
    ) -> Result<Option<String>, HarvesterError> {
        let selector = volume_id_selector(identity.identifier());
        let images = self.client.list_images(namespace, &selector).await?;
        Ok(images.into_iter().find_map(|image| image.metadata.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    #[test]
    fn test_build_image() {
        let factory = Url::parse("https://factory.talos.dev").unwrap();
        let source = ImageSource::new(&factory, "abc123", "v1.9.0", "amd64");
        let identity = source.identity();

        let image = build_image("machine-1", "vms", &source, &identity, "longhorn");

        let labels = image.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[VOLUME_ID_LABEL], identity.identifier());
        assert_eq!(labels["tag.harvesterhci.io/created-by"], "omni-infra-provider-harvester");
        assert_eq!(labels["tag.harvesterhci.io/managed-by"], "omni");
        assert_eq!(labels["harvesterhci.io/creator"], "omni-infra-provider-harvester");
        assert_eq!(
            image.metadata.annotations.as_ref().unwrap()["harvesterhci.io/storageClassName"],
            "longhorn"
        );
        assert_eq!(
            image.metadata.generate_name.as_deref(),
            Some(format!("{}-", identity.volume_name()).as_str())
        );
        assert_eq!(image.metadata.name, None);
        assert_eq!(image.spec.display_name, "machine-1");
        assert_eq!(image.spec.source_type, ImageSourceType::Download);
        assert_eq!(image.spec.url, source.url().as_str());
        assert_eq!(image.spec.retry, Some(3));
    }
}
