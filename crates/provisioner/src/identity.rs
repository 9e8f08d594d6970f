//! Content-addressed boot image identity.
//!
//! The image is identified by its download URL, not by the request that
//! asked for it, so every request wanting the same Talos build reuses the
//! same image.

use reqwest::Url;
use sha2::{Digest, Sha256};

/// Length of the label-safe identifier.
pub const IDENTIFIER_LEN: usize = 16;

/// Download descriptor of a Talos nocloud image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    url: Url,
}

impl ImageSource {
    /// `<factory>/image/<schematic>/<version>/nocloud-<arch>.qcow2`
    pub fn new(factory: &Url, schematic: &str, talos_version: &str, architecture: &str) -> Self {
        let mut url = factory.clone();
        // Factory URLs are validated as base URLs when configuration is loaded.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["image", schematic, talos_version])
                .push(&format!("nocloud-{}.qcow2", architecture));
        }
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Derives the image identity from the canonical URL.
    pub fn identity(&self) -> ImageIdentity {
        ImageIdentity::from_url(self.url.as_str())
    }
}

/// Deterministic naming derived from an image URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageIdentity {
    volume_name: String,
}

impl ImageIdentity {
    pub fn from_url(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        Self {
            volume_name: format!("talos-{:x}", digest),
        }
    }

    /// `talos-<hex sha256>`; used as the image's generate-name prefix.
    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    /// First 16 characters of the volume name, stored in the image label.
    pub fn identifier(&self) -> &str {
        &self.volume_name[..IDENTIFIER_LEN]
    }
}
