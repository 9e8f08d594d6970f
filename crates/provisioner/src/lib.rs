//! Harvester Machine Provisioner
//!
//! Converges a machine request into a boot image, a primary disk claim and a
//! KubeVirt VM on Harvester. The pipeline is re-entrant: it is re-run from
//! the first step on every invocation and each step checks before it acts.
//!
//! # Steps
//!
//! 1. `validateRequest`: reject request ids that cannot name resources
//! 2. `namespace`: resolve the target namespace
//! 3. `createSchematic`: obtain the boot schematic id
//! 4. `ensureVolume`: find or import the content-addressed boot image
//! 5. `createPVC`: create the primary disk claim and wait for it to bind
//! 6. `syncMachine`: create the VM and report its UUID
//!
//! Deprovisioning is a separate entry point, see [`Provisioner::deprovision`].

pub mod context;
mod deprovision;
pub mod error;
pub mod identity;
pub mod labels;
pub mod pipeline;
#[cfg(test)]
mod pipeline_test;
pub mod steps;
#[cfg(test)]
mod test_utils;

pub use context::{ProvisionContext, SchematicGenerator, SchematicRequest};
pub use error::ProvisionError;
pub use identity::{ImageIdentity, ImageSource};
pub use pipeline::{
    Outcome, Provisioner, ProvisionerConfig, Step, DEFAULT_IMAGE_FACTORY_URL, DEFAULT_KERNEL_ARG,
    DEPROVISION_RETRY_INTERVAL, MAX_REQUEST_ID_LEN, PROVISION_RETRY_INTERVAL,
};
