//! Provisioning steps
//!
//! Each step is an `impl` block on `Provisioner`. Resource builders are
//! plain functions so the desired objects can be checked without a client.

pub mod image;
pub mod machine;
pub mod namespace;
pub mod schematic;
pub mod validate;
pub mod volume_claim;

pub use image::build_image;
pub use machine::{build_virtual_machine, CLOUD_INIT_USER_DATA};
pub use volume_claim::build_volume_claim;
