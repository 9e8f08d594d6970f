//! Harvester Provider CRD Definitions
//!
//! The provider's own `MachineRequest` CRD and the Harvester/KubeVirt
//! resources the provisioner creates.

pub mod machine_request;
pub mod machine_state;
pub mod provider_data;
pub mod virtual_machine;
pub mod virtual_machine_image;
pub mod volume_claim_template;

pub use machine_request::*;
pub use machine_state::*;
pub use provider_data::*;
pub use virtual_machine::*;
pub use virtual_machine_image::*;
pub use volume_claim_template::*;
