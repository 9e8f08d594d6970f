//! Harvester API Client
//!
//! Typed access to the Harvester resources the provisioner drives: boot
//! images, persistent volume claims, KubeVirt virtual machines, plus the
//! namespace and storage class lookups used for validation.
//!
//! # Features
//!
//! - **Trait seam**: `HarvesterClientTrait` is implemented by the real
//!   `HarvesterClient` and, with the `test-util` feature, by an in-memory
//!   `MockHarvesterClient`
//! - **Bounded waits**: watch-based waits that always return within their
//!   timeout (see [`wait`])
//! - **Error classification**: not-found and already-exists responses are
//!   surfaced as dedicated `HarvesterError` variants

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod harvester_trait;
#[cfg(feature = "test-util")]
pub mod mock;
pub mod wait;

pub use client::HarvesterClient;
pub use error::HarvesterError;
pub use harvester_trait::{claim_phase, is_claim_bound, HarvesterClientTrait, CLAIM_BOUND_PHASE};
#[cfg(feature = "test-util")]
pub use mock::{MockCalls, MockHarvesterClient};
pub use wait::{wait_for, wait_on_stream, WaitOutcome, DEFAULT_WAIT_TIMEOUT};
