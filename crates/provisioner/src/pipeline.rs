//! Step pipeline
//!
//! A pipeline run executes every step in a fixed order. The run holds no
//! resumption pointer: each invocation starts from the first step and every
//! step checks the platform before acting, so finished work is skipped with
//! a single lookup and interrupted work is picked up where it stopped.
//!
//! A step either continues, asks to be re-invoked after an interval, or
//! fails. The first non-continue outcome ends the run.

use crate::context::{ProvisionContext, SchematicGenerator};
use crate::error::ProvisionError;
use harvester_client::{HarvesterClientTrait, HarvesterError, DEFAULT_WAIT_TIMEOUT};
use reqwest::Url;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// Longest accepted machine request id.
pub const MAX_REQUEST_ID_LEN: usize = 62;

/// Retry interval for provisioning steps.
pub const PROVISION_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Retry interval for deprovisioning.
pub const DEPROVISION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Public Talos image factory.
pub const DEFAULT_IMAGE_FACTORY_URL: &str = "https://factory.talos.dev";

/// Kernel argument appended to every schematic.
pub const DEFAULT_KERNEL_ARG: &str = "console=ttyS0,38400n8";

/// Result of a step or of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Done; move on to the next step
    Continue,
    /// Not done yet; invoke the pipeline again after the interval
    RetryAfter(Duration),
}

impl Outcome {
    /// Whether the step or run finished.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Provisioning steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Check the request id fits in resource names
    ValidateRequest,
    /// Resolve the target namespace
    Namespace,
    /// Register the schematic with the image factory
    CreateSchematic,
    /// Find or import the boot image
    EnsureVolume,
    /// Create the boot disk claim
    CreateVolumeClaim,
    /// Create the virtual machine
    SyncMachine,
}

impl Step {
    /// Every step, in execution order.
    pub const ALL: [Step; 6] = [
        Step::ValidateRequest,
        Step::Namespace,
        Step::CreateSchematic,
        Step::EnsureVolume,
        Step::CreateVolumeClaim,
        Step::SyncMachine,
    ];

    /// Name used in logs and spans.
    pub fn name(&self) -> &'static str {
        match self {
            Step::ValidateRequest => "validateRequest",
            Step::Namespace => "namespace",
            Step::CreateSchematic => "createSchematic",
            Step::EnsureVolume => "ensureVolume",
            Step::CreateVolumeClaim => "createPVC",
            Step::SyncMachine => "syncMachine",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Provisioner settings
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Talos image factory the boot images are downloaded from
    pub image_factory_url: Url,
    /// Bound for each wait on image import and claim binding
    pub wait_timeout: Duration,
    /// Interval returned when a provisioning step is not done yet
    pub retry_interval: Duration,
    /// Interval returned while the machine is not deleted yet
    pub deprovision_retry_interval: Duration,
    /// Kernel arguments appended to every request's own arguments
    pub extra_kernel_args: Vec<String>,
}

impl ProvisionerConfig {
    /// Default settings for boot images served by `image_factory_url`.
    pub fn new(image_factory_url: Url) -> Self {
        Self {
            image_factory_url,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            retry_interval: PROVISION_RETRY_INTERVAL,
            deprovision_retry_interval: DEPROVISION_RETRY_INTERVAL,
            extra_kernel_args: vec![DEFAULT_KERNEL_ARG.to_string()],
        }
    }
}

/// Drives machine requests to a running VM on Harvester.
pub struct Provisioner<C> {
    pub(crate) client: Arc<C>,
    pub(crate) schematics: Arc<dyn SchematicGenerator>,
    pub(crate) config: ProvisionerConfig,
}

impl<C> fmt::Debug for Provisioner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: HarvesterClientTrait> Provisioner<C> {
    /// Creates a provisioner issuing platform calls through `client`.
    pub fn new(
        client: Arc<C>,
        schematics: Arc<dyn SchematicGenerator>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            client,
            schematics,
            config,
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Runs every step in order for one request.
    ///
    /// Returns `Outcome::Continue` once all steps are done, or the first
    /// retry requested by a step. State accumulated in `ctx` is valid to
    /// persist whatever the result.
    pub async fn provision(&self, ctx: &mut ProvisionContext) -> Result<Outcome, ProvisionError> {
        let span = info_span!("provision", request_id = %ctx.request_id());
        async move {
            for step in Step::ALL {
                let outcome = self
                    .run_step(step, ctx)
                    .instrument(info_span!("step", step = %step))
                    .await?;

                if let Outcome::RetryAfter(interval) = outcome {
                    info!("Step {} requested a retry in {:?}", step, interval);
                    return Ok(outcome);
                }
                debug!("Step {} done", step);
            }
            Ok(Outcome::Continue)
        }
        .instrument(span)
        .await
    }

    /// Runs a single step.
    pub async fn run_step(
        &self,
        step: Step,
        ctx: &mut ProvisionContext,
    ) -> Result<Outcome, ProvisionError> {
        match step {
            Step::ValidateRequest => self.validate_request(ctx),
            Step::Namespace => self.resolve_namespace(ctx).await,
            Step::CreateSchematic => self.create_schematic(ctx).await,
            Step::EnsureVolume => self.ensure_volume(ctx).await,
            Step::CreateVolumeClaim => self.ensure_volume_claim(ctx).await,
            Step::SyncMachine => self.sync_machine(ctx).await,
        }
    }

    pub(crate) fn retry(&self) -> Outcome {
        Outcome::RetryAfter(self.config.retry_interval)
    }

    /// Retries after transient platform errors and surfaces the rest.
    pub(crate) fn retry_transient(&self, err: HarvesterError, action: &str) -> Result<Outcome, ProvisionError> {
        if err.is_transient() {
            warn!("Failed to {}, retrying: {}", action, err);
            return Ok(self.retry());
        }
        Err(err.into())
    }
}
