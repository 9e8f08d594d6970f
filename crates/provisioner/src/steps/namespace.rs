use crate::context::ProvisionContext;
use crate::error::ProvisionError;
use crate::pipeline::{Outcome, Provisioner};
use harvester_client::HarvesterClientTrait;
use tracing::{error, warn};

impl<C: HarvesterClientTrait> Provisioner<C> {
    /// Resolves the configured namespace and records it in the machine state.
    ///
    /// A missing namespace is retried, since it may still be on its way.
    pub(crate) async fn resolve_namespace(
        &self,
        ctx: &mut ProvisionContext,
    ) -> Result<Outcome, ProvisionError> {
        let wanted = ctx.provider_data().namespace.clone();
        if wanted.is_empty() {
            error!("Namespace is not set in provider data");
            return Err(ProvisionError::InvalidConfig("namespace is not set".to_string()));
        }

        match self.client.get_namespace(&wanted).await {
            Ok(namespace) => {
                ctx.state_mut()
                    .set_namespace(namespace.metadata.name.unwrap_or(wanted));
                Ok(Outcome::Continue)
            }
            Err(e) if e.is_not_found() => {
                warn!("Namespace {} not found", wanted);
                Ok(self.retry())
            }
            Err(e) => {
                warn!("Failed to get namespace {}: {}", wanted, e);
                Ok(self.retry())
            }
        }
    }
}
