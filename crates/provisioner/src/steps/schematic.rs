use crate::context::{ProvisionContext, SchematicRequest};
use crate::error::ProvisionError;
use crate::pipeline::{Outcome, Provisioner};
use harvester_client::HarvesterClientTrait;
use tracing::info;

impl<C: HarvesterClientTrait> Provisioner<C> {
    /// Assigns the boot schematic for the request's customization.
    pub(crate) async fn create_schematic(
        &self,
        ctx: &mut ProvisionContext,
    ) -> Result<Outcome, ProvisionError> {
        let request = self.schematic_request(ctx);
        let schematic = self.schematics.generate_schematic(&request).await?;
        if schematic.is_empty() {
            return Err(ProvisionError::Schematic("empty schematic id returned".to_string()));
        }

        info!("Using schematic {}", schematic);
        ctx.state_mut().set_schematic(schematic);
        Ok(Outcome::Continue)
    }

    /// Request kernel arguments followed by the configured extra ones.
    pub(crate) fn schematic_request(&self, ctx: &ProvisionContext) -> SchematicRequest {
        let mut kernel_args = ctx.kernel_args().to_vec();
        for arg in &self.config.extra_kernel_args {
            if !kernel_args.contains(arg) {
                kernel_args.push(arg.clone());
            }
        }
        SchematicRequest {
            kernel_args,
            extensions: ctx.extensions().to_vec(),
        }
    }
}
