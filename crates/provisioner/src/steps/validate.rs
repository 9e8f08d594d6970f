use crate::context::ProvisionContext;
use crate::error::ProvisionError;
use crate::pipeline::{Outcome, Provisioner, MAX_REQUEST_ID_LEN};
use harvester_client::HarvesterClientTrait;
use tracing::error;

impl<C: HarvesterClientTrait> Provisioner<C> {
    /// Rejects request ids that cannot name Harvester resources.
    pub(crate) fn validate_request(&self, ctx: &ProvisionContext) -> Result<Outcome, ProvisionError> {
        let request_id = ctx.request_id();
        if request_id.is_empty() {
            return Err(ProvisionError::Validation("machine request id is empty".to_string()));
        }
        if request_id.len() > MAX_REQUEST_ID_LEN {
            error!("Machine request id {} is {} characters long", request_id, request_id.len());
            return Err(ProvisionError::Validation(format!(
                "machine request id can not be longer than {} characters",
                MAX_REQUEST_ID_LEN
            )));
        }
        Ok(Outcome::Continue)
    }
}
