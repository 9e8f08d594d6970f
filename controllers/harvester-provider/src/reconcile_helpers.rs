//! Helper functions for reconciliation
//!
//! Pure functions mapping pipeline results onto `MachineRequest` status and
//! controller actions.

use crate::backoff::FibonacciBackoff;
use chrono::{DateTime, Utc};
use crds::{MachineRequest, MachineRequestStatus, MachineState, ProvisionPhase};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use provisioner::{Outcome, ProvisionContext, ProvisionError};
use serde_json::Value;
use std::time::Duration;

/// Periodic re-check interval for provisioned machines.
pub const REQUEUE_AFTER_PROVISIONED: Duration = Duration::from_secs(300);

/// Provisioning context for a request, resuming from its persisted state.
pub fn context_for(request: &MachineRequest) -> ProvisionContext {
    ProvisionContext::new(
        request.name_any(),
        &request.spec.talos_version,
        request.spec.provider_data.clone(),
    )
    .with_kernel_args(request.spec.kernel_args.clone())
    .with_extensions(request.spec.extensions.clone())
    .with_state(request.machine_state())
}

/// Status after a pipeline run.
///
/// Successful runs reset the failure count; fatal errors increment it.
pub fn next_status(
    previous: Option<&MachineRequestStatus>,
    generation: Option<i64>,
    state: MachineState,
    machine_uuid: Option<String>,
    result: &Result<Outcome, ProvisionError>,
    now: DateTime<Utc>,
) -> MachineRequestStatus {
    let previous_failures = previous.map_or(0, |status| status.failures);
    let (phase, failures, error) = match result {
        Ok(Outcome::Continue) => (ProvisionPhase::Provisioned, 0, None),
        Ok(Outcome::RetryAfter(_)) => (ProvisionPhase::Provisioning, 0, None),
        Err(e) => (
            ProvisionPhase::Failed,
            previous_failures.saturating_add(1),
            Some(e.to_string()),
        ),
    };

    MachineRequestStatus {
        state,
        phase,
        machine_uuid: machine_uuid.or_else(|| previous.and_then(|status| status.machine_uuid.clone())),
        failures,
        observed_generation: generation,
        last_reconciled: Some(now),
        error,
    }
}

/// Whether the status differs from the current one in anything but the timestamp.
pub fn status_needs_update(current: Option<&MachineRequestStatus>, next: &MachineRequestStatus) -> bool {
    let Some(current) = current else {
        return true;
    };

    current.state != next.state
        || current.phase != next.phase
        || current.machine_uuid != next.machine_uuid
        || current.failures != next.failures
        || current.observed_generation != next.observed_generation
        || current.error != next.error
}

/// Merge patch writing `status`; a cleared error is removed explicitly.
pub fn status_patch(status: &MachineRequestStatus) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(status)?;
    if status.error.is_none() {
        value["error"] = Value::Null;
    }
    Ok(serde_json::json!({ "status": value }))
}

/// Controller action for a completed pipeline run.
pub fn action_for(outcome: Outcome) -> Action {
    match outcome {
        Outcome::Continue => Action::requeue(REQUEUE_AFTER_PROVISIONED),
        Outcome::RetryAfter(interval) => Action::requeue(interval),
    }
}

/// Metric label for a pipeline run.
pub fn outcome_label(result: &Result<Outcome, ProvisionError>) -> &'static str {
    match result {
        Ok(Outcome::Continue) => "provisioned",
        Ok(Outcome::RetryAfter(_)) => "retry",
        Err(_) => "failed",
    }
}

/// Time left before a failed request may be retried.
///
/// `None` unless the request failed for its current generation and the
/// backoff for its failure count has not elapsed yet.
pub fn failure_backoff_remaining(
    request: &MachineRequest,
    backoff: &FibonacciBackoff,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let status = request.status.as_ref()?;
    if status.phase != ProvisionPhase::Failed || status.observed_generation != request.metadata.generation {
        return None;
    }

    let last = status.last_reconciled?;
    let elapsed = (now - last).to_std().unwrap_or_default();
    backoff
        .for_failures(status.failures)
        .checked_sub(elapsed)
        .filter(|remaining| !remaining.is_zero())
}
