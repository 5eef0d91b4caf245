//! Preemption message builder.
//!
//! Turns the scheduler's raw preemption intents into the message attached
//! to a heartbeat response:
//!
//! - strict containers → a strict contract (must be given back)
//! - containers + alternative asks → a negotiable contract (give back
//!   these containers, or free resources matching these asks)
//!
//! The negotiable contract needs both halves; either one alone is dropped.

use amrm_core::{Allocation, PreemptionContract, PreemptionMessage, StrictPreemptionContract};

/// Build the preemption message for `allocation`, or `None` when the
/// scheduler wants nothing back.
pub fn build_preemption_message(allocation: &Allocation) -> Option<PreemptionMessage> {
    let strict_contract = (!allocation.strict_preemptions.is_empty()).then(|| {
        StrictPreemptionContract {
            containers: allocation.strict_preemptions.clone(),
        }
    });

    let negotiable = !allocation.container_preemptions.is_empty()
        && !allocation.resource_preemptions.is_empty();
    let contract = negotiable.then(|| PreemptionContract {
        containers: allocation.container_preemptions.clone(),
        resource_requests: allocation.resource_preemptions.clone(),
    });

    if strict_contract.is_none() && contract.is_none() {
        return None;
    }

    Some(PreemptionMessage {
        strict_contract,
        contract,
    })
}
