//! Store-backed lead status transitions.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use leadflow_core::{LeadId, OwnerId};
use leadflow_outbound::{Lead, LeadStatus, LeadUpdate};

use crate::store::{LeadStore, StoreError, StoreResult};

/// Compare-and-set rounds before a transition gives up with `Conflict`.
const MAX_CAS_ROUNDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(Lead),
    /// The lead is missing (`current == None`) or `current -> to` is illegal.
    NotApplied { current: Option<LeadStatus> },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    pub fn into_lead(self) -> Option<Lead> {
        match self {
            TransitionOutcome::Applied(lead) => Some(lead),
            TransitionOutcome::NotApplied { .. } => None,
        }
    }
}

/// Move a lead to `to`, applying `update` in the same write.
///
/// The write is conditional on the status read just before it. When another
/// writer got there first the lead is re-read and the transition re-checked
/// against the new status.
pub async fn transition<S>(
    store: &S,
    lead_id: LeadId,
    owner_id: &OwnerId,
    to: LeadStatus,
    update: &LeadUpdate,
    now: DateTime<Utc>,
) -> StoreResult<TransitionOutcome>
where
    S: LeadStore + ?Sized,
{
    for round in 0..MAX_CAS_ROUNDS {
        let Some(lead) = store.get_lead(lead_id, owner_id).await? else {
            return Ok(TransitionOutcome::NotApplied { current: None });
        };

        if !lead.status.can_transition_to(to) {
            debug!(lead_id = %lead_id, from = %lead.status, to = %to, "transition rejected");
            return Ok(TransitionOutcome::NotApplied {
                current: Some(lead.status),
            });
        }

        if let Some(updated) = store
            .compare_and_set_status(lead_id, owner_id, lead.status, to, update, now)
            .await?
        {
            debug!(lead_id = %lead_id, from = %lead.status, to = %to, "lead transitioned");
            return Ok(TransitionOutcome::Applied(updated));
        }

        warn!(lead_id = %lead_id, round, "lead status changed concurrently, retrying transition");
    }

    Err(StoreError::Conflict(format!(
        "lead {lead_id}: status kept changing during transition to {to}"
    )))
}
