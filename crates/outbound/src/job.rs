//! Outbound job types.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{DomainError, JobId, LeadId, OwnerId};

use crate::backoff::DEFAULT_MAX_ATTEMPTS;

/// Which email of the sequence a job sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Initial,
    Followup,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Initial => "initial",
            JobKind::Followup => "followup",
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(JobKind::Initial),
            "followup" => Ok(JobKind::Followup),
            other => Err(DomainError::validation(format!("unknown job kind: {other}"))),
        }
    }
}

/// A pending unit of delivery work.
///
/// Jobs are deleted once they reach a terminal outcome, so an existing row is
/// always either waiting for `run_after` or leased by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundJob {
    pub id: JobId,
    pub lead_id: LeadId,
    pub owner_id: OwnerId,
    pub kind: JobKind,
    pub run_after: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Lease stamp; `None` when unclaimed.
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboundJob {
    pub fn new(
        lead_id: LeadId,
        owner_id: OwnerId,
        kind: JobKind,
        run_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            lead_id,
            owner_id,
            kind,
            run_after,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            locked_at: None,
            created_at: now,
        }
    }

    /// Initial job, due immediately.
    pub fn initial(lead_id: LeadId, owner_id: OwnerId, now: DateTime<Utc>) -> Self {
        Self::new(lead_id, owner_id, JobKind::Initial, now, now)
    }

    pub fn followup(
        lead_id: LeadId,
        owner_id: OwnerId,
        run_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(lead_id, owner_id, JobKind::Followup, run_after, now)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_after <= now
    }

    /// `true` when the job has no lease, or its lease is older than `lease_timeout`.
    pub fn lease_is_free(&self, now: DateTime<Utc>, lease_timeout: Duration) -> bool {
        match self.locked_at {
            None => true,
            Some(at) => match chrono::Duration::from_std(lease_timeout) {
                Ok(timeout) => now.signed_duration_since(at) > timeout,
                Err(_) => false,
            },
        }
    }

    /// Due and claimable.
    pub fn is_available(&self, now: DateTime<Utc>, lease_timeout: Duration) -> bool {
        self.is_due(now) && self.lease_is_free(now, lease_timeout)
    }

    /// Attempt count after the current attempt fails.
    pub fn next_attempt(&self) -> u32 {
        self.attempts.saturating_add(1)
    }

    /// Whether failing the current attempt uses up the budget.
    pub fn is_last_attempt(&self) -> bool {
        self.next_attempt() >= self.max_attempts
    }
}

/// Result of an idempotent enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(OutboundJob),
    AlreadyQueued,
}

impl EnqueueOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, EnqueueOutcome::Enqueued(_))
    }
}
