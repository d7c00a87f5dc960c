use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use leadflow_core::{CampaignId, GeneratedEmailId, JobId, LeadId, OwnerId};
use leadflow_outbound::{
    CampaignTemplate, EmailEvent, EnqueueOutcome, GeneratedEmail, JobKind, Lead, LeadStatus,
    LeadUpdate, OutboundJob, WorkerState,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence error.
///
/// "Row absent" is usually an `Ok(None)`; `NotFound` is reserved for writes
/// that target a row which must exist.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait::async_trait]
pub trait LeadStore: Send + Sync {
    async fn get_lead(&self, lead_id: LeadId, owner_id: &OwnerId) -> StoreResult<Option<Lead>>;

    /// Lead whose most recent send carries this provider message id.
    async fn find_by_outbound_message_id(&self, message_id: &str) -> StoreResult<Option<Lead>>;

    /// Most recently updated lead with this (normalized) email, across owners.
    async fn find_latest_by_email(&self, email: &str) -> StoreResult<Option<Lead>>;

    /// Draft leads for an owner, optionally limited to one campaign.
    async fn list_draft_leads(
        &self,
        owner_id: &OwnerId,
        campaign_id: Option<CampaignId>,
    ) -> StoreResult<Vec<Lead>>;

    /// Compare-and-set status write.
    ///
    /// Applies `to` and `update` only if the lead still has status `expected`.
    /// Returns the updated lead, or `None` if the precondition failed (or the
    /// lead does not exist). Derives `has_replied`/`replied_at` when `to` is
    /// `Replied`.
    async fn compare_and_set_status(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        expected: LeadStatus,
        to: LeadStatus,
        update: &LeadUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Lead>>;

    /// Force the lead to `Replied` from whatever status it holds.
    ///
    /// Returns `None` if the lead does not exist or has already replied.
    async fn mark_replied(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Lead>>;
}

#[async_trait::async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get_campaign(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
    ) -> StoreResult<Option<CampaignTemplate>>;

    /// Set `locked_at` if the template is still unlocked.
    /// `None` when the template is missing or already locked.
    async fn lock_campaign(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CampaignTemplate>>;

    /// Replace subject/body if the template is still unlocked.
    async fn update_template(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
        subject: Option<String>,
        body: String,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CampaignTemplate>>;
}

/// Durable outbound job queue.
///
/// A job is claimable when `run_after <= now` and its lease is free (never
/// taken, or taken more than `lease_timeout` ago).
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert an `initial` job due now, unless one already exists for the lead.
    async fn enqueue_initial(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<EnqueueOutcome>;

    /// Insert a `followup` job, unless one already exists for the lead.
    async fn schedule_followup(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        run_after: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<EnqueueOutcome>;

    /// Claim up to `limit` due jobs, oldest `run_after` first. Rows another
    /// caller claimed first are silently left out.
    async fn fetch_and_lock_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> StoreResult<Vec<OutboundJob>>;

    async fn unlock_job(&self, job_id: JobId) -> StoreResult<()>;

    /// Set due time and attempts, releasing the lease.
    async fn reschedule_job(
        &self,
        job_id: JobId,
        run_after: DateTime<Utc>,
        attempts: u32,
    ) -> StoreResult<()>;

    async fn delete_job(&self, job_id: JobId) -> StoreResult<()>;

    /// Delete every `followup` job of a lead; returns how many were removed.
    async fn cancel_followup_jobs_for_lead(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
    ) -> StoreResult<u64>;

    async fn get_job(&self, job_id: JobId) -> StoreResult<Option<OutboundJob>>;

    async fn jobs_for_lead(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
    ) -> StoreResult<Vec<OutboundJob>>;
}

/// Append-only email event log.
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    async fn record_event(&self, event: EmailEvent) -> StoreResult<()>;

    /// Whether the owner has a `sent` event created at or after `since`.
    async fn has_sent_event_since(
        &self,
        owner_id: &OwnerId,
        since: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn events_for_lead(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
    ) -> StoreResult<Vec<EmailEvent>>;
}

#[async_trait::async_trait]
pub trait GeneratedEmailStore: Send + Sync {
    async fn insert_generated(&self, email: GeneratedEmail) -> StoreResult<GeneratedEmail>;

    async fn mark_generated_sent(
        &self,
        id: GeneratedEmailId,
        owner_id: &OwnerId,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Most recently created email of `kind` for a lead.
    async fn latest_generated(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        kind: JobKind,
    ) -> StoreResult<Option<GeneratedEmail>>;
}

/// Singleton worker lifecycle row. Every method creates the row on first use.
#[async_trait::async_trait]
pub trait WorkerStateStore: Send + Sync {
    async fn worker_state(&self) -> StoreResult<WorkerState>;

    /// Set running if not running. Returns `(started, state_after)`.
    async fn start_worker(&self, now: DateTime<Utc>) -> StoreResult<(bool, WorkerState)>;

    /// Increment the empty-tick counter, stopping at `threshold`.
    /// Returns `(stopped_by_this_call, state_after)`.
    async fn increment_empty_tick(
        &self,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<(bool, WorkerState)>;

    async fn reset_empty_tick(&self, now: DateTime<Utc>) -> StoreResult<WorkerState>;

    async fn stop_worker(&self, now: DateTime<Utc>) -> StoreResult<WorkerState>;
}
