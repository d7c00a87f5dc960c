//! One bounded unit of outbound work.
//!
//! A tick claims due jobs, generates and sends the email for each, and
//! records the outcome. The lease taken during the claim is the only thing
//! stopping two overlapping ticks from sending the same job.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use leadflow_ai::{EmailGenerator, LeadProfile, PreviousEmail, TemplateInput};
use leadflow_core::Clock;
use leadflow_outbound::{EmailEvent, EmailEventType, GeneratedEmail, JobKind, Lead, LeadStatus, LeadUpdate, OutboundJob};

use crate::config::OutboundConfig;
use crate::delivery::{DeliveryError, DeliveryProvider, OutgoingEmail, SendReceipt};
use crate::store::{OutboundStore, StoreError};
use crate::transition::{TransitionOutcome, transition};

use super::lifecycle::{EmptyTick, LifecycleController};

#[derive(Debug, Error)]
pub enum TickError {
    /// Generator or provider credentials are missing. The in-flight lead was
    /// reverted and every claimed job released.
    #[error("outbound service not configured: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Jobs whose email went out.
    pub processed: usize,
    pub failed: usize,
    /// Jobs claimed this tick.
    pub total: usize,
    /// Released untouched (owner rate limit, campaign not locked).
    pub deferred: usize,
    /// Deleted as stale (lead gone, replied, or out of sequence).
    pub discarded: usize,
    pub should_stop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_tick_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TickReport {
    fn not_running() -> Self {
        Self {
            should_stop: true,
            message: Some("Worker not running".into()),
            ..Self::default()
        }
    }

    fn empty(tick: EmptyTick) -> Self {
        Self {
            should_stop: tick.stopped,
            empty_tick_count: Some(tick.empty_tick_count),
            message: Some("No due jobs".into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Processed,
    Failed,
    Deferred,
    Discarded,
}

pub struct TickEngine {
    store: Arc<dyn OutboundStore>,
    generator: Arc<dyn EmailGenerator>,
    provider: Arc<dyn DeliveryProvider>,
    clock: Arc<dyn Clock>,
    config: OutboundConfig,
    lifecycle: LifecycleController<dyn OutboundStore>,
}

impl TickEngine {
    pub fn new(
        store: Arc<dyn OutboundStore>,
        generator: Arc<dyn EmailGenerator>,
        provider: Arc<dyn DeliveryProvider>,
        clock: Arc<dyn Clock>,
        config: OutboundConfig,
    ) -> Self {
        let lifecycle = LifecycleController::new(Arc::clone(&store), config.empty_tick_threshold);
        Self {
            store,
            generator,
            provider,
            clock,
            config,
            lifecycle,
        }
    }

    pub fn lifecycle(&self) -> &LifecycleController<dyn OutboundStore> {
        &self.lifecycle
    }

    pub fn config(&self) -> &OutboundConfig {
        &self.config
    }

    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickReport, TickError> {
        let now = self.clock.now();

        if !self.lifecycle.is_running().await? {
            return Ok(TickReport::not_running());
        }

        let jobs = self
            .store
            .fetch_and_lock_jobs(self.config.max_jobs_per_tick, now, self.config.lease_timeout)
            .await?;

        if jobs.is_empty() {
            let empty = self.lifecycle.increment_empty_tick_count(now).await?;
            return Ok(TickReport::empty(empty));
        }

        self.lifecycle.reset_empty_tick_count(now).await?;

        let mut report = TickReport {
            total: jobs.len(),
            ..TickReport::default()
        };

        for (index, job) in jobs.iter().enumerate() {
            match self.process_job(job).await {
                Ok(JobOutcome::Processed) => report.processed += 1,
                Ok(JobOutcome::Failed) => report.failed += 1,
                Ok(JobOutcome::Deferred) => report.deferred += 1,
                Ok(JobOutcome::Discarded) => report.discarded += 1,
                Err(TickError::Configuration(message)) => {
                    error!(job_id = %job.id, %message, "aborting tick");
                    self.release(&jobs[index..]).await;
                    return Err(TickError::Configuration(message));
                }
                Err(TickError::Store(e)) => {
                    // The lease stays in place; the job is reclaimed once it expires.
                    error!(job_id = %job.id, lead_id = %job.lead_id, error = %e, "job processing hit a storage error");
                    report.failed += 1;
                }
            }
        }

        info!(
            total = report.total,
            processed = report.processed,
            failed = report.failed,
            deferred = report.deferred,
            discarded = report.discarded,
            "tick finished"
        );
        Ok(report)
    }

    async fn process_job(&self, job: &OutboundJob) -> Result<JobOutcome, TickError> {
        let now = self.clock.now();
        let since = now
            .checked_sub_signed(to_delta(self.config.rate_limit))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        if self.store.has_sent_event_since(&job.owner_id, since).await? {
            debug!(job_id = %job.id, owner_id = %job.owner_id, "owner rate limited, deferring");
            self.store.unlock_job(job.id).await?;
            return Ok(JobOutcome::Deferred);
        }

        let Some(lead) = self.store.get_lead(job.lead_id, &job.owner_id).await? else {
            return self.discard(job, "lead no longer exists").await;
        };

        match job.kind {
            JobKind::Initial => self.send_initial(job, lead).await,
            JobKind::Followup => self.send_followup(job, lead).await,
        }
    }

    async fn send_initial(&self, job: &OutboundJob, lead: Lead) -> Result<JobOutcome, TickError> {
        if !matches!(lead.status, LeadStatus::Queued | LeadStatus::Sending) {
            return self.discard(job, "lead is past its first email").await;
        }
        if !self.claim_for_sending(job).await? {
            return self.discard(job, "lead changed before sending").await;
        }

        let campaign = match self.store.get_campaign(lead.campaign_id, &lead.owner_id).await? {
            Some(campaign) if campaign.is_locked() => campaign,
            Some(_) => {
                debug!(job_id = %job.id, campaign_id = %lead.campaign_id, "campaign not locked, deferring");
                self.move_lead(job, LeadStatus::Queued, &LeadUpdate::none()).await?;
                self.store.unlock_job(job.id).await?;
                return Ok(JobOutcome::Deferred);
            }
            None => {
                self.move_lead(job, LeadStatus::Queued, &LeadUpdate::none()).await?;
                return self.fail_terminally(job, "campaign template not found").await;
            }
        };

        let template = TemplateInput {
            subject: campaign.subject.clone(),
            body: campaign.body.clone(),
        };
        let draft = match self.generator.generate_initial(&template, &profile(&lead)).await {
            Ok(draft) => draft,
            Err(e) => {
                self.move_lead(job, LeadStatus::Queued, &LeadUpdate::none()).await?;
                if e.is_configuration() {
                    return Err(TickError::Configuration(e.to_string()));
                }
                warn!(job_id = %job.id, lead_id = %lead.id, error = %e, "initial email generation failed");
                return self.fail_job(job, &e.to_string()).await;
            }
        };
        if self.replied_since_claim(job).await? {
            return self.discard(job, "lead replied during generation").await;
        }

        let generated = self
            .store
            .insert_generated(GeneratedEmail::new(
                lead.id,
                lead.owner_id.clone(),
                JobKind::Initial,
                draft.subject,
                draft.body,
                self.clock.now(),
            ))
            .await?;

        let receipt = match self.deliver(&lead, &generated).await {
            Ok(receipt) => receipt,
            Err(e) if e.is_configuration() => {
                self.move_lead(job, LeadStatus::Queued, &LeadUpdate::none()).await?;
                return Err(TickError::Configuration(e.to_string()));
            }
            Err(e) => {
                warn!(job_id = %job.id, lead_id = %lead.id, error = %e, "initial email send failed");
                self.record_failure(&lead, &e).await?;
                return self.fail_job(job, &e.to_string()).await;
            }
        };

        let sent_at = self.record_sent(&lead, &generated, &receipt).await?;
        let update = LeadUpdate::none()
            .initial_sent_at(sent_at)
            .last_sent_at(sent_at)
            .clear_last_error()
            .outbound_message_id(&receipt.provider_message_id);

        if self.move_lead(job, LeadStatus::Sent, &update).await?.is_applied() {
            let run_after = sent_at
                .checked_add_signed(to_delta(self.config.followup_delay))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.store
                .schedule_followup(lead.id, &lead.owner_id, run_after, self.config.retry.max_attempts, sent_at)
                .await?;
            self.move_lead(job, LeadStatus::FollowupQueued, &LeadUpdate::none()).await?;
        } else {
            warn!(lead_id = %lead.id, "lead changed during send, no follow-up scheduled");
        }

        self.store.delete_job(job.id).await?;
        info!(
            job_id = %job.id,
            lead_id = %lead.id,
            provider_message_id = %receipt.provider_message_id,
            "initial email sent"
        );
        Ok(JobOutcome::Processed)
    }

    async fn send_followup(&self, job: &OutboundJob, lead: Lead) -> Result<JobOutcome, TickError> {
        if lead.has_replied {
            return self.discard(job, "lead already replied").await;
        }

        let Some(previous) = self
            .store
            .latest_generated(lead.id, &lead.owner_id, JobKind::Initial)
            .await?
        else {
            return self.discard(job, "no initial email to follow up on").await;
        };

        if !self.claim_for_sending(job).await? {
            return self.discard(job, "lead changed before sending").await;
        }

        let previous = PreviousEmail {
            subject: previous.subject,
            body: previous.body,
        };
        let draft = match self.generator.generate_followup(&previous, &profile(&lead)).await {
            Ok(draft) => draft,
            Err(e) => {
                self.move_lead(job, LeadStatus::FollowupQueued, &LeadUpdate::none()).await?;
                if e.is_configuration() {
                    return Err(TickError::Configuration(e.to_string()));
                }
                warn!(job_id = %job.id, lead_id = %lead.id, error = %e, "follow-up generation failed");
                return self.fail_job(job, &e.to_string()).await;
            }
        };
        if self.replied_since_claim(job).await? {
            return self.discard(job, "lead replied during generation").await;
        }

        let generated = self
            .store
            .insert_generated(GeneratedEmail::new(
                lead.id,
                lead.owner_id.clone(),
                JobKind::Followup,
                draft.subject,
                draft.body,
                self.clock.now(),
            ))
            .await?;

        let receipt = match self.deliver(&lead, &generated).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.move_lead(job, LeadStatus::FollowupQueued, &LeadUpdate::none()).await?;
                if e.is_configuration() {
                    return Err(TickError::Configuration(e.to_string()));
                }
                warn!(job_id = %job.id, lead_id = %lead.id, error = %e, "follow-up send failed");
                self.record_failure(&lead, &e).await?;
                return self.fail_job(job, &e.to_string()).await;
            }
        };

        let sent_at = self.record_sent(&lead, &generated, &receipt).await?;
        let update = LeadUpdate::none()
            .followup_sent_at(sent_at)
            .last_sent_at(sent_at)
            .clear_last_error()
            .outbound_message_id(&receipt.provider_message_id);
        if !self.move_lead(job, LeadStatus::FollowupSent, &update).await?.is_applied() {
            warn!(lead_id = %lead.id, "lead changed during follow-up send");
        }

        self.store.delete_job(job.id).await?;
        info!(
            job_id = %job.id,
            lead_id = %lead.id,
            provider_message_id = %receipt.provider_message_id,
            "follow-up email sent"
        );
        Ok(JobOutcome::Processed)
    }

    /// Move the lead to `sending`. A lead already there (a retry after a
    /// failed send) counts as claimed.
    async fn claim_for_sending(&self, job: &OutboundJob) -> Result<bool, TickError> {
        let claimed = match self.move_lead(job, LeadStatus::Sending, &LeadUpdate::none()).await? {
            TransitionOutcome::Applied(_) => true,
            TransitionOutcome::NotApplied { current } => current == Some(LeadStatus::Sending),
        };
        Ok(claimed)
    }

    /// Whether the lead replied (or vanished) after this job claimed it.
    async fn replied_since_claim(&self, job: &OutboundJob) -> Result<bool, TickError> {
        let lead = self.store.get_lead(job.lead_id, &job.owner_id).await?;
        Ok(lead.is_none_or(|lead| lead.has_replied))
    }

    async fn move_lead(
        &self,
        job: &OutboundJob,
        to: LeadStatus,
        update: &LeadUpdate,
    ) -> Result<TransitionOutcome, TickError> {
        let outcome = transition(&*self.store, job.lead_id, &job.owner_id, to, update, self.clock.now()).await?;
        Ok(outcome)
    }

    async fn deliver(&self, lead: &Lead, email: &GeneratedEmail) -> Result<SendReceipt, DeliveryError> {
        self.provider
            .send(&OutgoingEmail {
                to: lead.email.clone(),
                subject: email.subject.clone(),
                body: email.body.clone(),
            })
            .await
    }

    /// Stamp the generated email and log the `sent` event. Returns the send time.
    async fn record_sent(
        &self,
        lead: &Lead,
        email: &GeneratedEmail,
        receipt: &SendReceipt,
    ) -> Result<DateTime<Utc>, TickError> {
        let sent_at = self.clock.now();
        self.store.mark_generated_sent(email.id, &lead.owner_id, sent_at).await?;
        self.store
            .record_event(
                EmailEvent::new(lead.id, lead.owner_id.clone(), EmailEventType::Sent, sent_at)
                    .with_provider_message_id(&receipt.provider_message_id)
                    .with_payload(json!({ "kind": email.kind.as_str(), "subject": email.subject })),
            )
            .await?;
        Ok(sent_at)
    }

    async fn record_failure(&self, lead: &Lead, error: &DeliveryError) -> Result<(), TickError> {
        self.store
            .record_event(
                EmailEvent::new(lead.id, lead.owner_id.clone(), EmailEventType::Failed, self.clock.now())
                    .with_payload(json!({ "error": error.to_string() })),
            )
            .await?;
        Ok(())
    }

    /// Count a failed attempt: reschedule with backoff, or fail the lead once
    /// the job is out of attempts.
    async fn fail_job(&self, job: &OutboundJob, message: &str) -> Result<JobOutcome, TickError> {
        let attempts = job.next_attempt();
        if attempts >= job.max_attempts {
            return self.fail_terminally(job, message).await;
        }

        let delay = self.config.retry.delay_for_attempt(attempts);
        let run_after = self
            .clock
            .now()
            .checked_add_signed(to_delta(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.store.reschedule_job(job.id, run_after, attempts).await?;
        info!(
            job_id = %job.id,
            attempts,
            max_attempts = job.max_attempts,
            retry_in_secs = delay.as_secs(),
            "job rescheduled"
        );
        Ok(JobOutcome::Failed)
    }

    async fn fail_terminally(&self, job: &OutboundJob, message: &str) -> Result<JobOutcome, TickError> {
        self.move_lead(job, LeadStatus::Failed, &LeadUpdate::none().last_error(message))
            .await?;
        self.store.delete_job(job.id).await?;
        warn!(job_id = %job.id, lead_id = %job.lead_id, error = message, "lead failed");
        Ok(JobOutcome::Failed)
    }

    async fn discard(&self, job: &OutboundJob, reason: &str) -> Result<JobOutcome, TickError> {
        self.store.delete_job(job.id).await?;
        debug!(job_id = %job.id, lead_id = %job.lead_id, reason, "stale job discarded");
        Ok(JobOutcome::Discarded)
    }

    async fn release(&self, jobs: &[OutboundJob]) {
        for job in jobs {
            if let Err(e) = self.store.unlock_job(job.id).await {
                warn!(job_id = %job.id, error = %e, "failed to release job lease");
            }
        }
    }
}

fn profile(lead: &Lead) -> LeadProfile {
    LeadProfile {
        name: lead.name.clone(),
        company: lead.company.clone(),
        position: lead.position.clone(),
        notes: lead.notes.clone(),
    }
}

fn to_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
