use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use leadflow_core::{CampaignId, GeneratedEmailId, JobId, LeadId, OwnerId};
use leadflow_outbound::{
    CampaignTemplate, EmailEvent, EmailEventType, EnqueueOutcome, GeneratedEmail, JobKind, Lead,
    LeadStatus, LeadUpdate, OutboundJob, WorkerState, normalize_email,
};

use super::r#trait::{
    CampaignStore, EventLog, GeneratedEmailStore, JobQueue, LeadStore, StoreError, StoreResult,
    WorkerStateStore,
};

#[derive(Debug, Default)]
struct State {
    leads: HashMap<LeadId, Lead>,
    campaigns: HashMap<CampaignId, CampaignTemplate>,
    jobs: HashMap<JobId, OutboundJob>,
    events: Vec<EmailEvent>,
    generated: Vec<GeneratedEmail>,
    worker: WorkerState,
}

/// In-memory implementation of every store trait.
///
/// Intended for tests/dev. All state sits behind one lock, so each operation
/// (including a batch claim) is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".into()))
    }

    /// Seed a lead (lead CRUD lives outside this service).
    pub fn insert_lead(&self, lead: Lead) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.leads.contains_key(&lead.id) {
            return Err(StoreError::Conflict(format!("lead {} already exists", lead.id)));
        }
        state.leads.insert(lead.id, lead);
        Ok(())
    }

    /// Seed a campaign template.
    pub fn insert_campaign(&self, campaign: CampaignTemplate) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.campaigns.contains_key(&campaign.id) {
            return Err(StoreError::Conflict(format!(
                "campaign {} already exists",
                campaign.id
            )));
        }
        state.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    /// Every queued job, oldest `run_after` first.
    pub fn all_jobs(&self) -> StoreResult<Vec<OutboundJob>> {
        let state = self.read()?;
        let mut jobs: Vec<_> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| (j.run_after, j.created_at));
        Ok(jobs)
    }

    fn insert_job_once(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        kind: JobKind,
        run_after: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<EnqueueOutcome> {
        let mut state = self.write()?;
        let exists = state
            .jobs
            .values()
            .any(|j| j.lead_id == lead_id && j.owner_id == *owner_id && j.kind == kind);
        if exists {
            return Ok(EnqueueOutcome::AlreadyQueued);
        }

        let job = OutboundJob::new(lead_id, owner_id.clone(), kind, run_after, now)
            .with_max_attempts(max_attempts);
        state.jobs.insert(job.id, job.clone());
        Ok(EnqueueOutcome::Enqueued(job))
    }
}

#[async_trait::async_trait]
impl LeadStore for InMemoryStore {
    async fn get_lead(&self, lead_id: LeadId, owner_id: &OwnerId) -> StoreResult<Option<Lead>> {
        let state = self.read()?;
        Ok(state
            .leads
            .get(&lead_id)
            .filter(|l| l.owner_id == *owner_id)
            .cloned())
    }

    async fn find_by_outbound_message_id(&self, message_id: &str) -> StoreResult<Option<Lead>> {
        let state = self.read()?;
        Ok(state
            .leads
            .values()
            .filter(|l| l.outbound_message_id.as_deref() == Some(message_id))
            .max_by_key(|l| l.updated_at)
            .cloned())
    }

    async fn find_latest_by_email(&self, email: &str) -> StoreResult<Option<Lead>> {
        let email = normalize_email(email);
        let state = self.read()?;
        Ok(state
            .leads
            .values()
            .filter(|l| l.email == email)
            .max_by_key(|l| l.updated_at)
            .cloned())
    }

    async fn list_draft_leads(
        &self,
        owner_id: &OwnerId,
        campaign_id: Option<CampaignId>,
    ) -> StoreResult<Vec<Lead>> {
        let state = self.read()?;
        let mut leads: Vec<_> = state
            .leads
            .values()
            .filter(|l| {
                l.owner_id == *owner_id
                    && l.status == LeadStatus::Draft
                    && campaign_id.is_none_or(|c| l.campaign_id == c)
            })
            .cloned()
            .collect();
        leads.sort_by_key(|l| l.created_at);
        Ok(leads)
    }

    async fn compare_and_set_status(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        expected: LeadStatus,
        to: LeadStatus,
        update: &LeadUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Lead>> {
        let mut state = self.write()?;
        match state.leads.get_mut(&lead_id) {
            Some(lead) if lead.owner_id == *owner_id && lead.status == expected => {
                lead.apply_transition(to, update, now);
                Ok(Some(lead.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_replied(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Lead>> {
        let mut state = self.write()?;
        match state.leads.get_mut(&lead_id) {
            Some(lead) if lead.owner_id == *owner_id && lead.status != LeadStatus::Replied => {
                lead.apply_transition(LeadStatus::Replied, &LeadUpdate::none(), now);
                Ok(Some(lead.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl CampaignStore for InMemoryStore {
    async fn get_campaign(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
    ) -> StoreResult<Option<CampaignTemplate>> {
        let state = self.read()?;
        Ok(state
            .campaigns
            .get(&campaign_id)
            .filter(|c| c.owner_id == *owner_id)
            .cloned())
    }

    async fn lock_campaign(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CampaignTemplate>> {
        let mut state = self.write()?;
        match state.campaigns.get_mut(&campaign_id) {
            Some(c) if c.owner_id == *owner_id => Ok(c.lock(now).ok().map(|_| c.clone())),
            _ => Ok(None),
        }
    }

    async fn update_template(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
        subject: Option<String>,
        body: String,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CampaignTemplate>> {
        let mut state = self.write()?;
        match state.campaigns.get_mut(&campaign_id) {
            Some(c) if c.owner_id == *owner_id => Ok(c
                .update_template(subject, body, now)
                .ok()
                .map(|_| c.clone())),
            _ => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl JobQueue for InMemoryStore {
    async fn enqueue_initial(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<EnqueueOutcome> {
        self.insert_job_once(lead_id, owner_id, JobKind::Initial, now, max_attempts, now)
    }

    async fn schedule_followup(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        run_after: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<EnqueueOutcome> {
        self.insert_job_once(lead_id, owner_id, JobKind::Followup, run_after, max_attempts, now)
    }

    async fn fetch_and_lock_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> StoreResult<Vec<OutboundJob>> {
        let mut state = self.write()?;

        let mut candidates: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.is_available(now, lease_timeout))
            .map(|j| (j.run_after, j.created_at, j.id))
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, _, id) in candidates {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.locked_at = Some(now);
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn unlock_job(&self, job_id: JobId) -> StoreResult<()> {
        let mut state = self.write()?;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.locked_at = None;
        }
        Ok(())
    }

    async fn reschedule_job(
        &self,
        job_id: JobId,
        run_after: DateTime<Utc>,
        attempts: u32,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        job.run_after = run_after;
        job.attempts = attempts;
        job.locked_at = None;
        Ok(())
    }

    async fn delete_job(&self, job_id: JobId) -> StoreResult<()> {
        let mut state = self.write()?;
        state.jobs.remove(&job_id);
        Ok(())
    }

    async fn cancel_followup_jobs_for_lead(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
    ) -> StoreResult<u64> {
        let mut state = self.write()?;
        let before = state.jobs.len();
        state.jobs.retain(|_, j| {
            !(j.lead_id == lead_id && j.owner_id == *owner_id && j.kind == JobKind::Followup)
        });
        Ok((before - state.jobs.len()) as u64)
    }

    async fn get_job(&self, job_id: JobId) -> StoreResult<Option<OutboundJob>> {
        let state = self.read()?;
        Ok(state.jobs.get(&job_id).cloned())
    }

    async fn jobs_for_lead(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
    ) -> StoreResult<Vec<OutboundJob>> {
        let state = self.read()?;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.lead_id == lead_id && j.owner_id == *owner_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.run_after, j.created_at));
        Ok(jobs)
    }
}

#[async_trait::async_trait]
impl EventLog for InMemoryStore {
    async fn record_event(&self, event: EmailEvent) -> StoreResult<()> {
        let mut state = self.write()?;
        state.events.push(event);
        Ok(())
    }

    async fn has_sent_event_since(
        &self,
        owner_id: &OwnerId,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let state = self.read()?;
        Ok(state.events.iter().any(|e| {
            e.owner_id == *owner_id && e.event_type == EmailEventType::Sent && e.created_at >= since
        }))
    }

    async fn events_for_lead(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
    ) -> StoreResult<Vec<EmailEvent>> {
        let state = self.read()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.lead_id == lead_id && e.owner_id == *owner_id)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl GeneratedEmailStore for InMemoryStore {
    async fn insert_generated(&self, email: GeneratedEmail) -> StoreResult<GeneratedEmail> {
        let mut state = self.write()?;
        state.generated.push(email.clone());
        Ok(email)
    }

    async fn mark_generated_sent(
        &self,
        id: GeneratedEmailId,
        owner_id: &OwnerId,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        let email = state
            .generated
            .iter_mut()
            .find(|g| g.id == id && g.owner_id == *owner_id)
            .ok_or_else(|| StoreError::NotFound(format!("generated email {id}")))?;
        email.sent_at = Some(sent_at);
        Ok(())
    }

    async fn latest_generated(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        kind: JobKind,
    ) -> StoreResult<Option<GeneratedEmail>> {
        let state = self.read()?;
        // `max_by_key` keeps the last maximum, so ties go to the newest insert.
        Ok(state
            .generated
            .iter()
            .filter(|g| g.lead_id == lead_id && g.owner_id == *owner_id && g.kind == kind)
            .max_by_key(|g| g.created_at)
            .cloned())
    }
}

#[async_trait::async_trait]
impl WorkerStateStore for InMemoryStore {
    async fn worker_state(&self) -> StoreResult<WorkerState> {
        Ok(self.read()?.worker.clone())
    }

    async fn start_worker(&self, now: DateTime<Utc>) -> StoreResult<(bool, WorkerState)> {
        let mut state = self.write()?;
        let started = state.worker.start(now);
        Ok((started, state.worker.clone()))
    }

    async fn increment_empty_tick(
        &self,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<(bool, WorkerState)> {
        let mut state = self.write()?;
        let stopped = state.worker.record_empty_tick(threshold, now);
        Ok((stopped, state.worker.clone()))
    }

    async fn reset_empty_tick(&self, now: DateTime<Utc>) -> StoreResult<WorkerState> {
        let mut state = self.write()?;
        state.worker.reset_empty(now);
        Ok(state.worker.clone())
    }

    async fn stop_worker(&self, now: DateTime<Utc>) -> StoreResult<WorkerState> {
        let mut state = self.write()?;
        state.worker.stop(now);
        Ok(state.worker.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{owner, seed_lead};

    const LEASE: Duration = Duration::from_secs(900);

    #[tokio::test]
    async fn enqueue_initial_is_idempotent() {
        let store = InMemoryStore::new();
        let lead = seed_lead(&store, LeadStatus::Draft);
        let now = Utc::now();

        let first = store.enqueue_initial(lead.id, &owner(), 3, now).await.unwrap();
        let second = store.enqueue_initial(lead.id, &owner(), 3, now).await.unwrap();

        assert!(first.is_enqueued());
        assert_eq!(second, EnqueueOutcome::AlreadyQueued);
        assert_eq!(store.jobs_for_lead(lead.id, &owner()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn initial_and_followup_may_coexist() {
        let store = InMemoryStore::new();
        let lead = seed_lead(&store, LeadStatus::Draft);
        let now = Utc::now();

        store.enqueue_initial(lead.id, &owner(), 3, now).await.unwrap();
        let followup = store
            .schedule_followup(lead.id, &owner(), now, 3, now)
            .await
            .unwrap();
        assert!(followup.is_enqueued());
        assert_eq!(store.jobs_for_lead(lead.id, &owner()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn claim_skips_future_and_leased_jobs() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let due = seed_lead(&store, LeadStatus::Queued);
        let later = seed_lead(&store, LeadStatus::Sent);

        store.enqueue_initial(due.id, &owner(), 3, now).await.unwrap();
        store
            .schedule_followup(later.id, &owner(), now + chrono::Duration::seconds(120), 3, now)
            .await
            .unwrap();

        let claimed = store.fetch_and_lock_jobs(10, now, LEASE).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].lead_id, due.id);
        assert_eq!(claimed[0].locked_at, Some(now));

        assert!(store.fetch_and_lock_jobs(10, now, LEASE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_orders_by_run_after_and_respects_limit() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut expected = Vec::new();
        for offset in [30, 10, 20] {
            let lead = seed_lead(&store, LeadStatus::Sent);
            let run_after = now - chrono::Duration::seconds(offset);
            store
                .schedule_followup(lead.id, &owner(), run_after, 3, now)
                .await
                .unwrap();
            expected.push((run_after, lead.id));
        }
        expected.sort();

        let claimed = store.fetch_and_lock_jobs(2, now, LEASE).await.unwrap();
        let got: Vec<_> = claimed.iter().map(|j| (j.run_after, j.lead_id)).collect();
        assert_eq!(got, expected[..2].to_vec());
    }

    #[tokio::test]
    async fn stale_lease_is_reclaimed() {
        let store = InMemoryStore::new();
        let lead = seed_lead(&store, LeadStatus::Queued);
        let now = Utc::now();
        store.enqueue_initial(lead.id, &owner(), 3, now).await.unwrap();

        assert_eq!(store.fetch_and_lock_jobs(10, now, LEASE).await.unwrap().len(), 1);

        let during = now + chrono::Duration::seconds(600);
        assert!(store.fetch_and_lock_jobs(10, during, LEASE).await.unwrap().is_empty());

        let after = now + chrono::Duration::seconds(901);
        let reclaimed = store.fetch_and_lock_jobs(10, after, LEASE).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].locked_at, Some(after));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_overlap() {
        let store = InMemoryStore::arc();
        let now = Utc::now();
        for _ in 0..40 {
            let lead = seed_lead(&store, LeadStatus::Queued);
            store.enqueue_initial(lead.id, &owner(), 3, now).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.fetch_and_lock_jobs(10, now, LEASE).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.extend(h.await.unwrap().into_iter().map(|j| j.id));
        }
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(total, 40);
    }

    #[tokio::test]
    async fn reschedule_releases_lease_and_sets_attempts() {
        let store = InMemoryStore::new();
        let lead = seed_lead(&store, LeadStatus::Queued);
        let now = Utc::now();
        store.enqueue_initial(lead.id, &owner(), 3, now).await.unwrap();
        let job = store.fetch_and_lock_jobs(1, now, LEASE).await.unwrap().remove(0);

        let run_after = now + chrono::Duration::seconds(60);
        store.reschedule_job(job.id, run_after, 1).await.unwrap();

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.run_after, run_after);
        assert_eq!(job.locked_at, None);
    }

    #[tokio::test]
    async fn cancel_followups_leaves_initial_jobs() {
        let store = InMemoryStore::new();
        let lead = seed_lead(&store, LeadStatus::Sent);
        let now = Utc::now();
        store.enqueue_initial(lead.id, &owner(), 3, now).await.unwrap();
        store.schedule_followup(lead.id, &owner(), now, 3, now).await.unwrap();

        assert_eq!(store.cancel_followup_jobs_for_lead(lead.id, &owner()).await.unwrap(), 1);
        assert_eq!(store.cancel_followup_jobs_for_lead(lead.id, &owner()).await.unwrap(), 0);

        let remaining = store.jobs_for_lead(lead.id, &owner()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, JobKind::Initial);
    }

    #[tokio::test]
    async fn compare_and_set_requires_expected_status() {
        let store = InMemoryStore::new();
        let lead = seed_lead(&store, LeadStatus::Sent);
        let now = Utc::now();

        let none = LeadUpdate::none();
        let stale = store
            .compare_and_set_status(lead.id, &owner(), LeadStatus::Queued, LeadStatus::Sending, &none, now)
            .await
            .unwrap();
        assert!(stale.is_none());

        let replied = store
            .compare_and_set_status(lead.id, &owner(), LeadStatus::Sent, LeadStatus::Replied, &none, now)
            .await
            .unwrap()
            .unwrap();
        assert!(replied.has_replied);
        assert_eq!(replied.replied_at, Some(now));
    }

    #[tokio::test]
    async fn owner_scoping_hides_other_owners_rows() {
        let store = InMemoryStore::new();
        let lead = seed_lead(&store, LeadStatus::Draft);
        let stranger = OwnerId::new("someone_else").unwrap();

        assert!(store.get_lead(lead.id, &stranger).await.unwrap().is_none());
        assert!(store.list_draft_leads(&stranger, None).await.unwrap().is_empty());
        assert_eq!(store.list_draft_leads(&owner(), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latest_by_email_prefers_most_recently_updated() {
        let store = InMemoryStore::new();
        let older = seed_lead(&store, LeadStatus::Sent);
        let mut newer =
            Lead::new(owner(), older.campaign_id, "Other", &older.email, Utc::now()).unwrap();
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);
        store.insert_lead(newer.clone()).unwrap();

        let found = store
            .find_latest_by_email(&older.email.to_uppercase())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
    }

    #[tokio::test]
    async fn rate_limit_window_checks_sent_events_only() {
        let store = InMemoryStore::new();
        let lead = seed_lead(&store, LeadStatus::Sent);
        let now = Utc::now();
        store
            .record_event(EmailEvent::new(lead.id, owner(), EmailEventType::Failed, now))
            .await
            .unwrap();
        let since = now - chrono::Duration::seconds(60);
        assert!(!store.has_sent_event_since(&owner(), since).await.unwrap());

        store
            .record_event(EmailEvent::new(lead.id, owner(), EmailEventType::Sent, now))
            .await
            .unwrap();
        assert!(store.has_sent_event_since(&owner(), since).await.unwrap());
        assert!(!store
            .has_sent_event_since(&owner(), now + chrono::Duration::seconds(1))
            .await
            .unwrap());
    }
}
