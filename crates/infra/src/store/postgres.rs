//! Postgres-backed outbound store.
//!
//! Every lead, campaign and job query includes `owner_id` in its predicate,
//! except the two correlation lookups the webhook path needs.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Other | N/A | `Storage` |
//!
//! Status and kind columns are TEXT with CHECK constraints; rows that fail to
//! parse back into domain enums surface as `Storage`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use leadflow_core::{CampaignId, GeneratedEmailId, JobId, LeadId, OwnerId};
use leadflow_outbound::{
    CampaignTemplate, EmailEvent, EmailEventType, EnqueueOutcome, GeneratedEmail, JobKind, Lead, LeadStatus,
    LeadUpdate, OUTBOUND_WORKER_ID, OutboundJob, WorkerState,
};

use super::r#trait::{
    CampaignStore, EventLog, GeneratedEmailStore, JobQueue, LeadStore, StoreError, StoreResult, WorkerStateStore,
};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_worker_row(&self) -> StoreResult<()> {
        sqlx::query("INSERT INTO worker_state (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(OUTBOUND_WORKER_ID)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_worker_row", e))?;
        Ok(())
    }

    async fn insert_job(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        kind: JobKind,
        run_after: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<EnqueueOutcome> {
        let job = OutboundJob::new(lead_id, owner_id.clone(), kind, run_after, now).with_max_attempts(max_attempts);
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO outbound_jobs (id, lead_id, owner_id, kind, run_after, attempts, max_attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7)
            ON CONFLICT (lead_id, kind) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(lead_id.as_uuid())
        .bind(owner_id.as_str())
        .bind(kind.as_str())
        .bind(run_after)
        .bind(to_i32(max_attempts))
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        match row {
            Some(row) => Ok(EnqueueOutcome::Enqueued(row.try_into()?)),
            None => Ok(EnqueueOutcome::AlreadyQueued),
        }
    }
}

#[async_trait::async_trait]
impl LeadStore for PostgresStore {
    #[instrument(skip(self), fields(lead_id = %lead_id), err)]
    async fn get_lead(&self, lead_id: LeadId, owner_id: &OwnerId) -> StoreResult<Option<Lead>> {
        sqlx::query_as::<_, LeadRow>("SELECT * FROM leads WHERE id = $1 AND owner_id = $2")
            .bind(lead_id.as_uuid())
            .bind(owner_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_lead", e))?
            .map(Lead::try_from)
            .transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_outbound_message_id(&self, message_id: &str) -> StoreResult<Option<Lead>> {
        sqlx::query_as::<_, LeadRow>(
            "SELECT * FROM leads WHERE outbound_message_id = $1 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(message_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_outbound_message_id", e))?
        .map(Lead::try_from)
        .transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_latest_by_email(&self, email: &str) -> StoreResult<Option<Lead>> {
        sqlx::query_as::<_, LeadRow>("SELECT * FROM leads WHERE email = $1 ORDER BY updated_at DESC LIMIT 1")
            .bind(leadflow_outbound::normalize_email(email))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_latest_by_email", e))?
            .map(Lead::try_from)
            .transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_draft_leads(
        &self,
        owner_id: &OwnerId,
        campaign_id: Option<CampaignId>,
    ) -> StoreResult<Vec<Lead>> {
        let rows = sqlx::query_as::<_, LeadRow>(
            r#"
            SELECT * FROM leads
            WHERE owner_id = $1
              AND status = 'draft'
              AND ($2::uuid IS NULL OR campaign_id = $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(owner_id.as_str())
        .bind(campaign_id.map(|c| *c.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_draft_leads", e))?;

        rows.into_iter().map(Lead::try_from).collect()
    }

    #[instrument(skip(self, update), fields(lead_id = %lead_id, from = %expected, to = %to), err)]
    async fn compare_and_set_status(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        expected: LeadStatus,
        to: LeadStatus,
        update: &LeadUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Lead>> {
        sqlx::query_as::<_, LeadRow>(
            r#"
            UPDATE leads
            SET status = $4,
                updated_at = $5,
                initial_sent_at = COALESCE($6, initial_sent_at),
                followup_sent_at = COALESCE($7, followup_sent_at),
                last_sent_at = COALESCE($8, last_sent_at),
                last_error = CASE WHEN $9 THEN $10 ELSE last_error END,
                outbound_message_id = COALESCE($11, outbound_message_id),
                has_replied = CASE WHEN $4 = 'replied' THEN TRUE ELSE has_replied END,
                replied_at = CASE WHEN $4 = 'replied' THEN $5 ELSE replied_at END
            WHERE id = $1 AND owner_id = $2 AND status = $3
            RETURNING *
            "#,
        )
        .bind(lead_id.as_uuid())
        .bind(owner_id.as_str())
        .bind(expected.as_str())
        .bind(to.as_str())
        .bind(now)
        .bind(update.initial_sent_at)
        .bind(update.followup_sent_at)
        .bind(update.last_sent_at)
        .bind(update.last_error.is_some())
        .bind(update.last_error.clone().flatten())
        .bind(update.outbound_message_id.clone())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("compare_and_set_status", e))?
        .map(Lead::try_from)
        .transpose()
    }

    #[instrument(skip(self), fields(lead_id = %lead_id), err)]
    async fn mark_replied(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Lead>> {
        sqlx::query_as::<_, LeadRow>(
            r#"
            UPDATE leads
            SET status = 'replied', has_replied = TRUE, replied_at = $3, updated_at = $3
            WHERE id = $1 AND owner_id = $2 AND status <> 'replied'
            RETURNING *
            "#,
        )
        .bind(lead_id.as_uuid())
        .bind(owner_id.as_str())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_replied", e))?
        .map(Lead::try_from)
        .transpose()
    }
}

#[async_trait::async_trait]
impl CampaignStore for PostgresStore {
    #[instrument(skip(self), fields(campaign_id = %campaign_id), err)]
    async fn get_campaign(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
    ) -> StoreResult<Option<CampaignTemplate>> {
        sqlx::query_as::<_, CampaignRow>("SELECT * FROM campaign_templates WHERE id = $1 AND owner_id = $2")
            .bind(campaign_id.as_uuid())
            .bind(owner_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_campaign", e))?
            .map(CampaignTemplate::try_from)
            .transpose()
    }

    #[instrument(skip(self), fields(campaign_id = %campaign_id), err)]
    async fn lock_campaign(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CampaignTemplate>> {
        sqlx::query_as::<_, CampaignRow>(
            r#"
            UPDATE campaign_templates
            SET locked_at = $3, updated_at = $3
            WHERE id = $1 AND owner_id = $2 AND locked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(campaign_id.as_uuid())
        .bind(owner_id.as_str())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("lock_campaign", e))?
        .map(CampaignTemplate::try_from)
        .transpose()
    }

    #[instrument(skip(self, body), fields(campaign_id = %campaign_id), err)]
    async fn update_template(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
        subject: Option<String>,
        body: String,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CampaignTemplate>> {
        sqlx::query_as::<_, CampaignRow>(
            r#"
            UPDATE campaign_templates
            SET subject = $3, body = $4, updated_at = $5
            WHERE id = $1 AND owner_id = $2 AND locked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(campaign_id.as_uuid())
        .bind(owner_id.as_str())
        .bind(subject)
        .bind(body)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_template", e))?
        .map(CampaignTemplate::try_from)
        .transpose()
    }
}

#[async_trait::async_trait]
impl JobQueue for PostgresStore {
    #[instrument(skip(self), fields(lead_id = %lead_id), err)]
    async fn enqueue_initial(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<EnqueueOutcome> {
        self.insert_job(lead_id, owner_id, JobKind::Initial, now, max_attempts, now)
            .await
    }

    #[instrument(skip(self), fields(lead_id = %lead_id), err)]
    async fn schedule_followup(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        run_after: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<EnqueueOutcome> {
        self.insert_job(lead_id, owner_id, JobKind::Followup, run_after, max_attempts, now)
            .await
    }

    /// `SKIP LOCKED` keeps concurrent claimers off each other's rows; the
    /// outer lease predicate drops rows whose lease changed after selection.
    #[instrument(skip(self), err)]
    async fn fetch_and_lock_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> StoreResult<Vec<OutboundJob>> {
        let stale_before = chrono::Duration::from_std(lease_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE outbound_jobs
            SET locked_at = $1
            WHERE id IN (
                SELECT id FROM outbound_jobs
                WHERE run_after <= $1
                  AND (locked_at IS NULL OR locked_at < $2)
                ORDER BY run_after ASC, created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            AND (locked_at IS NULL OR locked_at < $2)
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(stale_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_and_lock_jobs", e))?;

        let mut jobs = rows
            .into_iter()
            .map(OutboundJob::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        jobs.sort_by_key(|j| (j.run_after, j.created_at, *j.id.as_uuid()));
        Ok(jobs)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn unlock_job(&self, job_id: JobId) -> StoreResult<()> {
        sqlx::query("UPDATE outbound_jobs SET locked_at = NULL WHERE id = $1")
            .bind(job_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("unlock_job", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn reschedule_job(
        &self,
        job_id: JobId,
        run_after: DateTime<Utc>,
        attempts: u32,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE outbound_jobs SET run_after = $2, attempts = $3, locked_at = NULL WHERE id = $1")
            .bind(job_id.as_uuid())
            .bind(run_after)
            .bind(to_i32(attempts))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("reschedule_job", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn delete_job(&self, job_id: JobId) -> StoreResult<()> {
        sqlx::query("DELETE FROM outbound_jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(lead_id = %lead_id), err)]
    async fn cancel_followup_jobs_for_lead(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM outbound_jobs WHERE lead_id = $1 AND owner_id = $2 AND kind = 'followup'",
        )
        .bind(lead_id.as_uuid())
        .bind(owner_id.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("cancel_followup_jobs_for_lead", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_job(&self, job_id: JobId) -> StoreResult<Option<OutboundJob>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM outbound_jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?
            .map(OutboundJob::try_from)
            .transpose()
    }

    #[instrument(skip(self), fields(lead_id = %lead_id), err)]
    async fn jobs_for_lead(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
    ) -> StoreResult<Vec<OutboundJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM outbound_jobs WHERE lead_id = $1 AND owner_id = $2 ORDER BY run_after ASC, created_at ASC",
        )
        .bind(lead_id.as_uuid())
        .bind(owner_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("jobs_for_lead", e))?;

        rows.into_iter().map(OutboundJob::try_from).collect()
    }
}

#[async_trait::async_trait]
impl EventLog for PostgresStore {
    #[instrument(skip(self, event), fields(lead_id = %event.lead_id, event_type = %event.event_type), err)]
    async fn record_event(&self, event: EmailEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO email_events (id, lead_id, owner_id, event_type, provider_message_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.lead_id.as_uuid())
        .bind(event.owner_id.as_str())
        .bind(event.event_type.as_str())
        .bind(event.provider_message_id)
        .bind(event.payload)
        .bind(event.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_event", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn has_sent_event_since(
        &self,
        owner_id: &OwnerId,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM email_events
                WHERE owner_id = $1 AND event_type = 'sent' AND created_at >= $2
            )
            "#,
        )
        .bind(owner_id.as_str())
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_sent_event_since", e))?;
        Ok(exists)
    }

    #[instrument(skip(self), fields(lead_id = %lead_id), err)]
    async fn events_for_lead(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
    ) -> StoreResult<Vec<EmailEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT * FROM email_events WHERE lead_id = $1 AND owner_id = $2 ORDER BY created_at ASC",
        )
        .bind(lead_id.as_uuid())
        .bind(owner_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("events_for_lead", e))?;

        rows.into_iter().map(EmailEvent::try_from).collect()
    }
}

#[async_trait::async_trait]
impl GeneratedEmailStore for PostgresStore {
    #[instrument(skip(self, email), fields(lead_id = %email.lead_id, kind = %email.kind), err)]
    async fn insert_generated(&self, email: GeneratedEmail) -> StoreResult<GeneratedEmail> {
        sqlx::query(
            r#"
            INSERT INTO generated_emails (id, lead_id, owner_id, kind, subject, body, sent_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(email.id.as_uuid())
        .bind(email.lead_id.as_uuid())
        .bind(email.owner_id.as_str())
        .bind(email.kind.as_str())
        .bind(&email.subject)
        .bind(&email.body)
        .bind(email.sent_at)
        .bind(email.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_generated", e))?;
        Ok(email)
    }

    #[instrument(skip(self), err)]
    async fn mark_generated_sent(
        &self,
        id: GeneratedEmailId,
        owner_id: &OwnerId,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE generated_emails SET sent_at = $3 WHERE id = $1 AND owner_id = $2")
            .bind(id.as_uuid())
            .bind(owner_id.as_str())
            .bind(sent_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_generated_sent", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(lead_id = %lead_id), err)]
    async fn latest_generated(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
        kind: JobKind,
    ) -> StoreResult<Option<GeneratedEmail>> {
        sqlx::query_as::<_, GeneratedRow>(
            r#"
            SELECT * FROM generated_emails
            WHERE lead_id = $1 AND owner_id = $2 AND kind = $3
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(lead_id.as_uuid())
        .bind(owner_id.as_str())
        .bind(kind.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_generated", e))?
        .map(GeneratedEmail::try_from)
        .transpose()
    }
}

#[async_trait::async_trait]
impl WorkerStateStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn worker_state(&self) -> StoreResult<WorkerState> {
        self.ensure_worker_row().await?;
        let row = sqlx::query_as::<_, WorkerRow>("SELECT * FROM worker_state WHERE id = $1")
            .bind(OUTBOUND_WORKER_ID)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("worker_state", e))?;
        Ok(row.into())
    }

    #[instrument(skip(self), err)]
    async fn start_worker(&self, now: DateTime<Utc>) -> StoreResult<(bool, WorkerState)> {
        self.ensure_worker_row().await?;
        let started = sqlx::query_as::<_, WorkerRow>(
            r#"
            UPDATE worker_state
            SET is_running = TRUE,
                empty_tick_count = 0,
                started_at = $2,
                stopped_at = NULL,
                last_tick_at = NULL
            WHERE id = $1 AND is_running = FALSE
            RETURNING *
            "#,
        )
        .bind(OUTBOUND_WORKER_ID)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("start_worker", e))?;

        match started {
            Some(row) => Ok((true, row.into())),
            None => Ok((false, self.worker_state().await?)),
        }
    }

    #[instrument(skip(self), err)]
    async fn increment_empty_tick(
        &self,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<(bool, WorkerState)> {
        self.ensure_worker_row().await?;
        // SET expressions see the pre-update row; `prev` carries the old flag out.
        let row = sqlx::query_as::<_, IncrementRow>(
            r#"
            WITH prev AS (
                SELECT id, is_running FROM worker_state WHERE id = $1 FOR UPDATE
            )
            UPDATE worker_state w
            SET empty_tick_count = w.empty_tick_count + 1,
                last_tick_at = $2,
                is_running = CASE WHEN w.is_running AND w.empty_tick_count + 1 >= $3 THEN FALSE ELSE w.is_running END,
                stopped_at = CASE WHEN w.is_running AND w.empty_tick_count + 1 >= $3 THEN $2 ELSE w.stopped_at END
            FROM prev
            WHERE w.id = prev.id
            RETURNING w.id, w.is_running, w.empty_tick_count, w.last_tick_at, w.started_at, w.stopped_at,
                      prev.is_running AS was_running
            "#,
        )
        .bind(OUTBOUND_WORKER_ID)
        .bind(now)
        .bind(to_i32(threshold))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("increment_empty_tick", e))?;

        let stopped = row.was_running && !row.state.is_running;
        Ok((stopped, row.state.into()))
    }

    #[instrument(skip(self), err)]
    async fn reset_empty_tick(&self, now: DateTime<Utc>) -> StoreResult<WorkerState> {
        self.ensure_worker_row().await?;
        let row = sqlx::query_as::<_, WorkerRow>(
            "UPDATE worker_state SET empty_tick_count = 0, last_tick_at = $2 WHERE id = $1 RETURNING *",
        )
        .bind(OUTBOUND_WORKER_ID)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_empty_tick", e))?;
        Ok(row.into())
    }

    #[instrument(skip(self), err)]
    async fn stop_worker(&self, now: DateTime<Utc>) -> StoreResult<WorkerState> {
        self.ensure_worker_row().await?;
        let row = sqlx::query_as::<_, WorkerRow>(
            r#"
            UPDATE worker_state
            SET is_running = FALSE,
                stopped_at = CASE WHEN is_running THEN $2 ELSE stopped_at END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(OUTBOUND_WORKER_ID)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stop_worker", e))?;
        Ok(row.into())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {operation}")),
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(format!("invalid {what} in row: {err}"))
}

// SQLx row types

#[derive(Debug, FromRow)]
struct LeadRow {
    id: uuid::Uuid,
    owner_id: String,
    campaign_id: uuid::Uuid,
    name: String,
    email: String,
    company: Option<String>,
    position: Option<String>,
    notes: Option<String>,
    status: String,
    last_sent_at: Option<DateTime<Utc>>,
    initial_sent_at: Option<DateTime<Utc>>,
    followup_sent_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    has_replied: bool,
    replied_at: Option<DateTime<Utc>>,
    outbound_message_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LeadRow> for Lead {
    type Error = StoreError;

    fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
        Ok(Lead {
            id: LeadId::from_uuid(row.id),
            owner_id: OwnerId::new(row.owner_id).map_err(|e| corrupt("owner id", e))?,
            campaign_id: CampaignId::from_uuid(row.campaign_id),
            name: row.name,
            email: row.email,
            company: row.company,
            position: row.position,
            notes: row.notes,
            status: row.status.parse().map_err(|e| corrupt("lead status", e))?,
            last_sent_at: row.last_sent_at,
            initial_sent_at: row.initial_sent_at,
            followup_sent_at: row.followup_sent_at,
            last_error: row.last_error,
            has_replied: row.has_replied,
            replied_at: row.replied_at,
            outbound_message_id: row.outbound_message_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CampaignRow {
    id: uuid::Uuid,
    owner_id: String,
    name: String,
    subject: Option<String>,
    body: String,
    locked_at: Option<DateTime<Utc>>,
    preview_subject: Option<String>,
    preview_body: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for CampaignTemplate {
    type Error = StoreError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        Ok(CampaignTemplate {
            id: CampaignId::from_uuid(row.id),
            owner_id: OwnerId::new(row.owner_id).map_err(|e| corrupt("owner id", e))?,
            name: row.name,
            subject: row.subject,
            body: row.body,
            locked_at: row.locked_at,
            preview_subject: row.preview_subject,
            preview_body: row.preview_body,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: uuid::Uuid,
    lead_id: uuid::Uuid,
    owner_id: String,
    kind: String,
    run_after: DateTime<Utc>,
    attempts: i32,
    max_attempts: i32,
    locked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for OutboundJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(OutboundJob {
            id: JobId::from_uuid(row.id),
            lead_id: LeadId::from_uuid(row.lead_id),
            owner_id: OwnerId::new(row.owner_id).map_err(|e| corrupt("owner id", e))?,
            kind: row.kind.parse().map_err(|e| corrupt("job kind", e))?,
            run_after: row.run_after,
            attempts: to_u32(row.attempts),
            max_attempts: to_u32(row.max_attempts),
            locked_at: row.locked_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: uuid::Uuid,
    lead_id: uuid::Uuid,
    owner_id: String,
    event_type: String,
    provider_message_id: Option<String>,
    payload: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for EmailEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type: EmailEventType = row.event_type.parse().map_err(|e| corrupt("event type", e))?;
        Ok(EmailEvent {
            id: leadflow_core::EmailEventId::from_uuid(row.id),
            lead_id: LeadId::from_uuid(row.lead_id),
            owner_id: OwnerId::new(row.owner_id).map_err(|e| corrupt("owner id", e))?,
            event_type,
            provider_message_id: row.provider_message_id,
            payload: row.payload,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct GeneratedRow {
    id: uuid::Uuid,
    lead_id: uuid::Uuid,
    owner_id: String,
    kind: String,
    subject: String,
    body: String,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<GeneratedRow> for GeneratedEmail {
    type Error = StoreError;

    fn try_from(row: GeneratedRow) -> Result<Self, Self::Error> {
        Ok(GeneratedEmail {
            id: GeneratedEmailId::from_uuid(row.id),
            lead_id: LeadId::from_uuid(row.lead_id),
            owner_id: OwnerId::new(row.owner_id).map_err(|e| corrupt("owner id", e))?,
            kind: row.kind.parse().map_err(|e| corrupt("email kind", e))?,
            subject: row.subject,
            body: row.body,
            sent_at: row.sent_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WorkerRow {
    id: String,
    is_running: bool,
    empty_tick_count: i32,
    last_tick_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct IncrementRow {
    #[sqlx(flatten)]
    state: WorkerRow,
    was_running: bool,
}

impl From<WorkerRow> for WorkerState {
    fn from(row: WorkerRow) -> Self {
        WorkerState {
            id: row.id,
            is_running: row.is_running,
            empty_tick_count: to_u32(row.empty_tick_count),
            last_tick_at: row.last_tick_at,
            started_at: row.started_at,
            stopped_at: row.stopped_at,
        }
    }
}
