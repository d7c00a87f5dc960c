//! Owner-scoped operations behind the HTTP surface.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use leadflow_core::{CampaignId, Clock, LeadId, OwnerId};
use leadflow_outbound::{CampaignTemplate, EnqueueOutcome, Lead, LeadStatus, LeadUpdate};

use crate::config::OutboundConfig;
use crate::store::{OutboundStore, StoreError};
use crate::transition::{TransitionOutcome, transition};
use crate::worker::{LifecycleController, StartOutcome};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("campaign {0} must be locked before queueing emails")]
    CampaignNotLocked(CampaignId),

    #[error("campaign {0} is already locked")]
    CampaignLocked(CampaignId),

    #[error("lead cannot move from {from} to {to}")]
    InvalidTransition { from: LeadStatus, to: LeadStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-lead result of a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadStartResult {
    pub lead_id: LeadId,
    pub enqueued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartResult {
    pub worker: StartOutcome,
    pub results: Vec<LeadStartResult>,
}

impl StartResult {
    pub fn enqueued(&self) -> usize {
        self.results.iter().filter(|r| r.enqueued).count()
    }

    pub fn skipped(&self) -> usize {
        self.results.len() - self.enqueued()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkRepliedOutcome {
    pub lead: Lead,
    pub cancelled_followups: u64,
}

pub struct OutboundService {
    store: Arc<dyn OutboundStore>,
    clock: Arc<dyn Clock>,
    config: OutboundConfig,
    lifecycle: LifecycleController<dyn OutboundStore>,
}

impl OutboundService {
    pub fn new(store: Arc<dyn OutboundStore>, clock: Arc<dyn Clock>, config: OutboundConfig) -> Self {
        let lifecycle = LifecycleController::new(Arc::clone(&store), config.empty_tick_threshold);
        Self {
            store,
            clock,
            config,
            lifecycle,
        }
    }

    pub fn lifecycle(&self) -> &LifecycleController<dyn OutboundStore> {
        &self.lifecycle
    }

    /// Queue the owner's draft leads and start the worker.
    ///
    /// With a campaign id only that campaign's drafts are considered, and the
    /// campaign must exist and be locked. Without one, drafts of unlocked
    /// campaigns are skipped.
    pub async fn start(
        &self,
        owner_id: &OwnerId,
        campaign_id: Option<CampaignId>,
    ) -> Result<StartResult, ServiceError> {
        let now = self.clock.now();

        if let Some(campaign_id) = campaign_id {
            let campaign = self
                .store
                .get_campaign(campaign_id, owner_id)
                .await?
                .ok_or(ServiceError::NotFound("campaign"))?;
            if !campaign.is_locked() {
                return Err(ServiceError::CampaignNotLocked(campaign_id));
            }
        }

        let drafts = self.store.list_draft_leads(owner_id, campaign_id).await?;
        let mut locked: HashMap<CampaignId, bool> = HashMap::new();
        let mut results = Vec::with_capacity(drafts.len());

        for lead in drafts {
            let is_locked = match locked.get(&lead.campaign_id) {
                Some(is_locked) => *is_locked,
                None => {
                    let is_locked = self
                        .store
                        .get_campaign(lead.campaign_id, owner_id)
                        .await?
                        .is_some_and(|c| c.is_locked());
                    locked.insert(lead.campaign_id, is_locked);
                    is_locked
                }
            };
            if !is_locked {
                results.push(LeadStartResult {
                    lead_id: lead.id,
                    enqueued: false,
                    reason: Some("campaign_not_locked"),
                });
                continue;
            }

            let enqueued = self
                .store
                .enqueue_initial(lead.id, owner_id, self.config.retry.max_attempts, now)
                .await?;
            // A draft with a job already queued is repaired to `queued` as well.
            let outcome = transition(&*self.store, lead.id, owner_id, LeadStatus::Queued, &LeadUpdate::none(), now).await?;
            if !outcome.is_applied() {
                warn!(lead_id = %lead.id, "draft lead changed status while queueing");
            }

            results.push(match enqueued {
                EnqueueOutcome::Enqueued(_) => LeadStartResult {
                    lead_id: lead.id,
                    enqueued: true,
                    reason: None,
                },
                EnqueueOutcome::AlreadyQueued => LeadStartResult {
                    lead_id: lead.id,
                    enqueued: false,
                    reason: Some("already_queued"),
                },
            });
        }

        let worker = self.lifecycle.start(now).await?;
        let result = StartResult { worker, results };
        info!(
            owner_id = %owner_id,
            enqueued = result.enqueued(),
            skipped = result.skipped(),
            worker_started = result.worker.started,
            "outbound start requested"
        );
        Ok(result)
    }

    /// Manual override for replies the matcher could not see.
    pub async fn mark_replied(
        &self,
        lead_id: LeadId,
        owner_id: &OwnerId,
    ) -> Result<MarkRepliedOutcome, ServiceError> {
        let now = self.clock.now();
        let lead = self
            .store
            .get_lead(lead_id, owner_id)
            .await?
            .ok_or(ServiceError::NotFound("lead"))?;

        let lead = match transition(&*self.store, lead_id, owner_id, LeadStatus::Replied, &LeadUpdate::none(), now).await? {
            TransitionOutcome::Applied(lead) => lead,
            TransitionOutcome::NotApplied { current } => {
                return Err(ServiceError::InvalidTransition {
                    from: current.unwrap_or(lead.status),
                    to: LeadStatus::Replied,
                });
            }
        };

        let cancelled_followups = self.store.cancel_followup_jobs_for_lead(lead_id, owner_id).await?;
        info!(lead_id = %lead_id, cancelled_followups, "lead marked replied");
        Ok(MarkRepliedOutcome {
            lead,
            cancelled_followups,
        })
    }

    pub async fn campaign(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
    ) -> Result<CampaignTemplate, ServiceError> {
        self.store
            .get_campaign(campaign_id, owner_id)
            .await?
            .ok_or(ServiceError::NotFound("campaign"))
    }

    /// One-way: a locked template can no longer be edited.
    pub async fn lock_campaign(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
    ) -> Result<CampaignTemplate, ServiceError> {
        match self.store.lock_campaign(campaign_id, owner_id, self.clock.now()).await? {
            Some(campaign) => {
                info!(campaign_id = %campaign_id, "campaign locked");
                Ok(campaign)
            }
            None => Err(self.missing_or_locked(campaign_id, owner_id).await),
        }
    }

    pub async fn update_template(
        &self,
        campaign_id: CampaignId,
        owner_id: &OwnerId,
        subject: Option<String>,
        body: String,
    ) -> Result<CampaignTemplate, ServiceError> {
        match self
            .store
            .update_template(campaign_id, owner_id, subject, body, self.clock.now())
            .await?
        {
            Some(campaign) => Ok(campaign),
            None => Err(self.missing_or_locked(campaign_id, owner_id).await),
        }
    }

    async fn missing_or_locked(&self, campaign_id: CampaignId, owner_id: &OwnerId) -> ServiceError {
        match self.store.get_campaign(campaign_id, owner_id).await {
            Ok(Some(_)) => ServiceError::CampaignLocked(campaign_id),
            Ok(None) => ServiceError::NotFound("campaign"),
            Err(e) => ServiceError::Store(e),
        }
    }
}
