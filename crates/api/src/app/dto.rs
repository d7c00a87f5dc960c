//! Request/response bodies. JSON is camelCase throughout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{CampaignId, LeadId};
use leadflow_infra::{LeadStartResult, MarkRepliedOutcome, MatchOutcome, StartResult};
use leadflow_outbound::{CampaignTemplate, LeadStatus, WorkerState};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub campaign_id: Option<CampaignId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub worker_started: bool,
    pub worker_already_running: bool,
    pub enqueued: usize,
    pub skipped: usize,
    pub results: Vec<LeadStartResult>,
}

impl From<StartResult> for StartResponse {
    fn from(result: StartResult) -> Self {
        Self {
            worker_started: result.worker.started,
            worker_already_running: result.worker.already_running,
            enqueued: result.enqueued(),
            skipped: result.skipped(),
            results: result.results,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatusResponse {
    pub is_running: bool,
    pub empty_tick_count: u32,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl From<WorkerState> for WorkerStatusResponse {
    fn from(state: WorkerState) -> Self {
        Self {
            is_running: state.is_running,
            empty_tick_count: state.empty_tick_count,
            last_tick_at: state.last_tick_at,
            started_at: state.started_at,
            stopped_at: state.stopped_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRepliedResponse {
    pub lead_id: LeadId,
    pub status: LeadStatus,
    pub has_replied: bool,
    pub replied_at: Option<DateTime<Utc>>,
    pub cancelled_followups: u64,
}

impl From<MarkRepliedOutcome> for MarkRepliedResponse {
    fn from(outcome: MarkRepliedOutcome) -> Self {
        Self {
            lead_id: outcome.lead.id,
            status: outcome.lead.status,
            has_replied: outcome.lead.has_replied,
            replied_at: outcome.lead.replied_at,
            cancelled_followups: outcome.cancelled_followups,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignResponse {
    pub id: CampaignId,
    pub name: String,
    pub subject: Option<String>,
    pub body: String,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<CampaignTemplate> for CampaignResponse {
    fn from(campaign: CampaignTemplate) -> Self {
        Self {
            is_locked: campaign.is_locked(),
            id: campaign.id,
            name: campaign.name,
            subject: campaign.subject,
            body: campaign.body,
            locked_at: campaign.locked_at,
            updated_at: campaign.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    pub subject: Option<String>,
    pub body: String,
}

/// Provider webhook envelope. `data` is decoded per event type.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `email.received`: headers and body are not included and must be fetched.
#[derive(Debug, Default, Deserialize)]
pub struct ReceivedData {
    pub email_id: Option<String>,
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    pub subject: Option<String>,
}

/// `email.bounced` and `email.delivery_delayed`.
#[derive(Debug, Deserialize)]
pub struct BounceData {
    pub email_id: String,
    #[serde(default)]
    pub to: Vec<String>,
    pub bounce: Option<BounceDetail>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BounceDetail {
    #[serde(rename = "type", default)]
    pub bounce_type: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub received: bool,
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<LeadId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounce_type: Option<String>,
}

impl WebhookResponse {
    pub fn ignored(reason: &'static str) -> Self {
        Self {
            received: true,
            processed: false,
            reason: Some(reason),
            lead_id: None,
            bounce_type: None,
        }
    }

    pub fn from_outcome(outcome: &MatchOutcome) -> Self {
        Self {
            received: true,
            processed: outcome.processed(),
            reason: outcome.reason(),
            lead_id: outcome.lead_id(),
            bounce_type: None,
        }
    }

    pub fn with_bounce_type(mut self, bounce_type: impl Into<String>) -> Self {
        self.bounce_type = Some(bounce_type.into());
        self
    }
}
