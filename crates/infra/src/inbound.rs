//! Reconciles inbound replies and bounces with in-flight leads.
//!
//! Matching is by provider correlation data, not by owner: a webhook carries
//! no owner context. Both paths are idempotent under redelivery.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use leadflow_core::{Clock, LeadId};
use leadflow_outbound::{EmailEvent, EmailEventType, Lead, LeadStatus, LeadUpdate, normalize_email};

use crate::delivery::DeliveryProvider;
use crate::store::{OutboundStore, StoreError};
use crate::transition::{TransitionOutcome, transition};

#[derive(Debug, Error)]
pub enum InboundError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An email a recipient sent back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundReply {
    /// Raw `From`, possibly `Name <addr>`.
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub provider_email_id: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BounceKind {
    Bounced { bounce_type: String, message: String },
    DeliveryDelayed,
}

/// A delivery failure notice for one of our sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundBounce {
    pub provider_email_id: String,
    pub kind: BounceKind,
    pub recipient: Option<String>,
}

impl InboundBounce {
    fn last_error(&self) -> String {
        match &self.kind {
            BounceKind::Bounced { bounce_type, message } => format!("{bounce_type} bounce: {message}"),
            BounceKind::DeliveryDelayed => "Delivery delayed - email cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Replied {
        lead_id: LeadId,
        cancelled_followups: u64,
    },
    Failed {
        lead_id: LeadId,
        cancelled_followups: u64,
    },
    NoMatchingLead,
    AlreadyReplied { lead_id: LeadId },
    AlreadyFailed { lead_id: LeadId },
    /// A bounce arrived for a lead whose status cannot move to `failed`.
    StatusNotFailable { lead_id: LeadId, status: LeadStatus },
}

impl MatchOutcome {
    /// Whether state was changed or recorded.
    pub fn processed(&self) -> bool {
        !matches!(
            self,
            MatchOutcome::NoMatchingLead | MatchOutcome::AlreadyReplied { .. } | MatchOutcome::AlreadyFailed { .. }
        )
    }

    /// Machine-readable reason, for outcomes that need one.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            MatchOutcome::Replied { .. } | MatchOutcome::Failed { .. } => None,
            MatchOutcome::NoMatchingLead => Some("no_matching_lead"),
            MatchOutcome::AlreadyReplied { .. } => Some("already_replied"),
            MatchOutcome::AlreadyFailed { .. } => Some("already_failed"),
            MatchOutcome::StatusNotFailable { .. } => Some("status_not_failable"),
        }
    }

    pub fn lead_id(&self) -> Option<LeadId> {
        match self {
            MatchOutcome::NoMatchingLead => None,
            MatchOutcome::Replied { lead_id, .. }
            | MatchOutcome::Failed { lead_id, .. }
            | MatchOutcome::AlreadyReplied { lead_id }
            | MatchOutcome::AlreadyFailed { lead_id }
            | MatchOutcome::StatusNotFailable { lead_id, .. } => Some(*lead_id),
        }
    }
}

/// `<msg_1@host>` -> `msg_1@host`.
fn strip_angle_brackets(message_id: &str) -> &str {
    message_id.trim().trim_start_matches('<').trim_end_matches('>').trim()
}

pub struct InboundMatcher {
    store: Arc<dyn OutboundStore>,
    provider: Arc<dyn DeliveryProvider>,
    clock: Arc<dyn Clock>,
}

impl InboundMatcher {
    pub fn new(store: Arc<dyn OutboundStore>, provider: Arc<dyn DeliveryProvider>, clock: Arc<dyn Clock>) -> Self {
        Self { store, provider, clock }
    }

    /// Fill in `in_reply_to` and `text` from the provider's stored copy.
    /// A failed fetch leaves the reply as received.
    pub async fn hydrate_reply(&self, mut reply: InboundReply) -> InboundReply {
        let Some(id) = reply.provider_email_id.clone() else {
            return reply;
        };
        match self.provider.fetch_received(&id).await {
            Ok(full) => {
                if reply.in_reply_to.is_none() {
                    reply.in_reply_to = full.in_reply_to;
                }
                if reply.text.is_none() {
                    reply.text = full.text;
                }
            }
            Err(e) => warn!(provider_email_id = %id, error = %e, "could not fetch received email"),
        }
        reply
    }

    pub async fn handle_reply(&self, reply: &InboundReply) -> Result<MatchOutcome, InboundError> {
        let Some(lead) = self.match_reply(reply).await? else {
            debug!(from = %reply.from, "no lead matches inbound reply");
            return Ok(MatchOutcome::NoMatchingLead);
        };

        if lead.has_replied {
            return Ok(MatchOutcome::AlreadyReplied { lead_id: lead.id });
        }

        // A reply wins over any in-flight status, including `sending`.
        let now = self.clock.now();
        if self.store.mark_replied(lead.id, &lead.owner_id, now).await?.is_none() {
            return Ok(MatchOutcome::AlreadyReplied { lead_id: lead.id });
        }
        let cancelled_followups = self.store.cancel_followup_jobs_for_lead(lead.id, &lead.owner_id).await?;

        let mut event = EmailEvent::new(lead.id, lead.owner_id.clone(), EmailEventType::ReplyReceived, now);
        if let Some(id) = &reply.provider_email_id {
            event = event.with_provider_message_id(id);
        }
        self.store.record_event(event).await?;

        info!(lead_id = %lead.id, previous_status = %lead.status, cancelled_followups, "reply recorded");
        Ok(MatchOutcome::Replied {
            lead_id: lead.id,
            cancelled_followups,
        })
    }

    pub async fn handle_bounce(&self, bounce: &InboundBounce) -> Result<MatchOutcome, InboundError> {
        if let Err(e) = self.provider.cancel(&bounce.provider_email_id).await {
            debug!(provider_email_id = %bounce.provider_email_id, error = %e, "provider cancel failed");
        }

        let Some(lead) = self.match_bounce(bounce).await? else {
            debug!(provider_email_id = %bounce.provider_email_id, "no lead matches bounce");
            return Ok(MatchOutcome::NoMatchingLead);
        };

        if lead.status == LeadStatus::Failed {
            return Ok(MatchOutcome::AlreadyFailed { lead_id: lead.id });
        }

        let now = self.clock.now();
        let last_error = bounce.last_error();
        let outcome = transition(
            &*self.store,
            lead.id,
            &lead.owner_id,
            LeadStatus::Failed,
            &LeadUpdate::none().last_error(last_error.as_str()),
            now,
        )
        .await?;
        let cancelled_followups = self.store.cancel_followup_jobs_for_lead(lead.id, &lead.owner_id).await?;

        let (event_type, payload) = match &bounce.kind {
            BounceKind::Bounced { bounce_type, message } => (
                EmailEventType::Bounced,
                json!({ "bounce": { "type": bounce_type, "message": message } }),
            ),
            BounceKind::DeliveryDelayed => (EmailEventType::Failed, json!({ "reason": "delivery_delayed" })),
        };
        self.store
            .record_event(
                EmailEvent::new(lead.id, lead.owner_id.clone(), event_type, now)
                    .with_provider_message_id(&bounce.provider_email_id)
                    .with_payload(payload),
            )
            .await?;

        match outcome {
            TransitionOutcome::Applied(_) => {
                info!(lead_id = %lead.id, cancelled_followups, error = %last_error, "lead failed on bounce");
                Ok(MatchOutcome::Failed {
                    lead_id: lead.id,
                    cancelled_followups,
                })
            }
            TransitionOutcome::NotApplied { current } => {
                let status = current.unwrap_or(lead.status);
                if status == LeadStatus::Failed {
                    return Ok(MatchOutcome::AlreadyFailed { lead_id: lead.id });
                }
                warn!(lead_id = %lead.id, %status, "bounce for lead that cannot be failed");
                Ok(MatchOutcome::StatusNotFailable { lead_id: lead.id, status })
            }
        }
    }

    async fn match_reply(&self, reply: &InboundReply) -> Result<Option<Lead>, InboundError> {
        if let Some(in_reply_to) = reply.in_reply_to.as_deref() {
            let message_id = strip_angle_brackets(in_reply_to);
            if !message_id.is_empty() {
                if let Some(lead) = self.store.find_by_outbound_message_id(message_id).await? {
                    debug!(lead_id = %lead.id, "reply matched by in-reply-to");
                    return Ok(Some(lead));
                }
            }
        }

        let sender = normalize_email(&reply.from);
        if sender.is_empty() {
            return Ok(None);
        }
        // Several leads may share an address; the most recently updated wins.
        let lead = self.store.find_latest_by_email(&sender).await?;
        if let Some(lead) = &lead {
            debug!(lead_id = %lead.id, "reply matched by sender address");
        }
        Ok(lead)
    }

    async fn match_bounce(&self, bounce: &InboundBounce) -> Result<Option<Lead>, InboundError> {
        if let Some(lead) = self
            .store
            .find_by_outbound_message_id(&bounce.provider_email_id)
            .await?
        {
            return Ok(Some(lead));
        }

        match bounce.recipient.as_deref().map(normalize_email) {
            Some(recipient) if !recipient.is_empty() => Ok(self.store.find_latest_by_email(&recipient).await?),
            _ => Ok(None),
        }
    }
}
