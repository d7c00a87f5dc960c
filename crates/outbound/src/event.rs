//! Append-only email event log entries.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{DomainError, EmailEventId, LeadId, OwnerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailEventType {
    Sent,
    Failed,
    Bounced,
    ReplyReceived,
}

impl EmailEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailEventType::Sent => "sent",
            EmailEventType::Failed => "failed",
            EmailEventType::Bounced => "bounced",
            EmailEventType::ReplyReceived => "reply_received",
        }
    }
}

impl core::fmt::Display for EmailEventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailEventType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(EmailEventType::Sent),
            "failed" => Ok(EmailEventType::Failed),
            "bounced" => Ok(EmailEventType::Bounced),
            "reply_received" => Ok(EmailEventType::ReplyReceived),
            other => Err(DomainError::validation(format!("unknown email event type: {other}"))),
        }
    }
}

/// Something that happened to a lead's mail. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailEvent {
    pub id: EmailEventId,
    pub lead_id: LeadId,
    pub owner_id: OwnerId,
    pub event_type: EmailEventType,
    pub provider_message_id: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl EmailEvent {
    pub fn new(
        lead_id: LeadId,
        owner_id: OwnerId,
        event_type: EmailEventType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EmailEventId::new(),
            lead_id,
            owner_id,
            event_type,
            provider_message_id: None,
            payload: None,
            created_at: now,
        }
    }

    pub fn with_provider_message_id(mut self, id: impl Into<String>) -> Self {
        self.provider_message_id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
