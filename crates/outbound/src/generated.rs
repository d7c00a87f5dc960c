//! AI-generated email records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{GeneratedEmailId, LeadId, OwnerId};

use crate::job::JobKind;

/// One generated email. `sent_at` stays empty until the provider accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedEmail {
    pub id: GeneratedEmailId,
    pub lead_id: LeadId,
    pub owner_id: OwnerId,
    pub kind: JobKind,
    pub subject: String,
    pub body: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl GeneratedEmail {
    pub fn new(
        lead_id: LeadId,
        owner_id: OwnerId,
        kind: JobKind,
        subject: impl Into<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GeneratedEmailId::new(),
            lead_id,
            owner_id,
            kind,
            subject: subject.into(),
            body: body.into(),
            sent_at: None,
            created_at: now,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }
}
