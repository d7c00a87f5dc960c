//! Leads and the lead status state machine.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{CampaignId, DomainError, DomainResult, LeadId, OwnerId};

/// Delivery lifecycle status of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Draft,
    Queued,
    Sending,
    Sent,
    Failed,
    FollowupQueued,
    FollowupSent,
    Replied,
    Paused,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 9] = [
        LeadStatus::Draft,
        LeadStatus::Queued,
        LeadStatus::Sending,
        LeadStatus::Sent,
        LeadStatus::Failed,
        LeadStatus::FollowupQueued,
        LeadStatus::FollowupSent,
        LeadStatus::Replied,
        LeadStatus::Paused,
    ];

    /// Statuses this status may move to.
    ///
    /// `Sent`, `FollowupQueued` and `FollowupSent` may all go to `Failed` so a
    /// bounce can be recorded after the send was accepted by the provider.
    pub fn allowed_targets(self) -> &'static [LeadStatus] {
        use LeadStatus::*;
        match self {
            Draft => &[Queued],
            Queued => &[Sending, Failed],
            Sending => &[Sent, Failed, Queued, FollowupQueued, FollowupSent],
            Sent => &[FollowupQueued, Replied, Failed],
            Failed => &[Queued, Draft],
            FollowupQueued => &[Sending, Replied, Failed],
            FollowupSent => &[Replied, Failed],
            Replied => &[],
            Paused => &[Draft, Queued],
        }
    }

    pub fn can_transition_to(self, to: LeadStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    pub fn check_transition(self, to: LeadStatus) -> DomainResult<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "illegal lead transition: {self} -> {to}"
            )))
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::Draft => "draft",
            LeadStatus::Queued => "queued",
            LeadStatus::Sending => "sending",
            LeadStatus::Sent => "sent",
            LeadStatus::Failed => "failed",
            LeadStatus::FollowupQueued => "followup_queued",
            LeadStatus::FollowupSent => "followup_sent",
            LeadStatus::Replied => "replied",
            LeadStatus::Paused => "paused",
        }
    }
}

impl core::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown lead status: {s}")))
    }
}

/// A contact targeted by one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub owner_id: OwnerId,
    pub campaign_id: CampaignId,

    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub position: Option<String>,
    pub notes: Option<String>,

    pub status: LeadStatus,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub initial_sent_at: Option<DateTime<Utc>>,
    pub followup_sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub has_replied: bool,
    pub replied_at: Option<DateTime<Utc>>,

    /// Provider id of the most recent send; reply/bounce correlation key.
    pub outbound_message_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Create a draft lead. The email address is stored trimmed and lower-cased
    /// so sender-address matching is case-insensitive.
    pub fn new(
        owner_id: OwnerId,
        campaign_id: CampaignId,
        name: impl Into<String>,
        email: impl AsRef<str>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("lead name is required"));
        }
        let email = normalize_email(email.as_ref());
        if !email.contains('@') {
            return Err(DomainError::validation(format!("invalid lead email: {email}")));
        }

        Ok(Self {
            id: LeadId::new(),
            owner_id,
            campaign_id,
            name,
            email,
            company: None,
            position: None,
            notes: None,
            status: LeadStatus::Draft,
            last_sent_at: None,
            initial_sent_at: None,
            followup_sent_at: None,
            last_error: None,
            has_replied: false,
            replied_at: None,
            outbound_message_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Apply a status change and its accompanying field updates.
    ///
    /// Does not consult the transition table; callers check legality first.
    /// `has_replied`/`replied_at` are derived here and nowhere else.
    pub fn apply_transition(&mut self, to: LeadStatus, update: &LeadUpdate, now: DateTime<Utc>) {
        self.status = to;
        self.updated_at = now;

        if let Some(at) = update.initial_sent_at {
            self.initial_sent_at = Some(at);
        }
        if let Some(at) = update.followup_sent_at {
            self.followup_sent_at = Some(at);
        }
        if let Some(at) = update.last_sent_at {
            self.last_sent_at = Some(at);
        }
        if let Some(last_error) = &update.last_error {
            self.last_error = last_error.clone();
        }
        if let Some(id) = &update.outbound_message_id {
            self.outbound_message_id = Some(id.clone());
        }

        if to == LeadStatus::Replied {
            self.has_replied = true;
            self.replied_at = Some(now);
        }
    }
}

/// Trim, strip a `Name <addr>` wrapper, and lower-case an email address.
pub fn normalize_email(raw: &str) -> String {
    let raw = raw.trim();
    let bare = match (raw.find('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    bare.trim().to_lowercase()
}

/// Field updates applied together with a status transition.
///
/// `None` leaves the column untouched. `last_error` is doubly optional so a
/// transition can explicitly clear it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadUpdate {
    pub initial_sent_at: Option<DateTime<Utc>>,
    pub followup_sent_at: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<Option<String>>,
    pub outbound_message_id: Option<String>,
}

impl LeadUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn initial_sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.initial_sent_at = Some(at);
        self
    }

    pub fn followup_sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.followup_sent_at = Some(at);
        self
    }

    pub fn last_sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_sent_at = Some(at);
        self
    }

    pub fn last_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(Some(message.into()));
        self
    }

    pub fn clear_last_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn outbound_message_id(mut self, id: impl Into<String>) -> Self {
        self.outbound_message_id = Some(id.into());
        self
    }
}
