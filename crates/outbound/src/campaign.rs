//! Campaign templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{CampaignId, DomainError, DomainResult, OwnerId};

/// The prompt template the generator personalizes for each lead.
///
/// Editable until locked. Locking is one-way and is required before any
/// email is sent from the campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignTemplate {
    pub id: CampaignId,
    pub owner_id: OwnerId,
    pub name: String,
    pub subject: Option<String>,
    pub body: String,
    pub locked_at: Option<DateTime<Utc>>,
    pub preview_subject: Option<String>,
    pub preview_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignTemplate {
    pub fn new(
        owner_id: OwnerId,
        name: impl Into<String>,
        subject: Option<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        let body = body.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("campaign name is required"));
        }
        if body.trim().is_empty() {
            return Err(DomainError::validation("campaign body is required"));
        }

        Ok(Self {
            id: CampaignId::new(),
            owner_id,
            name,
            subject,
            body,
            locked_at: None,
            preview_subject: None,
            preview_body: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    /// Lock the template. Fails with `Conflict` if it is already locked.
    pub fn lock(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_locked() {
            return Err(DomainError::conflict(format!("campaign {} is already locked", self.id)));
        }
        self.locked_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Replace the subject/body of an unlocked template.
    pub fn update_template(
        &mut self,
        subject: Option<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.is_locked() {
            return Err(DomainError::conflict(format!("campaign {} is locked", self.id)));
        }
        let body = body.into();
        if body.trim().is_empty() {
            return Err(DomainError::validation("campaign body is required"));
        }
        self.subject = subject;
        self.body = body;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_preview(
        &mut self,
        subject: impl Into<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.preview_subject = Some(subject.into());
        self.preview_body = Some(body.into());
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> CampaignTemplate {
        CampaignTemplate::new(
            OwnerId::new("user_1").unwrap(),
            "Q4 outreach",
            Some("Quick question".into()),
            "Hi {{name}}, ...",
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn lock_is_one_way() {
        let mut t = template();
        t.lock(Utc::now()).unwrap();
        assert!(t.is_locked());
        assert!(matches!(t.lock(Utc::now()), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn locked_template_rejects_edits() {
        let mut t = template();
        t.update_template(None, "New body", Utc::now()).unwrap();
        assert_eq!(t.body, "New body");

        t.lock(Utc::now()).unwrap();
        assert!(t.update_template(None, "Other", Utc::now()).is_err());
        assert_eq!(t.body, "New body");
    }

    #[test]
    fn body_is_required() {
        let err = CampaignTemplate::new(OwnerId::new("u").unwrap(), "n", None, "  ", Utc::now());
        assert!(matches!(err, Err(DomainError::Validation(_))));
    }
}
