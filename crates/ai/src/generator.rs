use serde::{Deserialize, Serialize};

use crate::result::{EmailDraft, GenerationError};

/// Campaign template text the generator personalizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateInput {
    pub subject: Option<String>,
    pub body: String,
}

/// Recipient attributes available to the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadProfile {
    pub name: String,
    pub company: Option<String>,
    pub position: Option<String>,
    pub notes: Option<String>,
}

/// The email a follow-up refers back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousEmail {
    pub subject: String,
    pub body: String,
}

/// Produces personalized outreach emails.
///
/// Implementations may fail or time out; callers decide whether to retry.
/// `GenerationError::Configuration` means no call can ever succeed.
#[async_trait::async_trait]
pub trait EmailGenerator: Send + Sync {
    async fn generate_initial(
        &self,
        template: &TemplateInput,
        lead: &LeadProfile,
    ) -> Result<EmailDraft, GenerationError>;

    async fn generate_followup(
        &self,
        previous: &PreviousEmail,
        lead: &LeadProfile,
    ) -> Result<EmailDraft, GenerationError>;
}
