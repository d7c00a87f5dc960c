//! Fakes shared by the infra unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use leadflow_ai::{EmailDraft, EmailGenerator, GenerationError, LeadProfile, PreviousEmail, TemplateInput};
use leadflow_core::{CampaignId, OwnerId};
use leadflow_outbound::{CampaignTemplate, Lead, LeadStatus};

use crate::delivery::{DeliveryError, DeliveryProvider, OutgoingEmail, ReceivedEmail, SendReceipt};
use crate::store::InMemoryStore;

pub fn owner() -> OwnerId {
    OwnerId::new("user_test").unwrap()
}

pub fn seed_campaign(store: &InMemoryStore, locked: bool) -> CampaignTemplate {
    let mut campaign = CampaignTemplate::new(
        owner(),
        "Launch",
        Some("Quick question".into()),
        "We help teams ship faster.",
        Utc::now(),
    )
    .unwrap();
    if locked {
        campaign.lock(Utc::now()).unwrap();
    }
    store.insert_campaign(campaign.clone()).unwrap();
    campaign
}

pub fn seed_lead(store: &InMemoryStore, status: LeadStatus) -> Lead {
    seed_lead_in(store, CampaignId::new(), status)
}

pub fn seed_lead_in(store: &InMemoryStore, campaign_id: CampaignId, status: LeadStatus) -> Lead {
    seed_lead_with(store, campaign_id, status, None)
}

/// A lead whose latest send carried `message_id`.
pub fn seed_sent_lead(store: &InMemoryStore, status: LeadStatus, message_id: &str) -> Lead {
    seed_lead_with(store, CampaignId::new(), status, Some(message_id))
}

fn seed_lead_with(
    store: &InMemoryStore,
    campaign_id: CampaignId,
    status: LeadStatus,
    message_id: Option<&str>,
) -> Lead {
    let mut lead = Lead::new(
        owner(),
        campaign_id,
        "Dana Lee",
        format!("dana+{}@example.com", uuid::Uuid::now_v7().simple()),
        Utc::now(),
    )
    .unwrap()
    .with_company("Acme");
    lead.status = status;
    lead.has_replied = status == LeadStatus::Replied;
    lead.replied_at = lead.has_replied.then(Utc::now);
    lead.outbound_message_id = message_id.map(str::to_string);
    store.insert_lead(lead.clone()).unwrap();
    lead
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMode {
    Ok,
    Fail,
    Unconfigured,
}

/// Generator returning a fixed draft, or failing on demand.
#[derive(Debug)]
pub struct FakeGenerator {
    mode: Mutex<FakeMode>,
    calls: Mutex<u32>,
}

impl FakeGenerator {
    pub fn new(mode: FakeMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: Mutex::new(0),
        }
    }

    pub fn set_mode(&self, mode: FakeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    fn respond(&self, subject: &str) -> Result<EmailDraft, GenerationError> {
        *self.calls.lock().unwrap() += 1;
        match *self.mode.lock().unwrap() {
            FakeMode::Ok => Ok(EmailDraft::new(subject, "Hi Dana, ...")),
            FakeMode::Fail => Err(GenerationError::Request("model overloaded".into())),
            FakeMode::Unconfigured => Err(GenerationError::Configuration("GEMINI_API_KEY is not set".into())),
        }
    }
}

#[async_trait::async_trait]
impl EmailGenerator for FakeGenerator {
    async fn generate_initial(
        &self,
        _template: &TemplateInput,
        _lead: &LeadProfile,
    ) -> Result<EmailDraft, GenerationError> {
        self.respond("Hello")
    }

    async fn generate_followup(
        &self,
        previous: &PreviousEmail,
        _lead: &LeadProfile,
    ) -> Result<EmailDraft, GenerationError> {
        self.respond(&format!("Re: {}", previous.subject))
    }
}

/// Provider that records sends and hands out sequential message ids.
#[derive(Debug)]
pub struct FakeProvider {
    mode: Mutex<FakeMode>,
    sent: Mutex<Vec<OutgoingEmail>>,
    cancelled: Mutex<Vec<String>>,
    received: Mutex<HashMap<String, ReceivedEmail>>,
}

impl FakeProvider {
    pub fn new(mode: FakeMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            sent: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            received: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_mode(&self, mode: FakeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn add_received(&self, email: ReceivedEmail) {
        self.received.lock().unwrap().insert(email.id.clone(), email);
    }
}

#[async_trait::async_trait]
impl DeliveryProvider for FakeProvider {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, DeliveryError> {
        match *self.mode.lock().unwrap() {
            FakeMode::Ok => {
                let mut sent = self.sent.lock().unwrap();
                sent.push(email.clone());
                Ok(SendReceipt {
                    provider_message_id: format!("msg_{}", sent.len()),
                })
            }
            FakeMode::Fail => Err(DeliveryError::Rejected("mailbox unavailable".into())),
            FakeMode::Unconfigured => Err(DeliveryError::Configuration("RESEND_API_KEY is not set".into())),
        }
    }

    async fn cancel(&self, provider_message_id: &str) -> Result<(), DeliveryError> {
        self.cancelled.lock().unwrap().push(provider_message_id.to_string());
        Ok(())
    }

    async fn fetch_received(&self, provider_email_id: &str) -> Result<ReceivedEmail, DeliveryError> {
        self.received
            .lock()
            .unwrap()
            .get(provider_email_id)
            .cloned()
            .ok_or_else(|| DeliveryError::Request(format!("email {provider_email_id} not found")))
    }
}
