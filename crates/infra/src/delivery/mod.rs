//! Transactional email delivery boundary.

pub mod resend;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use resend::ResendProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
}

/// A received (inbound) email as stored by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReceivedEmail {
    pub id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub in_reply_to: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Credentials or sender address missing. Not retried.
    #[error("delivery provider not configured: {0}")]
    Configuration(String),

    /// Network failure or unexpected provider response.
    #[error("delivery request failed: {0}")]
    Request(String),

    /// The provider refused the message.
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, DeliveryError::Configuration(_))
    }
}

#[async_trait::async_trait]
pub trait DeliveryProvider: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, DeliveryError>;

    /// Cancel a submitted send so the provider stops retrying it.
    async fn cancel(&self, provider_message_id: &str) -> Result<(), DeliveryError>;

    /// Fetch a received email, including its `In-Reply-To` header.
    async fn fetch_received(&self, provider_email_id: &str) -> Result<ReceivedEmail, DeliveryError>;
}
