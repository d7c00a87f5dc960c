//! Resend HTTP client.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DeliveryConfig;

use super::{DeliveryError, DeliveryProvider, OutgoingEmail, ReceivedEmail, SendReceipt};

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    reply_to: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceivedEmailResponse {
    id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    subject: String,
    text: Option<String>,
    #[serde(default)]
    headers: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ResendProvider {
    client: reqwest::Client,
    config: DeliveryConfig,
}

impl ResendProvider {
    pub fn new(config: DeliveryConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DeliveryError::Configuration(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> Result<&str, DeliveryError> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| DeliveryError::Configuration("RESEND_API_KEY is not set".into()))
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(ApiErrorBody { message: Some(message) }) => message,
        _ => format!("resend api error ({status}): {text}"),
    }
}

#[async_trait::async_trait]
impl DeliveryProvider for ResendProvider {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, DeliveryError> {
        let api_key = self.api_key()?;
        let from = self
            .config
            .from
            .as_deref()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| DeliveryError::Configuration("EMAIL_FROM is not set".into()))?;
        let reply_to = self.config.reply_to.as_deref().unwrap_or(from);

        let request = SendEmailRequest {
            from,
            to: [email.to.as_str()],
            subject: &email.subject,
            text: &email.body,
            reply_to,
        };

        let response = self
            .client
            .post(self.url("/emails"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let message = error_message(response).await;
            warn!(%status, to = %email.to, "resend rejected email");
            return Err(DeliveryError::Rejected(message));
        }
        if !status.is_success() {
            return Err(DeliveryError::Request(error_message(response).await));
        }

        let body: SendEmailResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Request(format!("invalid send response: {e}")))?;

        match body.id {
            Some(id) if !id.is_empty() => {
                info!(provider_message_id = %id, "email sent");
                Ok(SendReceipt {
                    provider_message_id: id,
                })
            }
            _ => Err(DeliveryError::Request("No message id returned".into())),
        }
    }

    async fn cancel(&self, provider_message_id: &str) -> Result<(), DeliveryError> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(self.url(&format!("/emails/{provider_message_id}/cancel")))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Rejected(error_message(response).await));
        }
        debug!(provider_message_id, "email cancelled");
        Ok(())
    }

    async fn fetch_received(&self, provider_email_id: &str) -> Result<ReceivedEmail, DeliveryError> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .get(self.url(&format!("/emails/receiving/{provider_email_id}")))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Request(error_message(response).await));
        }

        let body: ReceivedEmailResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Request(format!("invalid received email: {e}")))?;

        Ok(ReceivedEmail {
            in_reply_to: header_value(&body.headers, "in-reply-to"),
            id: body.id,
            from: body.from,
            to: body.to,
            subject: body.subject,
            text: body.text,
        })
    }
}

/// Case-insensitive header lookup. Accepts a `{name: value}` object or a
/// `[{name, value}]` list.
fn header_value(headers: &serde_json::Value, name: &str) -> Option<String> {
    match headers {
        serde_json::Value::Object(map) => map
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_str())
            .map(str::to_string),
        serde_json::Value::Array(items) => items.iter().find_map(|item| {
            let key = item.get("name")?.as_str()?;
            if key.eq_ignore_ascii_case(name) {
                item.get("value")?.as_str().map(str::to_string)
            } else {
                None
            }
        }),
        _ => None,
    }
}
