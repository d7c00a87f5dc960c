//! Gemini `generateContent` client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::generator::{EmailGenerator, LeadProfile, PreviousEmail, TemplateInput};
use crate::prompts::{followup_email_prompt, initial_email_prompt};
use crate::result::{EmailDraft, GenerationError};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// `None` makes every call fail with `GenerationError::Configuration`.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::Configuration(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn generate(&self, prompt: &str) -> Result<EmailDraft, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GenerationError::Configuration("GEMINI_API_KEY is not set".into()))?;

        debug!(model = %self.config.model, prompt_len = prompt.len(), "gemini request");

        let request = GenerateContentRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, "gemini api error");
            return Err(GenerationError::Request(format!(
                "gemini api error ({status}): {error_text}"
            )));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        parse_draft(&text)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Request(e.to_string())
    }
}

#[async_trait::async_trait]
impl EmailGenerator for GeminiGenerator {
    async fn generate_initial(
        &self,
        template: &TemplateInput,
        lead: &LeadProfile,
    ) -> Result<EmailDraft, GenerationError> {
        self.generate(&initial_email_prompt(template, lead)).await
    }

    async fn generate_followup(
        &self,
        previous: &PreviousEmail,
        lead: &LeadProfile,
    ) -> Result<EmailDraft, GenerationError> {
        self.generate(&followup_email_prompt(previous, lead)).await
    }
}

#[derive(Debug, Deserialize)]
struct RawDraft {
    subject: Option<serde_json::Value>,
    body: Option<serde_json::Value>,
}

/// Parse model output into a draft. Accepts the JSON wrapped in a markdown
/// code fence (with or without a language tag).
pub fn parse_draft(text: &str) -> Result<EmailDraft, GenerationError> {
    let json = strip_code_fence(text.trim());
    let raw: RawDraft = serde_json::from_str(json)
        .map_err(|e| GenerationError::InvalidResponse(format!("not json: {e}")))?;

    match (raw.subject, raw.body) {
        (Some(serde_json::Value::String(subject)), Some(serde_json::Value::String(body))) => {
            Ok(EmailDraft { subject, body })
        }
        _ => Err(GenerationError::InvalidResponse(
            "missing subject or body".into(),
        )),
    }
}

fn strip_code_fence(text: &str) -> &str {
    if !(text.starts_with("```") && text.ends_with("```") && text.len() >= 6) {
        return text;
    }
    let inner = &text[3..text.len() - 3];
    // Opening fence may carry a language tag up to the first newline.
    let inner = match inner.find('\n') {
        Some(nl) if inner[..nl].chars().all(|c| c.is_ascii_alphanumeric()) => &inner[nl + 1..],
        _ => inner,
    };
    inner.trim()
}
