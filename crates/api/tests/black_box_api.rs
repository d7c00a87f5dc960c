use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde_json::json;
use sha2::Sha256;

use leadflow_ai::{EmailDraft, EmailGenerator, GenerationError, LeadProfile, PreviousEmail, TemplateInput};
use leadflow_api::app::{AppServices, build_app};
use leadflow_core::{OwnerId, SystemClock};
use leadflow_infra::store::LeadStore;
use leadflow_infra::{
    DeliveryError, DeliveryProvider, InMemoryStore, OutgoingEmail, ReceivedEmail, SendReceipt, ServiceConfig,
};
use leadflow_outbound::{CampaignTemplate, JobKind, Lead, LeadStatus};

const CRON_SECRET: &str = "cron-s3cret";
const OWNER: &str = "user_1";

struct CannedGenerator;

#[async_trait::async_trait]
impl EmailGenerator for CannedGenerator {
    async fn generate_initial(
        &self,
        _template: &TemplateInput,
        lead: &LeadProfile,
    ) -> Result<EmailDraft, GenerationError> {
        Ok(EmailDraft::new("Hello", format!("Hi {}", lead.name)))
    }

    async fn generate_followup(
        &self,
        previous: &PreviousEmail,
        _lead: &LeadProfile,
    ) -> Result<EmailDraft, GenerationError> {
        Ok(EmailDraft::new(format!("Re: {}", previous.subject), "Just checking in"))
    }
}

#[derive(Default)]
struct RecordingProvider {
    sent: Mutex<Vec<OutgoingEmail>>,
    received: Mutex<HashMap<String, ReceivedEmail>>,
}

#[async_trait::async_trait]
impl DeliveryProvider for RecordingProvider {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, DeliveryError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(SendReceipt {
            provider_message_id: format!("msg_{}", sent.len()),
        })
    }

    async fn cancel(&self, _provider_message_id: &str) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn fetch_received(&self, provider_email_id: &str) -> Result<ReceivedEmail, DeliveryError> {
        self.received
            .lock()
            .unwrap()
            .get(provider_email_id)
            .cloned()
            .ok_or_else(|| DeliveryError::Request("not found".into()))
    }
}

struct TestServer {
    base_url: String,
    store: Arc<InMemoryStore>,
    provider: Arc<RecordingProvider>,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(webhook_secret: Option<&str>) -> Self {
        let mut env = HashMap::from([("CRON_SECRET".to_string(), CRON_SECRET.to_string())]);
        if let Some(secret) = webhook_secret {
            env.insert("RESEND_WEBHOOK_SECRET".into(), secret.into());
        }
        let config = ServiceConfig::from_lookup(|k| env.get(k).cloned()).unwrap();

        let store = InMemoryStore::arc();
        let provider = Arc::new(RecordingProvider::default());
        let services = AppServices::new(
            store.clone(),
            Arc::new(CannedGenerator),
            provider.clone(),
            Arc::new(SystemClock),
            &config,
        );

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            store,
            provider,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn seed_campaign(&self) -> CampaignTemplate {
        let campaign = CampaignTemplate::new(owner(), "Spring", Some("Hello".into()), "Pitch {name}", Utc::now()).unwrap();
        self.store.insert_campaign(campaign.clone()).unwrap();
        campaign
    }

    fn seed_lead(&self, campaign: &CampaignTemplate) -> Lead {
        let lead = Lead::new(owner(), campaign.id, "Dana Lee", "dana@example.com", Utc::now()).unwrap();
        self.store.insert_lead(lead.clone()).unwrap();
        lead
    }

    async fn lead(&self, lead: &Lead) -> Lead {
        self.store.get_lead(lead.id, &owner()).await.unwrap().unwrap()
    }

    async fn post_owned(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("x-owner-id", OWNER)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn tick(&self) -> serde_json::Value {
        let res = self
            .client
            .post(self.url("/worker/outbound/tick"))
            .header("x-cron-secret", CRON_SECRET)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        res.json().await.unwrap()
    }

    async fn webhook(&self, body: &serde_json::Value, signature: Option<String>) -> reqwest::Response {
        let mut req = self
            .client
            .post(self.url("/webhooks/resend"))
            .header("content-type", "application/json")
            .body(body.to_string());
        if let Some(signature) = signature {
            req = req.header("svix-signature", signature);
        }
        req.send().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn owner() -> OwnerId {
    OwnerId::new(OWNER).unwrap()
}

fn sign(body: &serde_json::Value, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[tokio::test]
async fn owner_header_required_for_scoped_endpoints() {
    let server = TestServer::spawn(None).await;

    let res = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = server.client.get(server.url("/worker/outbound/status")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server
        .client
        .post(server.url("/worker/outbound/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server
        .client
        .get(server.url("/worker/outbound/status"))
        .header("x-owner-id", OWNER)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["isRunning"], false);
    assert_eq!(body["emptyTickCount"], 0);
    assert!(body["startedAt"].is_null());
}

#[tokio::test]
async fn tick_requires_cron_secret() {
    let server = TestServer::spawn(None).await;

    let res = server
        .client
        .post(server.url("/worker/outbound/tick"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server
        .client
        .post(server.url("/worker/outbound/tick"))
        .header("cron-secret", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let body = server.tick().await;
    assert_eq!(body["processed"], 0);
    assert_eq!(body["shouldStop"], true);
    assert_eq!(body["message"], "Worker not running");
}

#[tokio::test]
async fn start_send_and_reply_end_to_end() {
    let server = TestServer::spawn(None).await;
    let campaign = server.seed_campaign();
    let lead = server.seed_lead(&campaign);

    let res = server
        .post_owned(&format!("/campaigns/{}/lock", campaign.id), json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["isLocked"], true);

    let res = server
        .post_owned("/worker/outbound/start", json!({ "campaignId": campaign.id }))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["workerStarted"], true);
    assert_eq!(body["workerAlreadyRunning"], false);
    assert_eq!(body["enqueued"], 1);
    assert_eq!(body["skipped"], 0);
    assert_eq!(body["results"][0]["leadId"], lead.id.to_string());
    assert_eq!(server.lead(&lead).await.status, LeadStatus::Queued);

    let report = server.tick().await;
    assert_eq!(report["processed"], 1);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["total"], 1);
    assert_eq!(report["shouldStop"], false);

    let sent = server.lead(&lead).await;
    assert_eq!(sent.status, LeadStatus::FollowupQueued);
    assert_eq!(sent.outbound_message_id.as_deref(), Some("msg_1"));
    let jobs = server.store.all_jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::Followup);
    assert_eq!(server.provider.sent.lock().unwrap()[0].to, "dana@example.com");

    // The webhook only carries the id; In-Reply-To comes from the provider.
    server.provider.received.lock().unwrap().insert(
        "in_1".into(),
        ReceivedEmail {
            id: "in_1".into(),
            from: "Dana <dana.alt@example.net>".into(),
            in_reply_to: Some("<msg_1>".into()),
            ..ReceivedEmail::default()
        },
    );
    let event = json!({
        "type": "email.received",
        "created_at": "2026-01-01T00:00:00Z",
        "data": {
            "email_id": "in_1",
            "from": "Dana <dana.alt@example.net>",
            "to": ["outreach@example.com"],
            "subject": "Re: Hello"
        }
    });
    let res = server.webhook(&event, None).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "received": true, "processed": true, "leadId": lead.id.to_string() })
    );

    let replied = server.lead(&lead).await;
    assert_eq!(replied.status, LeadStatus::Replied);
    assert!(replied.has_replied);
    assert!(server.store.all_jobs().unwrap().is_empty());

    let res = server.webhook(&event, None).await;
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["processed"], false);
    assert_eq!(body["reason"], "already_replied");
}

#[tokio::test]
async fn start_rejects_unknown_or_unlocked_campaign() {
    let server = TestServer::spawn(None).await;
    let campaign = server.seed_campaign();
    server.seed_lead(&campaign);

    let res = server
        .post_owned("/worker/outbound/start", json!({ "campaignId": campaign.id }))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "campaign_not_locked");

    let res = server
        .post_owned(
            "/worker/outbound/start",
            json!({ "campaignId": leadflow_core::CampaignId::new() }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Without a campaign id, drafts of unlocked campaigns are skipped.
    let res = server.post_owned("/worker/outbound/start", json!({})).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["enqueued"], 0);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["results"][0]["reason"], "campaign_not_locked");
}

#[tokio::test]
async fn template_edits_stop_once_locked() {
    let server = TestServer::spawn(None).await;
    let campaign = server.seed_campaign();
    let path = format!("/campaigns/{}/template", campaign.id);

    let res = server
        .client
        .put(server.url(&path))
        .header("x-owner-id", OWNER)
        .json(&json!({ "subject": "New subject", "body": "New body" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["subject"], "New subject");
    assert_eq!(body["isLocked"], false);

    server
        .post_owned(&format!("/campaigns/{}/lock", campaign.id), json!({}))
        .await;

    let res = server
        .client
        .put(server.url(&path))
        .header("x-owner-id", OWNER)
        .json(&json!({ "body": "Too late" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = server
        .post_owned(&format!("/campaigns/{}/lock", campaign.id), json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // Another owner cannot see the campaign.
    let res = server
        .client
        .get(server.url(&format!("/campaigns/{}", campaign.id)))
        .header("x-owner-id", "user_2")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mark_replied_validates_lead() {
    let server = TestServer::spawn(None).await;
    let campaign = server.seed_campaign();
    let lead = server.seed_lead(&campaign);

    let res = server
        .client
        .patch(server.url("/leads/not-a-uuid/mark-replied"))
        .header("x-owner-id", OWNER)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Draft leads were never emailed.
    let res = server
        .client
        .patch(server.url(&format!("/leads/{}/mark-replied", lead.id)))
        .header("x-owner-id", OWNER)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_transition");

    server
        .post_owned(&format!("/campaigns/{}/lock", campaign.id), json!({}))
        .await;
    server.post_owned("/worker/outbound/start", json!({})).await;
    server.tick().await;

    let res = server
        .client
        .patch(server.url(&format!("/leads/{}/mark-replied", lead.id)))
        .header("x-owner-id", OWNER)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "replied");
    assert_eq!(body["hasReplied"], true);
    assert_eq!(body["cancelledFollowups"], 1);
}

#[tokio::test]
async fn webhook_signature_and_payload_checks() {
    let secret = "whsec_test";
    let server = TestServer::spawn(Some(secret)).await;
    let event = json!({ "type": "email.opened", "data": {} });

    let res = server.webhook(&event, None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server.webhook(&event, Some("sha256=deadbeef".into())).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server.webhook(&event, Some(format!("sha256={}", sign(&event, secret)))).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "received": true, "processed": false, "reason": "event_type_not_relevant" })
    );

    let res = server
        .client
        .post(server.url("/webhooks/resend"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    // Signature is checked first.
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server.client.get(server.url("/webhooks/resend")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unsigned_webhook_rejects_invalid_json() {
    let server = TestServer::spawn(None).await;
    let res = server
        .client
        .post(server.url("/webhooks/resend"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn hard_bounce_fails_lead() {
    let server = TestServer::spawn(None).await;
    let campaign = server.seed_campaign();
    let lead = server.seed_lead(&campaign);
    server
        .post_owned(&format!("/campaigns/{}/lock", campaign.id), json!({}))
        .await;
    server.post_owned("/worker/outbound/start", json!({})).await;
    server.tick().await;

    let event = json!({
        "type": "email.bounced",
        "data": {
            "email_id": "msg_1",
            "to": ["dana@example.com"],
            "bounce": { "type": "Permanent", "subType": "General", "message": "mailbox does not exist" }
        }
    });
    let res = server.webhook(&event, None).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["processed"], true);
    assert_eq!(body["bounceType"], "Permanent");
    assert_eq!(body["leadId"], lead.id.to_string());

    let failed = server.lead(&lead).await;
    assert_eq!(failed.status, LeadStatus::Failed);
    assert_eq!(
        failed.last_error.as_deref(),
        Some("Permanent bounce: mailbox does not exist")
    );
    assert!(server.store.all_jobs().unwrap().is_empty());

    let res = server.webhook(&event, None).await;
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["reason"], "already_failed");
    assert!(body.get("bounceType").is_none());
}
