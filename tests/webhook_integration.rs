//! Integration tests for the inbound-email webhook + notification WebSocket.
//!
//! Each test spins up an Axum server on a random port and exercises the
//! real HTTP / WS contract with a stubbed mail provider and LLM.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use jobtrail::config::PipelineConfig;
use jobtrail::error::{FetchError, LlmError};
use jobtrail::fetch::{FetchedEmail, MailFetcher};
use jobtrail::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use jobtrail::model::Account;
use jobtrail::notify::WsNotifierHub;
use jobtrail::pipeline::EmailPipeline;
use jobtrail::store::{Database, LibSqlBackend};
use jobtrail::webhook;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Mail fetcher stub serving canned content by external id.
struct StubFetcher {
    emails: HashMap<String, FetchedEmail>,
}

#[async_trait]
impl MailFetcher for StubFetcher {
    async fn fetch(&self, email_id: &str) -> Result<FetchedEmail, FetchError> {
        self.emails
            .get(email_id)
            .cloned()
            .ok_or(FetchError::Status {
                status: 404,
                body: "unknown email id".into(),
            })
    }
}

/// LLM stub that reports everything as not job-related; the tests below
/// exercise the template path.
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            content: r#"{"is_job_related": false, "event_type": "other", "confidence": 0.1}"#
                .to_string(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

fn linkedin_email(to: &str) -> FetchedEmail {
    FetchedEmail {
        subject: "Your application was sent to Acme Inc.".into(),
        text: Some("Your application was sent to Acme Inc. Frontend Developer role.".into()),
        html: None,
        from: "jobs-noreply@linkedin.com".into(),
        to: vec![to.into()],
        headers: HashMap::new(),
    }
}

struct TestServer {
    port: u16,
    account: Account,
    db: Arc<LibSqlBackend>,
}

/// Start a server with one seeded account and canned mail content for
/// `evt_1` routed to that account.
async fn start_server() -> TestServer {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let account = Account::new("Alice", "alice@example.com");
    db.insert_account(&account).await.unwrap();

    let inbound = format!("{}@inbound.jobtrail.dev", account.inbound_prefix);
    let mut emails = HashMap::new();
    emails.insert("evt_1".to_string(), linkedin_email(&inbound));
    emails.insert(
        "evt_unmatched".to_string(),
        linkedin_email("stranger@elsewhere.com"),
    );

    let hub = WsNotifierHub::new();
    let pipeline = Arc::new(EmailPipeline::new(
        db.clone(),
        Arc::new(StubFetcher { emails }),
        hub.clone(),
        Arc::new(StubLlm),
        PipelineConfig::default(),
    ));
    let app = webhook::routes(pipeline, hub);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer { port, account, db }
}

async fn post_webhook(port: u16, body: Value) -> (u16, Value) {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{port}/webhook/inbound-email"))
        .json(&body)
        .send()
        .await
        .expect("webhook request failed");
    let status = response.status().as_u16();
    let json = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, json)
}

fn received_event(email_id: &str) -> Value {
    serde_json::json!({"type": "email.received", "data": {"email_id": email_id}})
}

// ── Webhook contract ────────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_create_then_duplicate() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (status, json) = post_webhook(server.port, received_event("evt_1")).await;
        assert_eq!(status, 200);
        assert_eq!(json["success"], true);
        assert_eq!(json["created"], true);

        let jobs = server.db.jobs_for_account(&server.account.id).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].company.as_deref(), Some("Acme Inc"));

        // Redelivery of the identical event: duplicate indicator, nothing new.
        let (status, json) = post_webhook(server.port, received_event("evt_1")).await;
        assert_eq!(status, 200);
        assert_eq!(json["duplicate"], true);
        assert_eq!(
            server
                .db
                .jobs_for_account(&server.account.id)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            server
                .db
                .notifications_for_account(&server.account.id)
                .await
                .unwrap()
                .len(),
            1
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn non_email_event_type_is_noop() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (status, json) = post_webhook(
            server.port,
            serde_json::json!({"type": "email.delivered", "data": {"email_id": "evt_1"}}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(json["ignored"], true);
        assert!(
            server
                .db
                .jobs_for_account(&server.account.id)
                .await
                .unwrap()
                .is_empty()
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn missing_email_id_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (status, _) = post_webhook(
            server.port,
            serde_json::json!({"type": "email.received", "data": {}}),
        )
        .await;
        assert_eq!(status, 400);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn upstream_fetch_failure_is_bad_gateway() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (status, _) = post_webhook(server.port, received_event("evt_unknown")).await;
        assert_eq!(status, 502);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unmatched_recipient_reports_no_match() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (status, json) = post_webhook(server.port, received_event("evt_unmatched")).await;
        assert_eq!(status, 200);
        assert_eq!(json["matched"], false);
    })
    .await
    .expect("test timed out");
}

// ── Notification WebSocket ──────────────────────────────────────────

#[tokio::test]
async fn ws_client_receives_job_notification() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (mut ws, _resp) = connect_async(format!(
            "ws://127.0.0.1:{}/ws/notifications/{}",
            server.port, server.account.id
        ))
        .await
        .expect("WS connect failed");

        // Connected client gets the push raised by the webhook.
        let (status, json) = post_webhook(server.port, received_event("evt_1")).await;
        assert_eq!(status, 200);
        assert_eq!(json["created"], true);

        let msg = ws.next().await.unwrap().unwrap();
        let Message::Text(text) = msg else {
            panic!("expected Text frame, got {msg:?}");
        };
        let payload: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(payload["kind"], "job");
        assert!(
            payload["message"]
                .as_str()
                .unwrap()
                .contains("New Application Tracked")
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_clients_are_scoped_per_account() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (mut other_ws, _resp) = connect_async(format!(
            "ws://127.0.0.1:{}/ws/notifications/some-other-account",
            server.port
        ))
        .await
        .expect("WS connect failed");

        let (status, _) = post_webhook(server.port, received_event("evt_1")).await;
        assert_eq!(status, 200);

        // The other account's socket stays silent.
        let silent =
            timeout(Duration::from_millis(300), other_ws.next()).await;
        assert!(silent.is_err(), "unrelated account received a notification");
    })
    .await
    .expect("test timed out");
}
