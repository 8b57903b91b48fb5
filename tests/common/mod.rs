#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use instagram_relay::{
    client::DeliveryPolicy,
    error::GenerationError,
    generator::{Generation, ReplyGenerator},
    Client,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{
    matchers::{body_json, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

// --- CONSTANTS ---
pub const ACCESS_TOKEN: &str = "EAAG...";
pub const VERIFY_TOKEN: &str = "my_verify_token";
pub const APP_SECRET: &str = "a1b2c3d4e5f6";
pub const SENDER_ID: &str = "1254459154682919";
pub const PAGE_ID: &str = "17841400008460056";
pub const SEND_PATH: &str = "/v12.0/me/messages";

// --- CLIENT ---

/// A Send API client pointed at `server`, without retries.
pub fn client(server: &MockServer) -> Client {
    Client::builder()
        .base_url(server.uri())
        .api_version("v12.0")
        .policy(DeliveryPolicy::once())
        .build(ACCESS_TOKEN)
        .unwrap()
}

/// Expects exactly `times` Send API calls delivering `message` to [`SENDER_ID`].
pub async fn expect_delivery(server: &MockServer, message: Value, times: u64) {
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(query_param("access_token", ACCESS_TOKEN))
        .and(body_json(json!({
            "recipient": {"id": SENDER_ID},
            "message": message
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "recipient_id": SENDER_ID,
            "message_id": "aWdfZAG1faXRlbToxOklHTWVzc2FnZAUlE"
        })))
        .expect(times)
        .mount(server)
        .await;
}

/// Expects no Send API call at all.
pub async fn expect_no_delivery(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(server)
        .await;
}

// --- WEBHOOK PAYLOADS ---

pub fn batch(entries: Vec<Value>) -> Value {
    json!({"object": "instagram", "entry": entries})
}

pub fn entry(messaging: Vec<Value>) -> Value {
    json!({"id": PAGE_ID, "time": 1_700_000_000_000_i64, "messaging": messaging})
}

pub fn text_event(sender: &str, text: &str) -> Value {
    json!({
        "sender": {"id": sender},
        "recipient": {"id": PAGE_ID},
        "timestamp": 1_700_000_000_000_i64,
        "message": {"mid": "aWdfZAG1faXRlbToxOklHTWVzc2FnZAUlE", "text": text}
    })
}

pub fn image_event(sender: &str, url: &str) -> Value {
    json!({
        "sender": {"id": sender},
        "recipient": {"id": PAGE_ID},
        "timestamp": 1_700_000_000_000_i64,
        "message": {
            "mid": "aWdfZAG1faXRlbToxOklHTWVzc2FnZAUlF",
            "attachments": [{"type": "image", "payload": {"url": url}}]
        }
    })
}

pub fn postback_event(sender: &str, payload: &str) -> Value {
    json!({
        "sender": {"id": sender},
        "recipient": {"id": PAGE_ID},
        "timestamp": 1_700_000_000_000_i64,
        "postback": {"mid": "aWdfZAG1faXRlbToxOklHTWVzc2FnZAUlG", "title": "Yes!", "payload": payload}
    })
}

// --- HTTP ---

pub fn post_webhook(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Sends `request` through `router` and returns the status and body text.
pub async fn call(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

// --- GENERATORS ---

/// Always answers with the same text.
pub struct Canned(pub &'static str);

impl ReplyGenerator for Canned {
    async fn generate(
        &self,
        _prompt: &str,
        _conversation: Option<&str>,
    ) -> Result<Generation, GenerationError> {
        Ok(Generation::text(self.0))
    }
}

/// Always fails.
pub struct Broken;

impl ReplyGenerator for Broken {
    async fn generate(
        &self,
        _prompt: &str,
        _conversation: Option<&str>,
    ) -> Result<Generation, GenerationError> {
        Err(GenerationError::Empty)
    }
}

/// Records every call and hands out a fixed conversation handle.
#[derive(Clone, Default)]
pub struct Recording {
    pub calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl Recording {
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ReplyGenerator for Recording {
    async fn generate(
        &self,
        prompt: &str,
        conversation: Option<&str>,
    ) -> Result<Generation, GenerationError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_owned(), conversation.map(str::to_owned)));
        Ok(Generation::text(format!("re: {prompt}")).with_handle("thread_abc"))
    }
}
