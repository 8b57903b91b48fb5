mod common;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{body::Body, http::Request, http::StatusCode, Router};
use common::*;
use hmac::{Hmac, Mac};
use instagram_relay::{
    message::InboundEvent,
    server::{AckMode, EventContext},
    Server,
};
use serde_json::json;
use sha2::Sha256;

type Seen = Arc<Mutex<Vec<(String, InboundEvent)>>>;

/// A router whose handler records every event it receives.
fn recording_router(builder: instagram_relay::server::ServerBuilder) -> (Router, Seen) {
    let seen = Seen::default();
    let sink = seen.clone();
    let handler = move |ctx: EventContext, event: InboundEvent| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push((ctx.sender_id().to_owned(), event));
        }
    };

    let router = builder
        .ack_mode(AckMode::AfterProcessing)
        .build()
        .into_router(handler);
    (router, seen)
}

fn default_router() -> (Router, Seen) {
    recording_router(Server::builder().verify_token(VERIFY_TOKEN))
}

#[tokio::test]
async fn test_verification_echoes_challenge() {
    let (router, _) = default_router();

    let (status, body) = call(
        &router,
        get("/webhook?hub.mode=subscribe&hub.verify_token=my_verify_token&hub.challenge=1158201444"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "1158201444");
}

#[tokio::test]
async fn test_verification_rejects_wrong_token() {
    let (router, _) = default_router();

    let (status, _) = call(
        &router,
        get("/webhook?hub.mode=subscribe&hub.verify_token=guess&hub.challenge=1158201444"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &router,
        get("/webhook?hub.mode=unsubscribe&hub.verify_token=my_verify_token&hub.challenge=1"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_verification_requires_mode_and_token() {
    let (router, _) = default_router();

    let (status, _) = call(&router, get("/webhook?hub.challenge=1158201444")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&router, get("/webhook?hub.mode=subscribe&hub.challenge=1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        get("/webhook?hub.mode=&hub.verify_token=my_verify_token&hub.challenge=1"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        get("/webhook?hub.mode=subscribe&hub.verify_token=&hub.challenge=1"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_verification_disabled_without_token() {
    let (router, _) = recording_router(Server::builder());

    let (status, _) = call(
        &router,
        get("/webhook?hub.mode=subscribe&hub.verify_token=x&hub.challenge=1"),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_home_route() {
    let (router, _) = default_router();

    let (status, body) = call(&router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Hello World");
}

#[tokio::test]
async fn test_foreign_object_is_not_found() {
    let (router, seen) = default_router();

    let page = json!({
        "object": "page",
        "entry": [entry(vec![text_event(SENDER_ID, "hello")])]
    });
    let (status, _) = call(&router, post_webhook(&page)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_not_found() {
    let (router, seen) = default_router();

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = call(&router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&router, post_webhook(&json!({"entry": []}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_batch_is_acknowledged() {
    let (router, seen) = default_router();

    let (status, body) = call(&router, post_webhook(&json!({"object": "instagram"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "EVENT_RECEIVED");

    let (status, _) = call(&router, post_webhook(&batch(vec![]))).await;
    assert_eq!(status, StatusCode::OK);

    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_only_first_messaging_event_per_entry() {
    let (router, seen) = default_router();

    let body = batch(vec![
        entry(vec![
            text_event("first", "one"),
            text_event("second", "two"),
        ]),
        entry(vec![postback_event("third", "yes")]),
    ]);
    let (status, body) = call(&router, post_webhook(&body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "EVENT_RECEIVED");

    let mut senders: Vec<String> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|(sender, _)| sender.clone())
        .collect();
    senders.sort();
    assert_eq!(senders, ["first", "third"]);
}

#[tokio::test]
async fn test_bad_entry_does_not_spoil_the_batch() {
    let (router, seen) = default_router();

    let body = batch(vec![
        json!({"messaging": [{"message": {"text": "no sender"}}]}),
        entry(vec![json!({"sender": {"id": SENDER_ID}, "read": {"mid": "m"}})]),
        entry(vec![text_event(SENDER_ID, "hello")]),
    ]);
    let (status, _) = call(&router, post_webhook(&body)).await;

    assert_eq!(status, StatusCode::OK);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (sender, event) = &seen[0];
    assert_eq!(sender, SENDER_ID);
    assert!(matches!(event, InboundEvent::Message(m) if m.text.as_deref() == Some("hello")));
}

#[tokio::test]
async fn test_panicking_handler_still_acknowledged() {
    let router = Server::builder()
        .ack_mode(AckMode::AfterProcessing)
        .build()
        .into_router(|_ctx: EventContext, _event: InboundEvent| async {
            panic!("handler blew up");
        });

    let body = batch(vec![entry(vec![text_event(SENDER_ID, "hello")])]);
    let (status, _) = call(&router, post_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);

    // the server keeps serving
    let (status, _) = call(&router, post_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(APP_SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn test_payload_signature() {
    let (router, seen) = recording_router(
        Server::builder()
            .verify_token(VERIFY_TOKEN)
            .verify_payload(APP_SECRET),
    );
    let body = batch(vec![entry(vec![text_event(SENDER_ID, "hello")])]).to_string();

    // unsigned
    let (status, _) = call(&router, post_webhook(&serde_json::from_str(&body).unwrap())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // forged
    let forged = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("x-hub-signature-256", sign(b"something else"))
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = call(&router, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(seen.lock().unwrap().is_empty());

    // signed
    let signed = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("x-hub-signature-256", sign(body.as_bytes()))
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = call(&router, signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_custom_route() {
    let (router, seen) = recording_router(Server::builder().route("/instagram"));

    let request = Request::builder()
        .method("POST")
        .uri("/instagram")
        .body(Body::from(
            batch(vec![entry(vec![text_event(SENDER_ID, "hi")])]).to_string(),
        ))
        .unwrap();
    let (status, _) = call(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seen.lock().unwrap().len(), 1);

    let (status, _) = call(
        &router,
        post_webhook(&batch(vec![entry(vec![text_event(SENDER_ID, "hi")])])),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_events() {
    let endpoint = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    let handler = move |_ctx: EventContext, _event: InboundEvent| {
        let flag = flag.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.store(true, Ordering::SeqCst);
        }
    };

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let serve = Server::builder()
        .endpoint(endpoint)
        .shutdown(async {
            stopped.await.ok();
        })
        .build()
        .serve(handler);
    let running = tokio::spawn(async move { serve.await });

    let http = reqwest::Client::new();
    let url = format!("http://{endpoint}/webhook");
    let body = batch(vec![entry(vec![text_event(SENDER_ID, "hello")])]).to_string();
    let mut response = None;
    for _ in 0..50 {
        match http.post(&url).body(body.clone()).send().await {
            Ok(r) => {
                response = Some(r);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let response = response.expect("server never came up");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "EVENT_RECEIVED");
    assert!(!done.load(Ordering::SeqCst));
    drop(http);

    stop.send(()).unwrap();
    running.await.unwrap().unwrap();
    assert!(done.load(Ordering::SeqCst));
}
