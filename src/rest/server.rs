use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::{borrow::Cow, sync::Arc};
use subtle::ConstantTimeEq;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::task::TaskTracker;

use crate::{
    error::Error,
    message::{Attachment, InboundEvent, IncomingMessage, Postback},
    server::{AckMode, AppSecret, ErrorContext, EventContext, Handler, Server},
    Timestamp,
};

/// The only webhook object this server processes.
pub(crate) const INSTAGRAM_OBJECT: &str = "instagram";
/// Body of every acknowledged webhook delivery.
pub(crate) const EVENT_RECEIVED: &str = "EVENT_RECEIVED";

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
struct RawError(String);

macro_rules! error {
    ($state:expr => $($tt:tt)*) => {{
        let state = $state.clone();
        let message = format!($($tt)*);
        tokio::spawn(async move {
            state
                .handler
                .handle_error(ErrorContext { _priv: () }, Box::new(RawError(message)))
                .await;
        })
    }}
}

/// Internal shared state for the webhook logic.
pub(crate) struct InnerServer<H> {
    pub(crate) handler: H,
    pub(crate) app_secret: Option<AppSecret>,
    pub(crate) verify_token: Option<String>,
    pub(crate) ack_mode: AckMode,
    /// Every event task, so shutdown can wait for them.
    pub(crate) tasks: TaskTracker,
}

impl Server {
    pub(crate) async fn serve_inner<H>(mut self, handler: H) -> Result<(), Error>
    where
        H: Handler + 'static,
    {
        let listener = TcpListener::bind(&self.config.endpoint).await?;
        tracing::info!(
            endpoint = %self.config.endpoint,
            route = %self.config.route_path,
            "webhook server listening"
        );

        let shutdown = self.config.shutdown.take();
        let route = self.config.route_path.clone();
        let state = Arc::new(self.into_state(handler));
        let tasks = state.tasks.clone();
        let app = router(&route, state);

        let served = if let Some(shutdown) = shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
        } else {
            axum::serve(listener, app).await
        };

        tasks.close();
        if !tasks.is_empty() {
            tracing::info!(pending = tasks.len(), "waiting for in-flight events");
        }
        tasks.wait().await;

        served.map_err(|err| Error::Network(err.into()))
    }
}

pub(crate) fn router<H>(route: &str, state: Arc<InnerServer<H>>) -> Router
where
    H: Handler + 'static,
{
    let mut webhook = post(handle_webhook::<H>);
    if state.verify_token.is_some() {
        webhook = webhook.get(handle_verification::<H>);
    }

    let router = Router::new().route(route, webhook);
    let router = if route != "/" {
        router.route("/", get(home))
    } else {
        router
    };

    router.with_state(state)
}

async fn home() -> &'static str {
    "Hello World"
}

/// Query of the subscription handshake.
#[derive(Deserialize, Debug, Default)]
pub(crate) struct WebhookChallenge {
    #[serde(rename = "hub.mode")]
    pub(crate) mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub(crate) verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub(crate) challenge: Option<String>,
}

/// Outcome of checking a handshake against the configured token.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Verification {
    Verified(String),
    Incomplete,
    Rejected,
}

impl WebhookChallenge {
    pub(crate) fn verify(self, expected_token: &str) -> Verification {
        let present = |value: Option<String>| value.filter(|v| !v.is_empty());
        let (Some(mode), Some(token)) = (present(self.mode), present(self.verify_token)) else {
            return Verification::Incomplete;
        };

        let token_matches: bool = token.as_bytes().ct_eq(expected_token.as_bytes()).into();
        if mode == "subscribe" && token_matches {
            Verification::Verified(self.challenge.unwrap_or_default())
        } else {
            Verification::Rejected
        }
    }
}

// Verification handler
pub(crate) async fn handle_verification<H>(
    State(state): State<Arc<InnerServer<H>>>,
    Query(challenge): Query<WebhookChallenge>,
) -> (StatusCode, Cow<'static, str>)
where
    H: Handler + 'static,
{
    // Only routed when a verify token is configured.
    let expected = state.verify_token.as_deref().unwrap_or_default();

    match challenge.verify(expected) {
        Verification::Verified(challenge) => {
            tracing::info!("webhook verified");
            (StatusCode::OK, challenge.into())
        }
        Verification::Incomplete => {
            tracing::warn!("verification request without hub.mode or hub.verify_token");
            (
                StatusCode::BAD_REQUEST,
                "Missing hub.mode or hub.verify_token".into(),
            )
        }
        Verification::Rejected => {
            tracing::warn!("webhook verification rejected");
            error!(state => "Invalid verification request");
            (StatusCode::FORBIDDEN, "Forbidden".into())
        }
    }
}

// Webhook handler
pub(crate) async fn handle_webhook<H>(
    State(state): State<Arc<InnerServer<H>>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Cow<'static, str>)
where
    H: Handler + 'static,
{
    if let Some(app_secret) = &state.app_secret {
        if let Err(e) = verify_signature(app_secret, &headers, &body) {
            tracing::warn!(reason = %e, "rejecting webhook payload");
            error!(state => "Signature verification failed: {e}");
            return (
                StatusCode::UNAUTHORIZED,
                "Signature verification failed".into(),
            );
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "webhook body is not a webhook payload");
            return (StatusCode::NOT_FOUND, "Not Found".into());
        }
    };

    if payload.object != INSTAGRAM_OBJECT {
        tracing::warn!(object = %payload.object, "ignoring webhook for foreign object");
        return (StatusCode::NOT_FOUND, "Not Found".into());
    }

    let handles = dispatch(&state, payload.entry);
    match state.ack_mode {
        AckMode::Immediate => {
            let tasks = state.tasks.clone();
            tasks.spawn(supervise(state, handles));
        }
        AckMode::AfterProcessing => supervise(state, handles).await,
    }

    (StatusCode::OK, EVENT_RECEIVED.into())
}

/// Spawns one task per usable entry and returns their handles.
pub(crate) fn dispatch<H>(state: &Arc<InnerServer<H>>, entries: Value) -> Vec<JoinHandle<()>>
where
    H: Handler + 'static,
{
    let entries = match entries {
        Value::Array(entries) => entries,
        Value::Null => Vec::new(),
        other => {
            tracing::warn!(entry = %other, "webhook `entry` is not an array");
            Vec::new()
        }
    };
    tracing::debug!(entries = entries.len(), "dispatching webhook batch");

    let mut handles = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let (ctx, event) = match parse_entry(index, entry) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(entry = index, error = %e, "skipping malformed webhook entry");
                continue;
            }
        };

        tracing::debug!(entry = index, sender_id = %ctx.sender_id, "dispatching event");
        let task_state = state.clone();
        handles.push(state.tasks.spawn(async move {
            task_state.handler.handle(ctx, event).await;
        }));
    }
    handles
}

/// Waits for every event task and reports the ones that panicked.
async fn supervise<H>(state: Arc<InnerServer<H>>, handles: Vec<JoinHandle<()>>)
where
    H: Handler + 'static,
{
    for result in futures::future::join_all(handles).await {
        if let Err(join_err) = result {
            tracing::error!(error = %join_err, "event handler task failed");
            error!(state => "Event handler task failed: {join_err}");
        }
    }
}

/// Extracts the event of one entry.
///
/// Only `messaging[0]` is looked at. `Ok(None)` means there was nothing to
/// route: no messaging element, or an element that is neither a message nor a
/// postback.
pub(crate) fn parse_entry(
    index: usize,
    entry: Value,
) -> Result<Option<(EventContext, InboundEvent)>, serde_json::Error> {
    let entry: WebhookEntry = serde_json::from_value(entry)?;
    let Some(first) = entry.messaging.into_iter().next() else {
        return Ok(None);
    };
    let event: MessagingEvent = serde_json::from_value(first)?;

    let inbound = match (event.message, event.postback) {
        (Some(message), _) => InboundEvent::Message(message.into()),
        (None, Some(postback)) => InboundEvent::Postback(postback.into()),
        (None, None) => return Ok(None),
    };

    let ctx = EventContext {
        sender_id: event.sender.id,
        recipient_id: event.recipient.map(|r| r.id),
        timestamp: event.timestamp.or(entry.time),
        entry_index: index,
    };

    Ok(Some((ctx, inbound)))
}

// Signature verification
pub(crate) fn verify_signature(
    secret: &AppSecret,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), String> {
    let signature = headers
        .get("x-hub-signature-256")
        .ok_or_else(|| "Missing X-Hub-Signature-256 header".to_owned())?
        .to_str()
        .map_err(|_| "Invalid signature header".to_owned())?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.0.as_bytes())
        .map_err(|_| "Invalid webhook secret".to_owned())?;

    mac.update(body);
    let expected_signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    // Use constant-time comparison to prevent timing attacks
    if signature
        .as_bytes()
        .ct_eq(expected_signature.as_bytes())
        .into()
    {
        Ok(())
    } else {
        Err("Signature mismatch. This usually indicates an incorrect app secret \
             or a tampered payload."
            .to_owned())
    }
}

/// Webhook payload structures
#[derive(Deserialize, Debug)]
pub(crate) struct WebhookPayload {
    /// `instagram` for Instagram Messaging subscriptions.
    pub object: String,

    /// Kept raw so that one malformed entry cannot reject the whole batch.
    #[serde(default)]
    pub entry: Value,
}

/// Webhook entry container
#[derive(Deserialize, Debug)]
pub(crate) struct WebhookEntry {
    /// When the notification was sent, in milliseconds.
    #[serde(default)]
    pub time: Option<Timestamp>,

    /// Messaging events. Only the first one is ever routed.
    #[serde(default)]
    pub messaging: Vec<Value>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct MessagingEvent {
    pub sender: Party,
    #[serde(default)]
    pub recipient: Option<Party>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub message: Option<MessagePayload>,
    #[serde(default)]
    pub postback: Option<PostbackPayload>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct Party {
    pub id: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct MessagePayload {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default)]
    pub is_echo: bool,
}

#[derive(Deserialize, Debug)]
pub(crate) struct AttachmentPayload {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub payload: Option<AttachmentUrl>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct AttachmentUrl {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct PostbackPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
}

impl From<MessagePayload> for IncomingMessage {
    fn from(value: MessagePayload) -> Self {
        Self {
            mid: value.mid,
            text: value.text,
            attachments: value
                .attachments
                .into_iter()
                .map(|attachment| Attachment {
                    kind: attachment.kind,
                    url: attachment.payload.and_then(|payload| payload.url),
                })
                .collect(),
            is_echo: value.is_echo,
        }
    }
}

impl From<PostbackPayload> for Postback {
    fn from(value: PostbackPayload) -> Self {
        Self {
            title: value.title,
            payload: value.payload.unwrap_or_default(),
        }
    }
}
