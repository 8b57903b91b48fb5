//! Instagram webhook server implementation
//!
//! Provides a high-level API for receiving Instagram Messaging webhooks.
//! Handles the subscription handshake, optional signature validation, and
//! routes each notification to a [`Handler`].
//!
//! # Key Components
//! - [`ServerBuilder`]: Configure the endpoint, route, shutdown signal, ack mode and security.
//! - [`Server`]: The configured server, ready to run.
//! - [`Server::serve`]: Takes your [`Handler`] and returns a [`Serve`] which runs the
//!   server when awaited.
//! - [`Server::into_router`]: Mount the webhook into an existing `axum` application instead.
//!
//! # Dispatch rules
//!
//! A `POST` whose `object` is not `"instagram"` is answered with `404` and
//! nothing else happens. Otherwise only the **first** element of each entry's
//! `messaging` array is considered; an event carrying `message` goes to
//! [`Handler::handle_message`], one carrying `postback` goes to
//! [`Handler::handle_postback`], anything else is ignored. Every event runs
//! on its own task, and the request is answered with `200 EVENT_RECEIVED`.
//!
//! # Example
//! ```rust,no_run
//! use instagram_relay::{
//!     message::{IncomingMessage, Postback},
//!     server::{EventContext, Handler, Server},
//! };
//!
//! struct Logger;
//!
//! impl Handler for Logger {
//!     async fn handle_message(&self, ctx: EventContext, msg: IncomingMessage) {
//!         println!("{} said {:?}", ctx.sender_id(), msg.text);
//!     }
//!
//!     async fn handle_postback(&self, ctx: EventContext, postback: Postback) {
//!         println!("{} tapped {}", ctx.sender_id(), postback.payload);
//!     }
//! }
//!
//! # async fn example() {
//! Server::builder()
//!     .endpoint("127.0.0.1:8080".parse().unwrap())
//!     .verify_token("my_verify_token")
//!     .build()
//!     .serve(Logger)
//!     .await
//!     .unwrap();
//! # }
//! ```

use crate::{
    error::{BoxError, Error},
    message::{InboundEvent, IncomingMessage, Postback},
    rest::server::{router, InnerServer},
    Timestamp,
};

use std::{
    fmt,
    future::{Future, IntoFuture},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
};
use tokio_util::task::TaskTracker;

const DEFAULT_ENDPOINT: ([u8; 4], u16) = ([127, 0, 0, 1], 3000);
const DEFAULT_ROUTE_PATH: &str = "/webhook";

/// Instagram webhook server
///
/// Listens for incoming events and routes them to a [`Handler`].
/// Create using [`Server::builder()`] or [`Server::new()`].
#[derive(Default)]
pub struct Server {
    pub(crate) config: ServerBuilder,
}

impl Server {
    /// A server on `127.0.0.1:3000` serving `/webhook`, with verification disabled.
    pub fn new() -> Self {
        ServerBuilder::new().build()
    }

    /// Starts a [`ServerBuilder`].
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Prepares the server to run with `handler`.
    ///
    /// Nothing is bound until the returned [`Serve`] is `.await`ed.
    pub fn serve<H: Handler + 'static>(self, handler: H) -> Serve<H> {
        Serve {
            server: self,
            handler,
        }
    }

    /// Builds the `axum` router for this server without binding a listener.
    ///
    /// Use this to mount the webhook inside an application you already run.
    /// Endpoint and shutdown settings are ignored, and shutdown does not wait
    /// for event tasks still running.
    pub fn into_router<H: Handler + 'static>(self, handler: H) -> axum::Router {
        let route = self.config.route_path.clone();
        router(&route, Arc::new(self.into_state(handler)))
    }

    pub(crate) fn into_state<H>(self, handler: H) -> InnerServer<H> {
        InnerServer {
            handler,
            app_secret: self.config.app_secret,
            verify_token: self.config.verify_token,
            ack_mode: self.config.ack_mode,
            tasks: TaskTracker::new(),
        }
    }
}

/// A running-to-be server.
///
/// Implements `IntoFuture`: `.await` it to bind the listener and serve until
/// the configured shutdown signal fires.
#[must_use = "Serve does nothing unless you `.await` or `.execute().await` it"]
pub struct Serve<H> {
    server: Server,
    handler: H,
}

impl<H: Handler + 'static> Serve<H> {
    /// Runs the server until shutdown.
    pub async fn execute(self) -> Result<(), Error> {
        self.server.serve_inner(self.handler).await
    }
}

impl<H: Handler + 'static> IntoFuture for Serve<H> {
    type Output = Result<(), Error>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send + 'static>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

/// When the webhook request is acknowledged relative to event processing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Answer `200` as soon as every event has been handed to its task.
    ///
    /// Slow reply generation never delays the acknowledgment, so the platform
    /// does not retransmit.
    #[default]
    Immediate,

    /// Answer `200` only after every event handler has finished.
    AfterProcessing,
}

impl std::str::FromStr for AckMode {
    type Err = String;

    /// Parses `immediate` or `after_processing`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "after_processing" => Ok(Self::AfterProcessing),
            other => Err(format!(
                "unknown ack mode '{other}', expected immediate or after_processing"
            )),
        }
    }
}

/// Builder for creating a [`Server`]
///
/// # Example
/// ```rust,no_run
/// use instagram_relay::{server::AckMode, Server};
///
/// let server = Server::builder()
///     .endpoint("0.0.0.0:8080".parse().unwrap())
///     .route("/instagram")
///     .verify_token("my_verify_token")
///     .verify_payload("my_app_secret")
///     .ack_mode(AckMode::Immediate)
///     .build();
/// ```
#[must_use]
pub struct ServerBuilder {
    pub(crate) endpoint: SocketAddr,
    pub(crate) route_path: String,
    pub(crate) shutdown: Option<Pin<Box<dyn Future<Output = ()> + Send + 'static>>>,
    pub(crate) app_secret: Option<AppSecret>,
    pub(crate) verify_token: Option<String>,
    pub(crate) ack_mode: AckMode,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            endpoint: SocketAddr::from(DEFAULT_ENDPOINT),
            route_path: DEFAULT_ROUTE_PATH.to_owned(),
            shutdown: None,
            app_secret: None,
            verify_token: None,
            ack_mode: AckMode::default(),
        }
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("endpoint", &self.endpoint)
            .field("route_path", &self.route_path)
            .field("verify_payload", &self.app_secret.is_some())
            .field("verify_token", &self.verify_token.is_some())
            .field("ack_mode", &self.ack_mode)
            .finish_non_exhaustive()
    }
}

impl ServerBuilder {
    /// Same as [`ServerBuilder::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address the server binds to (default `127.0.0.1:3000`).
    pub fn endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Sets the URL path of the webhook (default `/webhook`).
    pub fn route<P: Into<String>>(mut self, path: P) -> Self {
        self.route_path = path.into();
        self
    }

    /// Sets a future that triggers graceful shutdown when it resolves.
    ///
    /// # Example
    /// ```rust,no_run
    /// use instagram_relay::server::ServerBuilder;
    ///
    /// let builder = ServerBuilder::new().shutdown(async {
    ///     tokio::signal::ctrl_c().await.ok();
    /// });
    /// ```
    pub fn shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shutdown = Some(Box::pin(shutdown));
        self
    }

    /// Rejects payloads whose `X-Hub-Signature-256` header does not match an
    /// HMAC-SHA256 of the body keyed with `app_secret`.
    ///
    /// Rejected requests get `401` and are never dispatched.
    pub fn verify_payload(mut self, app_secret: impl Into<AppSecret>) -> Self {
        self.app_secret = Some(app_secret.into());
        self
    }

    /// Sets the token expected in `hub.verify_token` during the subscription
    /// handshake. Without it the server does not answer `GET` requests.
    pub fn verify_token(mut self, verify_token: impl Into<String>) -> Self {
        self.verify_token = Some(verify_token.into());
        self
    }

    /// Chooses when webhook requests are acknowledged. See [`AckMode`].
    pub fn ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    /// Builds the [`Server`].
    pub fn build(self) -> Server {
        Server { config: self }
    }
}

/// The Meta app secret used to validate payload signatures. Never printed.
#[derive(Clone, PartialEq)]
pub struct AppSecret(pub String);

impl fmt::Debug for AppSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppSecret(REDACTED)")
    }
}

impl From<String> for AppSecret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AppSecret {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Who sent an event and which entry it arrived in.
#[derive(Clone, Debug, PartialEq)]
pub struct EventContext {
    pub(crate) sender_id: String,
    pub(crate) recipient_id: Option<String>,
    pub(crate) timestamp: Option<Timestamp>,
    pub(crate) entry_index: usize,
}

impl EventContext {
    /// Creates a context for `sender_id`, mainly for driving handlers in tests.
    pub fn new(sender_id: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            recipient_id: None,
            timestamp: None,
            entry_index: 0,
        }
    }

    /// The Instagram-scoped id of the user who triggered the event.
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// The id of the account that received the event.
    pub fn recipient_id(&self) -> Option<&str> {
        self.recipient_id.as_deref()
    }

    /// When the event happened.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Position of the originating entry within the webhook batch.
    pub fn entry_index(&self) -> usize {
        self.entry_index
    }
}

#[derive(Debug)]
pub struct ErrorContext {
    pub(crate) _priv: (),
}

/// Event handler trait
///
/// Implement this to process incoming Instagram events.
///
/// # Default Implementations
/// Every method has a default, so override only the events you care about.
pub trait Handler: Send + Sync {
    /// Handle any event
    ///
    /// The default implementation routes by event kind.
    #[inline]
    fn handle(&self, ctx: EventContext, event: InboundEvent) -> impl Future<Output = ()> + Send {
        async {
            match event {
                InboundEvent::Message(msg) => self.handle_message(ctx, msg).await,
                InboundEvent::Postback(postback) => self.handle_postback(ctx, postback).await,
            }
        }
    }

    /// Called for each inbound message, echoes included.
    fn handle_message(
        &self,
        _ctx: EventContext,
        _msg: IncomingMessage,
    ) -> impl Future<Output = ()> + Send + '_ {
        async {}
    }

    /// Handle button taps
    fn handle_postback(
        &self,
        _ctx: EventContext,
        _postback: Postback,
    ) -> impl Future<Output = ()> + Send + '_ {
        async {}
    }

    /// Called when the server itself fails while processing a delivery.
    fn handle_error(
        &self,
        _ctx: ErrorContext,
        error: BoxError,
    ) -> impl Future<Output = ()> + Send + '_ {
        async move {
            tracing::error!(error = %error, "webhook server error");
        }
    }
}

impl<F, Fut> Handler for F
where
    Fut: Future<Output = ()> + Send,
    F: FnOnce(EventContext, InboundEvent) -> Fut + Send + Sync + Clone,
{
    #[inline]
    fn handle(&self, ctx: EventContext, event: InboundEvent) -> impl Future<Output = ()> + Send {
        (self.clone())(ctx, event)
    }
}
