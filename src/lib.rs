#![deny(clippy::future_not_send)]
#![deny(clippy::large_enum_variant)]

//! # instagram_relay
//!
//! A webhook relay for the Instagram Messaging platform. It answers Meta's
//! subscription handshake, receives direct-message and postback notifications,
//! hands the user's text to a text-generation provider, and posts the generated
//! reply back through the Send API.
//!
//! ## ✨ Features
//!
//! - **Webhook Server**: challenge verification, optional `X-Hub-Signature-256`
//!   payload validation, and per-entry dispatch to a [`Handler`].
//! - **Delivery Client**: a small Send API client with bounded retry for
//!   transient failures.
//! - **Reply Generators**: a generic completion API, a hosted inference API,
//!   a chat-completions API, and a stateful assistant API with conversation threads.
//! - **Conversation Store**: remembers the last conversation handle per sender
//!   so stateful providers can continue a thread.
//!
//! ## 🚀 Examples
//!
//! ### Run the relay
//! ```rust,no_run
//! use instagram_relay::{
//!     generator::{ChatCompletion, Provider},
//!     store::MemoryStore,
//!     Client, Relay, Server,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::builder().build("PAGE_ACCESS_TOKEN")?;
//! let generator = Provider::Chat(ChatCompletion::new(reqwest::Client::new(), "OPENAI_KEY"));
//!
//! let relay = Relay::builder()
//!     .store(MemoryStore::new())
//!     .build(generator, client);
//!
//! Server::builder()
//!     .endpoint("0.0.0.0:3000".parse()?)
//!     .verify_token("my_verify_token")
//!     .build()
//!     .serve(relay)
//!     .await?;
//! # Ok(()) }
//! ```
//!
//! ### Handle events yourself
//! ```rust,no_run
//! use instagram_relay::{
//!     message::{IncomingMessage, OutboundReply},
//!     server::{EventContext, Handler, Server},
//!     Client,
//! };
//!
//! struct Echo {
//!     client: Client,
//! }
//!
//! impl Handler for Echo {
//!     async fn handle_message(&self, ctx: EventContext, message: IncomingMessage) {
//!         if let Some(text) = message.text {
//!             let _ = self.client.deliver(ctx.sender_id(), &OutboundReply::text(text)).await;
//!         }
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::builder().build("PAGE_ACCESS_TOKEN")?;
//! Server::builder()
//!     .verify_token("my_verify_token")
//!     .build()
//!     .serve(Echo { client })
//!     .await?;
//! # Ok(()) }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod generator;
pub mod message;
pub mod relay;
pub(crate) mod rest;
pub mod server;
pub mod store;

pub use client::Client;
pub use error::Error;
pub use message::{InboundEvent, OutboundReply};
pub use relay::Relay;
pub use server::{Handler, Server};

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

/// Represents an **error object returned directly by Meta's Graph API**.
///
/// It is distinct from the crate's own [`Error`] enum: `MetaError` describes
/// issues reported by the platform itself in a non-success response body.
///
/// # Example (from a Send API response)
/// ```json
/// {
///   "error": {
///     "message": "(#100) No matching user found",
///     "type": "OAuthException",
///     "code": 100,
///     "error_subcode": 2018001,
///     "fbtrace_id": "A4K..."
///   }
/// }
/// ```
#[derive(thiserror::Error, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[non_exhaustive]
pub struct MetaError {
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_subcode: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbtrace_id: Option<String>,
}

impl fmt::Display for MetaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(code: {})", self.code)?;

        if let Some(subcode) = self.error_subcode {
            write!(f, " (subcode: {subcode})")?;
        }

        if let Some(r#type) = &self.r#type {
            write!(f, " (type: {})", r#type)?;
        }

        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }

        if let Some(id) = &self.fbtrace_id {
            write!(f, " [trace: {id}]")?;
        }

        Ok(())
    }
}

/// A point in time, in milliseconds since the UNIX epoch.
///
/// Instagram webhook entries and messaging events carry millisecond timestamps;
/// the relay uses the same unit for the records it writes.
#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
#[serde(transparent)]
pub struct Timestamp {
    pub(crate) inner: i64,
}

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self { inner: millis }
    }

    /// Wraps a raw millisecond value.
    pub fn from_millis(millis: i64) -> Self {
        Self { inner: millis }
    }

    /// Returns the raw timestamp in milliseconds.
    pub fn millis(&self) -> i64 {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_error_display() {
        let error: MetaError = serde_json::from_str(
            r#"{"message":"(#100) No matching user found","type":"OAuthException","code":100,"error_subcode":2018001,"fbtrace_id":"AbC"}"#,
        )
        .unwrap();

        assert_eq!(
            error.to_string(),
            "(code: 100) (subcode: 2018001) (type: OAuthException): (#100) No matching user found [trace: AbC]"
        );
    }

    #[test]
    fn timestamp_is_transparent() {
        let ts: Timestamp = serde_json::from_str("1700000000123").unwrap();
        assert_eq!(ts.millis(), 1_700_000_000_123);
        assert!(Timestamp::now() > ts);
    }
}
