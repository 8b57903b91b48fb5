//! Send API client
//!
//! This module provides the client the relay uses to deliver replies to
//! Instagram users through Meta's Graph API (`POST /v{N}/me/messages`).
//! The page access token travels as the `access_token` query parameter.
//!
//! # Example – Creating a Client
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use instagram_relay::client::Client;
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::builder()
//!     .timeout(Duration::from_secs(10))
//!     .api_version("v12.0")
//!     .build("PAGE_ACCESS_TOKEN")?;
//! # Ok(()) }
//! ```
//!
//! # Example – Delivering a Reply
//!
//! ```rust,no_run
//! use instagram_relay::{client::Client, message::OutboundReply};
//!
//! # async fn run(client: Client) -> Result<(), Box<dyn std::error::Error>> {
//! let receipt = client
//!     .deliver("INSTAGRAM_SCOPED_ID", &OutboundReply::text("Hello from Rust!"))
//!     .await?;
//! println!("sent {:?}", receipt.message_id);
//! # Ok(()) }
//! ```

use super::error::Error;
use crate::{message::OutboundReply, rest::client::SendRequest};

use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client as HttpClient, ClientBuilder as HttpClientBuilder,
};
use serde::Deserialize;
use std::{fmt, sync::Arc, time::Duration};

/// Default Graph API version, the one the relay was first deployed against.
const DEFAULT_API_VERSION: &str = "12.0";
/// Default Graph API host.
const DEFAULT_BASE_URL: &str = "https://graph.facebook.com";
/// Default user agent for the client
const USER_AGENT: &str = "instagram-relay/0.1 (Rust)";

/// Client for the platform's **Send API**.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<InnerClient>,
}

#[derive(Debug)]
struct InnerClient {
    http_client: HttpClient,
    endpoint: Endpoint,
    access_token: AccessToken,
    policy: DeliveryPolicy,
}

/// A page access token. Never printed.
#[derive(Clone, PartialEq)]
pub struct AccessToken(pub String);

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(REDACTED)")
    }
}

impl From<String> for AccessToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AccessToken {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// How a failed delivery is retried.
///
/// Only failures where resending cannot duplicate the message are retried:
/// refused or failed connections and 5xx answers. A timeout after the request
/// went out and any 4xx are final.
/// `backoff` is the wait before the second attempt and doubles after each retry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl DeliveryPolicy {
    /// A single attempt, no retry.
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// What the Send API returns for an accepted message.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct SendReceipt {
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

impl Client {
    /// Creates a new client with default configuration.
    pub fn new(access_token: impl Into<AccessToken>) -> Result<Self, Error> {
        Self::builder().build(access_token)
    }

    /// Starts building a client with custom settings.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Delivers `reply` to the user identified by `recipient_id`.
    ///
    /// Posts `{recipient: {id}, message: reply}` to the Send API, retrying
    /// transient failures according to the client's [`DeliveryPolicy`].
    pub async fn deliver(
        &self,
        recipient_id: &str,
        reply: &OutboundReply,
    ) -> Result<SendReceipt, Error> {
        let body = SendRequest::new(recipient_id, reply);
        let policy = self.inner.policy;

        let mut attempt = 1;
        let mut backoff = policy.backoff;
        loop {
            match self.send_once(&body).await {
                Ok(receipt) => return Ok(receipt),
                Err(err) if attempt < policy.max_attempts && err.is_transient() => {
                    tracing::debug!(
                        recipient_id,
                        attempt,
                        error = %err,
                        "Send API call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(&self, body: &SendRequest<'_>) -> Result<SendReceipt, Error> {
        let url = self.inner.endpoint.messages();
        let response = self
            .inner
            .http_client
            .post(&url)
            .query(&[("access_token", self.inner.access_token.0.as_str())])
            .json(body)
            .send()
            .await
            // The URL carries the access token.
            .map_err(|err| err.without_url())?;

        Self::handle_response(response, url).await
    }
}

/// Builder for [`Client`].
///
/// # Example
/// ```rust
/// use instagram_relay::client::{ClientBuilder, DeliveryPolicy};
///
/// let client = ClientBuilder::new()
///     .api_version("v19.0")
///     .policy(DeliveryPolicy::once())
///     .build("PAGE_ACCESS_TOKEN")
///     .unwrap();
/// ```
#[derive(Debug)]
#[must_use]
pub struct ClientBuilder {
    http: HttpClientBuilder,
    api_version: String,
    base_url: String,
    policy: DeliveryPolicy,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            http: HttpClientBuilder::new().timeout(Duration::from_secs(10)),
            api_version: DEFAULT_API_VERSION.to_owned(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            policy: DeliveryPolicy::default(),
        }
    }
}

impl ClientBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request timeout for every Send API call (default 10 seconds).
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.http = self.http.timeout(duration);
        self
    }

    /// Sets the Graph API version (e.g. `"19.0"`). A leading `"v"` is accepted.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into().trim_start_matches('v').to_owned();
        self
    }

    /// Overrides the Graph API host, mainly for tests against a mock server.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Sets the retry policy for deliveries.
    pub fn policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Finishes building the client with the page access token.
    pub fn build(self, access_token: impl Into<AccessToken>) -> Result<Client, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(USER_AGENT),
        );

        let http_client = self.http.default_headers(headers).build()?;
        Ok(Client {
            inner: Arc::new(InnerClient {
                http_client,
                endpoint: Endpoint {
                    base_url: self.base_url,
                    api_version: self.api_version,
                },
                access_token: access_token.into(),
                policy: DeliveryPolicy {
                    max_attempts: self.policy.max_attempts.max(1),
                    ..self.policy
                },
            }),
        })
    }
}

#[derive(Clone, Debug)]
struct Endpoint {
    base_url: String,
    api_version: String,
}

impl Endpoint {
    /// `{base}/v{version}/me/messages`, without the query string.
    fn messages(&self) -> String {
        format!("{}/v{}/me/messages", self.base_url, self.api_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_url() {
        let client = Client::builder()
            .base_url("http://localhost:9000/")
            .api_version("v19.0")
            .build("token")
            .unwrap();

        assert_eq!(
            client.inner.endpoint.messages(),
            "http://localhost:9000/v19.0/me/messages"
        );
    }

    #[test]
    fn default_url_targets_graph() {
        let client = Client::new("token").unwrap();
        assert_eq!(
            client.inner.endpoint.messages(),
            "https://graph.facebook.com/v12.0/me/messages"
        );
    }

    #[test]
    fn token_is_redacted() {
        let client = Client::new("EAAG-secret").unwrap();
        assert!(!format!("{client:?}").contains("EAAG-secret"));
    }

    #[test]
    fn zero_attempts_means_one() {
        let client = Client::builder()
            .policy(DeliveryPolicy {
                max_attempts: 0,
                backoff: Duration::ZERO,
            })
            .build("token")
            .unwrap();
        assert_eq!(client.inner.policy.max_attempts, 1);
    }
}
