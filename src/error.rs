//! Error Handling
//!
//! This module defines the crate's error types. They follow the relay's error
//! taxonomy: delivery and transport failures surface as [`Error`], text-generation
//! failures as [`GenerationError`], persistence failures as [`StoreError`].
//!
//! None of these ever reach the webhook caller. The relay recovers from each of
//! them locally (fallback text, log line) so the platform always receives its
//! acknowledgment.

use std::{error::Error as StdError, time::Duration};

use reqwest::StatusCode;

use crate::MetaError;

/// The **top-level error enum** for the `instagram-relay` crate.
///
/// Returned by the [`Client`](crate::client::Client) when talking to the Graph API
/// and by the [`Server`](crate::server::Server) when binding or serving fails.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The Graph API could not be reached: refused connection, DNS failure,
    /// TLS handshake, or a request that timed out.
    #[error("network error talking to the Graph API: {0}")]
    Network(#[from] BoxError),

    /// Represents an error reported by the Graph API or a response the crate
    /// could not make sense of.
    #[error("An API service or data processing error occurred: {0}")]
    Service(#[from] ServiceError),

    /// Represents an **I/O error**, such as failing to bind the listener.
    #[error("An I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    /// Represents an **internal logic error**, usually invalid input that should
    /// have been caught earlier (e.g. a malformed base URL).
    #[error("An internal library error occurred: {0}")]
    Internal(BoxError),
}

impl Error {
    pub(crate) fn network(err: BoxError) -> Self {
        Self::Network(err)
    }

    pub(crate) fn internal(err: BoxError) -> Self {
        Self::Internal(err)
    }

    /// Whether the same request can be sent again without risking a duplicate.
    ///
    /// Only failures to connect qualify among transport errors: once the
    /// request is on the wire (a read timeout, a reset mid-response) the API
    /// may already have accepted it. A 5xx is retried too. A 4xx will be
    /// rejected again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(err) => err
                .downcast_ref::<reqwest::Error>()
                .is_some_and(reqwest::Error::is_connect),
            Self::Service(service) => service.status.is_server_error(),
            Self::Io(_) | Self::Internal(_) => false,
        }
    }
}

/// Represents **service-level errors** encountered during API interactions.
///
/// Carries the HTTP status code, the endpoint that produced it, and a more
/// specific error kind.
#[derive(thiserror::Error, Debug)]
#[error("Service error at endpoint '{endpoint}': {kind} (HTTP status {status})")]
#[non_exhaustive]
pub struct ServiceError {
    pub(crate) status: StatusCode,
    pub(crate) kind: ServiceErrorKind,
    pub(crate) endpoint: String,
}

impl ServiceError {
    /// HTTP status of the failed response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the API endpoint where this service error occurred.
    ///
    /// The query string is never included, so access tokens do not leak into logs.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// What went wrong with the response.
    pub fn kind(&self) -> &ServiceErrorKind {
        &self.kind
    }

    pub(crate) fn api(error: MetaError) -> ServiceErrorKind {
        ServiceErrorKind::Api(ApiError {
            error: Box::new(error),
        })
    }

    pub(crate) fn parse(source: BoxError, body: String) -> ServiceErrorKind {
        ServiceErrorKind::Parse(ParseError {
            source: Some(source),
            body,
        })
    }
}

/// A sub-category of [`ServiceError`].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ServiceErrorKind {
    /// An error reported by Meta in the response body (`{"error": {...}}`).
    #[error("The API returned an error: {0}")]
    Api(#[from] ApiError),

    /// The response body could not be deserialized.
    #[error("Failed to parse the API response: {0}")]
    Parse(#[from] ParseError),
}

impl ServiceErrorKind {
    pub(crate) fn service(self, endpoint: impl Into<String>, status: StatusCode) -> ServiceError {
        ServiceError {
            status,
            kind: self,
            endpoint: endpoint.into(),
        }
    }
}

/// Represents an **API-specific error** parsed into a [`MetaError`].
#[derive(thiserror::Error, Debug)]
#[error("Meta API error: {error}")]
#[non_exhaustive]
pub struct ApiError {
    pub error: Box<MetaError>,
}

/// A Graph API response whose body did not have the expected shape.
///
/// `body` holds the raw text as received.
#[derive(thiserror::Error, Debug)]
#[error("unexpected response body: '{}'", body)]
#[non_exhaustive]
pub struct ParseError {
    #[source]
    pub(crate) source: Option<BoxError>,
    pub body: String,
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        if value.is_builder() || value.is_redirect() {
            // Builder and redirect errors point at misconfiguration rather than the network.
            Self::internal(value.into())
        } else {
            Self::network(value.into())
        }
    }
}

/// Failure of a [`ReplyGenerator`](crate::generator::ReplyGenerator).
///
/// The relay never propagates this to the platform: it logs it and answers the
/// user with [`FALLBACK_REPLY`](crate::relay::FALLBACK_REPLY) instead.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum GenerationError {
    /// The provider could not be reached.
    #[error("generator request failed: {0}")]
    Network(#[source] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("generator returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The provider answered 2xx but the body did not have the expected shape.
    #[error("generator response could not be parsed: {0}")]
    Parse(#[source] BoxError),

    /// The provider answered with no usable text.
    #[error("generator returned no text")]
    Empty,

    /// The provider did not produce an answer within the allowed time.
    #[error("generator did not finish within {0:?}")]
    Timeout(Duration),

    /// An asynchronous run reached a terminal state other than `completed`.
    #[error("generator run ended with status '{status}'")]
    RunFailed { status: String },
}

impl From<reqwest::Error> for GenerationError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Parse(value.into())
        } else {
            Self::Network(value)
        }
    }
}

/// Failure of a [`ConversationStore`](crate::store::ConversationStore).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The backing database rejected the operation or was unreachable.
    #[error("conversation store backend error: {0}")]
    Backend(#[source] BoxError),
}

impl StoreError {
    #[cfg_attr(not(feature = "postgres"), allow(dead_code))]
    pub(crate) fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }
}

/// Boxed error that can cross task boundaries.
pub type BoxError = Box<dyn StdError + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_connect_failures_are_transient() {
        // nothing listens on the discard port
        let refused = reqwest::Client::new()
            .post("http://127.0.0.1:9/v12.0/me/messages")
            .send()
            .await
            .unwrap_err();
        assert!(refused.is_connect());
        assert!(Error::from(refused).is_transient());

        assert!(!Error::network("connection reset".into()).is_transient());
    }

    #[test]
    fn transient_classification() {
        let server = ServiceError::parse("boom".into(), "<html>".into())
            .service("https://graph.facebook.com/v12.0/me/messages", StatusCode::BAD_GATEWAY);
        assert!(Error::Service(server).is_transient());

        let client = ServiceError::api(MetaError::default())
            .service("https://graph.facebook.com/v12.0/me/messages", StatusCode::BAD_REQUEST);
        assert!(!Error::Service(client).is_transient());

        assert!(!Error::internal("bad url".into()).is_transient());
    }
}
