use reqwest::Response;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    client::Client,
    error::{Error, ServiceError, ServiceErrorKind},
    message::OutboundReply,
    MetaError,
};

/// Body of a Send API call.
#[derive(Serialize, Debug)]
pub(crate) struct SendRequest<'a> {
    pub(crate) recipient: Recipient<'a>,
    pub(crate) message: &'a OutboundReply,
}

#[derive(Serialize, Debug)]
pub(crate) struct Recipient<'a> {
    pub(crate) id: &'a str,
}

impl<'a> SendRequest<'a> {
    pub(crate) fn new(recipient_id: &'a str, message: &'a OutboundReply) -> Self {
        Self {
            recipient: Recipient { id: recipient_id },
            message,
        }
    }
}

impl Client {
    /// Handles API responses with consistent error mapping
    pub(crate) async fn handle_response<T: DeserializeOwned>(
        response: Response,
        endpoint: String,
    ) -> Result<T, Error> {
        let status = response.status();
        let body = response.bytes().await.map_err(|err| err.without_url())?;

        if status.is_success() {
            serde_json::from_slice(&body).map_err(|err| {
                ServiceError::parse(err.into(), String::from_utf8_lossy(&body).into_owned())
                    .service(endpoint, status)
                    .into()
            })
        } else {
            Err(Self::handle_not_ok(&body).service(endpoint, status).into())
        }
    }

    #[inline(always)]
    fn handle_not_ok(body: &[u8]) -> ServiceErrorKind {
        // Graph wraps the error object: {"error": {...}}
        #[derive(Deserialize, Debug)]
        struct Error {
            error: MetaError,
        }
        match serde_json::from_slice::<Error>(body) {
            Ok(structured_error) => ServiceError::api(structured_error.error),
            Err(structured_parse) => ServiceError::parse(
                structured_parse.into(),
                String::from_utf8_lossy(body).into_owned(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_request_shape() {
        let reply = OutboundReply::text("hi");
        let body = SendRequest::new("1789", &reply);

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"recipient": {"id": "1789"}, "message": {"text": "hi"}})
        );
    }

    #[test]
    fn structured_graph_error_is_recognized() {
        let body = br#"{"error":{"message":"Invalid OAuth access token.","type":"OAuthException","code":190}}"#;
        match Client::handle_not_ok(body) {
            ServiceErrorKind::Api(api) => assert_eq!(api.error.code, 190),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn unstructured_error_keeps_body() {
        match Client::handle_not_ok(b"Bad Gateway") {
            ServiceErrorKind::Parse(parse) => assert_eq!(parse.body, "Bad Gateway"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
