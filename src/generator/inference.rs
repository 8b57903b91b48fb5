use serde::{Deserialize, Serialize};

use super::{base, check_status, non_empty, Generation, ReplyGenerator};
use crate::error::GenerationError;

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";

/// A hosted text-generation model: `POST {base}/models/{model}` with
/// `{inputs, parameters}`.
#[derive(Clone, Debug)]
pub struct Inference {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_new_tokens: u32,
}

impl Inference {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            model: model.into(),
            max_new_tokens: 100,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base(base_url);
        self
    }

    pub fn max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }
}

#[derive(Serialize, Debug)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: Parameters,
}

#[derive(Serialize, Debug)]
struct Parameters {
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Deserialize, Debug)]
struct GeneratedText {
    #[serde(default)]
    generated_text: Option<String>,
}

/// Text-generation models answer with a list; some pipelines answer with a
/// single object.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum InferenceResponse {
    Many(Vec<GeneratedText>),
    One(GeneratedText),
}

impl InferenceResponse {
    fn into_text(self) -> Option<String> {
        match self {
            Self::Many(items) => items.into_iter().next().and_then(|item| item.generated_text),
            Self::One(item) => item.generated_text,
        }
    }
}

impl ReplyGenerator for Inference {
    async fn generate(
        &self,
        prompt: &str,
        _conversation: Option<&str>,
    ) -> Result<Generation, GenerationError> {
        let response = self
            .http
            .post(format!("{}/models/{}", self.base_url, self.model))
            .bearer_auth(&self.api_key)
            .json(&InferenceRequest {
                inputs: prompt,
                parameters: Parameters {
                    max_new_tokens: self.max_new_tokens,
                    return_full_text: false,
                },
            })
            .send()
            .await?;

        let body: InferenceResponse = check_status(response).await?.json().await?;
        non_empty(body.into_text()).map(Generation::text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_response_shapes() {
        let many: InferenceResponse =
            serde_json::from_str(r#"[{"generated_text":"a"},{"generated_text":"b"}]"#).unwrap();
        assert_eq!(many.into_text().as_deref(), Some("a"));

        let one: InferenceResponse = serde_json::from_str(r#"{"generated_text":"c"}"#).unwrap();
        assert_eq!(one.into_text().as_deref(), Some("c"));

        let none: InferenceResponse = serde_json::from_str("[]").unwrap();
        assert_eq!(none.into_text(), None);
    }
}
