use serde::{Deserialize, Serialize};

use super::{base, check_status, non_empty, Generation, ReplyGenerator};
use crate::error::GenerationError;

const DEFAULT_BASE_URL: &str = "https://api.gemini-platform.com";

/// A plain completion endpoint: `POST {base}/v1/generate` with
/// `{prompt, max_tokens, temperature}`, answering `{generated_text}`.
#[derive(Clone, Debug)]
pub struct Completion {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl Completion {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            max_tokens: 100,
            temperature: 0.7,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base(base_url);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Serialize, Debug)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    generated_text: Option<String>,
}

impl ReplyGenerator for Completion {
    async fn generate(
        &self,
        prompt: &str,
        _conversation: Option<&str>,
    ) -> Result<Generation, GenerationError> {
        let response = self
            .http
            .post(format!("{}/v1/generate", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&GenerateRequest {
                prompt,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .send()
            .await?;

        let body: GenerateResponse = check_status(response).await?.json().await?;
        non_empty(body.generated_text).map(Generation::text)
    }
}
