//! Reply generators
//!
//! A [`ReplyGenerator`] turns the user's text into reply text. The relay ships
//! four HTTP providers, selectable at runtime through [`Provider`]:
//!
//! | provider | API shape | stateful |
//! | --- | --- | --- |
//! | [`Completion`] | `POST /v1/generate` → `generated_text` | no |
//! | [`Inference`] | `POST /models/{model}` → `[{generated_text}]` | no |
//! | [`ChatCompletion`] | `POST /v1/chat/completions` → `choices[0].message.content` | no |
//! | [`Assistant`] | threads, messages and polled runs | yes, the thread id is the conversation handle |
//!
//! Every provider takes a shared `reqwest::Client`; give it a request timeout.
//! Callers should still bound the whole call with [`generate_within`], since the
//! assistant provider issues several requests per turn.

mod assistant;
mod chat;
mod completion;
mod inference;

pub use assistant::Assistant;
pub use chat::ChatCompletion;
pub use completion::Completion;
pub use inference::Inference;

use crate::error::GenerationError;
use reqwest::Response;
use std::{future::Future, sync::Arc, time::Duration};

/// Text produced for one prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct Generation {
    /// The reply to send back.
    pub text: String,

    /// Handle to pass with the next prompt of the same sender, for providers
    /// that keep server-side conversation state.
    pub conversation_handle: Option<String>,
}

impl Generation {
    /// A stateless generation.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            conversation_handle: None,
        }
    }

    /// Attaches a conversation handle.
    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.conversation_handle = Some(handle.into());
        self
    }
}

/// Something that can answer a prompt.
pub trait ReplyGenerator: Send + Sync {
    /// Generates a reply for `prompt`, continuing `conversation` when the
    /// provider supports it.
    fn generate(
        &self,
        prompt: &str,
        conversation: Option<&str>,
    ) -> impl Future<Output = Result<Generation, GenerationError>> + Send;
}

impl<G: ReplyGenerator> ReplyGenerator for Arc<G> {
    fn generate(
        &self,
        prompt: &str,
        conversation: Option<&str>,
    ) -> impl Future<Output = Result<Generation, GenerationError>> + Send {
        (**self).generate(prompt, conversation)
    }
}

/// Runs `generator` but gives up after `limit`.
pub async fn generate_within<G: ReplyGenerator>(
    generator: &G,
    limit: Duration,
    prompt: &str,
    conversation: Option<&str>,
) -> Result<Generation, GenerationError> {
    tokio::time::timeout(limit, generator.generate(prompt, conversation))
        .await
        .map_err(|_| GenerationError::Timeout(limit))?
}

/// One of the built-in providers, chosen at runtime.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Provider {
    Completion(Completion),
    Inference(Inference),
    Chat(ChatCompletion),
    Assistant(Assistant),
}

impl Provider {
    /// Short name used in logs and configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Completion(_) => "completion",
            Self::Inference(_) => "inference",
            Self::Chat(_) => "chat",
            Self::Assistant(_) => "assistant",
        }
    }
}

impl ReplyGenerator for Provider {
    async fn generate(
        &self,
        prompt: &str,
        conversation: Option<&str>,
    ) -> Result<Generation, GenerationError> {
        match self {
            Self::Completion(provider) => provider.generate(prompt, conversation).await,
            Self::Inference(provider) => provider.generate(prompt, conversation).await,
            Self::Chat(provider) => provider.generate(prompt, conversation).await,
            Self::Assistant(provider) => provider.generate(prompt, conversation).await,
        }
    }
}

/// Turns a non-success response into [`GenerationError::Status`].
pub(crate) async fn check_status(response: Response) -> Result<Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(GenerationError::Status { status, body })
    }
}

/// Trims provider output and rejects an empty answer.
pub(crate) fn non_empty(text: Option<String>) -> Result<String, GenerationError> {
    match text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_owned()),
        _ => Err(GenerationError::Empty),
    }
}

/// Normalizes a base URL so paths can be appended with `/`.
pub(crate) fn base(url: impl Into<String>) -> String {
    url.into().trim_end_matches('/').to_owned()
}
