use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use super::{base, check_status, non_empty, Generation, ReplyGenerator};
use crate::error::GenerationError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const BETA_HEADER: &str = "OpenAI-Beta";
const BETA_VALUE: &str = "assistants=v2";

/// A stateful assistant backed by threads and runs.
///
/// One turn is:
///
/// 1. `POST /v1/threads` (only when no conversation handle is given)
/// 2. `POST /v1/threads/{thread}/messages` with the user's text
/// 3. `POST /v1/threads/{thread}/runs` with the assistant id
/// 4. `GET /v1/threads/{thread}/runs/{run}` every `poll_interval` until the run
///    reaches a terminal status or `max_wait` elapses
/// 5. `GET /v1/threads/{thread}/messages?order=desc&limit=1` for the answer
///
/// The thread id is returned as the conversation handle, so the next message
/// from the same sender continues the thread.
#[derive(Clone, Debug)]
pub struct Assistant {
    http: reqwest::Client,
    api_key: String,
    assistant_id: String,
    base_url: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl Assistant {
    pub fn new(
        http: reqwest::Client,
        api_key: impl Into<String>,
        assistant_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            assistant_id: assistant_id.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(5),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base(base_url);
        self
    }

    /// How long to sleep between run status checks. Default 1s.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How long a run may stay unfinished before giving up. Default 5s.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header(BETA_HEADER, BETA_VALUE)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, GenerationError> {
        let response = self.request(builder).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn create_thread(&self) -> Result<String, GenerationError> {
        let thread: Object = self
            .send(
                self.http
                    .post(format!("{}/v1/threads", self.base_url))
                    .json(&serde_json::json!({})),
            )
            .await?;
        Ok(thread.id)
    }

    async fn add_message(&self, thread: &str, prompt: &str) -> Result<(), GenerationError> {
        let _: Object = self
            .send(
                self.http
                    .post(format!("{}/v1/threads/{thread}/messages", self.base_url))
                    .json(&NewMessage {
                        role: "user",
                        content: prompt,
                    }),
            )
            .await?;
        Ok(())
    }

    async fn start_run(&self, thread: &str) -> Result<Run, GenerationError> {
        self.send(
            self.http
                .post(format!("{}/v1/threads/{thread}/runs", self.base_url))
                .json(&NewRun {
                    assistant_id: &self.assistant_id,
                }),
        )
        .await
    }

    async fn wait_for(&self, thread: &str, mut run: Run) -> Result<(), GenerationError> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            match RunState::of(&run.status) {
                RunState::Completed => return Ok(()),
                RunState::Failed => return Err(GenerationError::RunFailed { status: run.status }),
                RunState::Pending => {}
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(GenerationError::Timeout(self.max_wait));
            }
            tokio::time::sleep(self.poll_interval).await;

            run = self
                .send(self.http.get(format!(
                    "{}/v1/threads/{thread}/runs/{}",
                    self.base_url, run.id
                )))
                .await?;
        }
    }

    async fn latest_reply(&self, thread: &str) -> Result<String, GenerationError> {
        let list: MessageList = self
            .send(
                self.http
                    .get(format!("{}/v1/threads/{thread}/messages", self.base_url))
                    .query(&[("order", "desc"), ("limit", "1")]),
            )
            .await?;

        let text = list
            .data
            .into_iter()
            .next()
            .and_then(|message| {
                message
                    .content
                    .into_iter()
                    .find_map(|content| content.text.map(|text| text.value))
            });
        non_empty(text)
    }
}

impl ReplyGenerator for Assistant {
    async fn generate(
        &self,
        prompt: &str,
        conversation: Option<&str>,
    ) -> Result<Generation, GenerationError> {
        let thread = match conversation {
            Some(thread) => match self.add_message(thread, prompt).await {
                Ok(()) => thread.to_owned(),
                // deleted upstream
                Err(GenerationError::Status { status, .. }) if status == StatusCode::NOT_FOUND => {
                    tracing::warn!(%thread, "conversation thread is gone, starting a new one");
                    let thread = self.create_thread().await?;
                    self.add_message(&thread, prompt).await?;
                    thread
                }
                Err(err) => return Err(err),
            },
            None => {
                let thread = self.create_thread().await?;
                self.add_message(&thread, prompt).await?;
                thread
            }
        };

        let run = self.start_run(&thread).await?;
        tracing::debug!(%thread, run = %run.id, status = %run.status, "assistant run started");
        self.wait_for(&thread, run).await?;

        let text = self.latest_reply(&thread).await?;
        Ok(Generation::text(text).with_handle(thread))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RunState {
    Pending,
    Completed,
    Failed,
}

impl RunState {
    fn of(status: &str) -> Self {
        match status {
            "completed" => Self::Completed,
            "failed" | "cancelled" | "expired" | "requires_action" | "incomplete" => Self::Failed,
            // queued, in_progress, cancelling, and anything newer
            _ => Self::Pending,
        }
    }
}

#[derive(Serialize, Debug)]
struct NewMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct NewRun<'a> {
    assistant_id: &'a str,
}

#[derive(Deserialize, Debug)]
struct Object {
    id: String,
}

#[derive(Deserialize, Debug)]
struct Run {
    id: String,
    status: String,
}

#[derive(Deserialize, Debug)]
struct MessageList {
    #[serde(default)]
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize, Debug)]
struct ThreadMessage {
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Deserialize, Debug)]
struct MessageContent {
    #[serde(default)]
    text: Option<MessageText>,
}

#[derive(Deserialize, Debug)]
struct MessageText {
    value: String,
}
