//! The relay handler
//!
//! [`Relay`] is the [`Handler`] the binary runs. It answers:
//!
//! - a text message with generated text, falling back to [`FALLBACK_REPLY`]
//!   when generation fails or takes too long;
//! - an attachment-only message with a picture confirmation card carrying
//!   `yes` / `no` postback buttons;
//! - a `yes` / `no` postback with a short acknowledgment.
//!
//! Every failure past the webhook acknowledgment ends in a log line. Nothing
//! here can make the webhook answer anything but `200`.

use std::time::Duration;

use crate::{
    client::Client,
    generator::{generate_within, Provider, ReplyGenerator},
    message::{Attachment, Button, Element, IncomingMessage, OutboundReply, Postback},
    server::{EventContext, Handler},
    store::{ConversationRecord, ConversationStore, NoStore, Store},
};

/// Sent when the generator cannot produce an answer.
pub const FALLBACK_REPLY: &str = "Sorry, I could not process your request at the moment.";

/// Sent for the `yes` postback.
pub const POSITIVE_REPLY: &str = "Thanks!";

/// Default text for the `no` postback.
pub const NEGATIVE_REPLY: &str = "Oops, try again.";

/// Postback payload of the confirmation card's "Yes!" button.
pub const YES_PAYLOAD: &str = "yes";

/// Postback payload of the confirmation card's "No!" button.
pub const NO_PAYLOAD: &str = "no";

const CONFIRMATION_TITLE: &str = "Is this the right picture?";
const CONFIRMATION_SUBTITLE: &str = "Tap a button to answer.";
const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Generator, store and Send API client wired into a [`Handler`].
///
/// # Example
/// ```rust,no_run
/// use std::time::Duration;
/// use instagram_relay::{
///     generator::{Completion, Provider},
///     store::MemoryStore,
///     Client, Relay,
/// };
///
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let relay = Relay::builder()
///     .store(MemoryStore::new())
///     .generation_timeout(Duration::from_secs(8))
///     .negative_reply("No worries, send another one.")
///     .build(
///         Provider::Completion(Completion::new(reqwest::Client::new(), "API_KEY")),
///         Client::new("PAGE_ACCESS_TOKEN")?,
///     );
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct Relay<G = Provider, S = Store> {
    generator: G,
    client: Client,
    store: S,
    negative_reply: String,
    generation_timeout: Duration,
}

impl Relay {
    /// Starts building a relay. Without a store, nothing is remembered.
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }
}

/// Builder for [`Relay`].
#[derive(Debug)]
#[must_use]
pub struct RelayBuilder<S = NoStore> {
    store: S,
    negative_reply: String,
    generation_timeout: Duration,
}

impl RelayBuilder {
    pub fn new() -> Self {
        Self {
            store: NoStore,
            negative_reply: NEGATIVE_REPLY.to_owned(),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> RelayBuilder<S> {
    /// Where conversations are recorded.
    pub fn store<T: ConversationStore>(self, store: T) -> RelayBuilder<T> {
        RelayBuilder {
            store,
            negative_reply: self.negative_reply,
            generation_timeout: self.generation_timeout,
        }
    }

    /// Text sent for the `no` postback.
    pub fn negative_reply(mut self, text: impl Into<String>) -> Self {
        self.negative_reply = text.into();
        self
    }

    /// Upper bound on one generation, after which the fallback is sent.
    /// Default 10s.
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn build<G: ReplyGenerator>(self, generator: G, client: Client) -> Relay<G, S> {
        Relay {
            generator,
            client,
            store: self.store,
            negative_reply: self.negative_reply,
            generation_timeout: self.generation_timeout,
        }
    }
}

impl<G: ReplyGenerator, S: ConversationStore> Relay<G, S> {
    /// Generates the answer to `text`, recording the exchange.
    ///
    /// Always returns something to send.
    async fn answer(&self, sender_id: &str, text: &str) -> String {
        let previous = self.store.latest(sender_id).await.unwrap_or_else(|err| {
            tracing::warn!(sender_id, error = %err, "conversation lookup failed");
            None
        });
        let handle = previous
            .as_ref()
            .and_then(|record| record.conversation_handle.as_deref());

        let generation =
            match generate_within(&self.generator, self.generation_timeout, text, handle).await {
                Ok(generation) => generation,
                Err(err) => {
                    tracing::warn!(sender_id, error = %err, "reply generation failed, sending fallback");
                    return FALLBACK_REPLY.to_owned();
                }
            };

        let record = ConversationRecord::new(sender_id, text, generation.text.as_str())
            .conversation_handle(generation.conversation_handle);
        if let Err(err) = self.store.append(record).await {
            tracing::error!(sender_id, error = %err, "failed to record conversation");
        }

        generation.text
    }

    async fn deliver(&self, sender_id: &str, reply: &OutboundReply) {
        match self.client.deliver(sender_id, reply).await {
            Ok(receipt) => {
                tracing::debug!(sender_id, message_id = ?receipt.message_id, "reply delivered")
            }
            Err(err) => tracing::error!(sender_id, error = %err, "failed to deliver reply"),
        }
    }

    fn postback_reply(&self, payload: &str) -> Option<OutboundReply> {
        match payload {
            YES_PAYLOAD => Some(OutboundReply::text(POSITIVE_REPLY)),
            NO_PAYLOAD => Some(OutboundReply::text(self.negative_reply.as_str())),
            _ => None,
        }
    }
}

/// The card sent back for a shared picture.
pub fn picture_confirmation(attachment: &Attachment) -> OutboundReply {
    let mut element = Element::new(CONFIRMATION_TITLE).subtitle(CONFIRMATION_SUBTITLE);
    if let Some(url) = &attachment.url {
        element = element.image_url(url.as_str());
    }
    OutboundReply::generic(
        element
            .button(Button::postback("Yes!", YES_PAYLOAD))
            .button(Button::postback("No!", NO_PAYLOAD)),
    )
}

impl<G, S> Handler for Relay<G, S>
where
    G: ReplyGenerator,
    S: ConversationStore,
{
    async fn handle_message(&self, ctx: EventContext, message: IncomingMessage) {
        let sender_id = ctx.sender_id();
        if message.is_echo {
            tracing::debug!(sender_id, "ignoring echo of our own message");
            return;
        }

        let reply = if let Some(text) = message.text_content() {
            OutboundReply::text(self.answer(sender_id, text).await)
        } else if let Some(attachment) = message.first_attachment() {
            picture_confirmation(attachment)
        } else {
            tracing::debug!(sender_id, "message has neither text nor attachments");
            return;
        };

        self.deliver(sender_id, &reply).await;
    }

    async fn handle_postback(&self, ctx: EventContext, postback: Postback) {
        let sender_id = ctx.sender_id();
        match self.postback_reply(&postback.payload) {
            Some(reply) => self.deliver(sender_id, &reply).await,
            None => tracing::debug!(sender_id, payload = %postback.payload, "unhandled postback"),
        }
    }
}
