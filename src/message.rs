//! Message types
//!
//! Inbound notifications are parsed into an [`InboundEvent`]: either an
//! [`IncomingMessage`] (free text and/or attachments) or a [`Postback`]
//! (a button tap carrying a fixed payload token).
//!
//! Replies are expressed as an [`OutboundReply`], which serializes to exactly the
//! `message` object the Send API expects:
//!
//! ```rust
//! use instagram_relay::message::{Button, Element, OutboundReply};
//!
//! let text = OutboundReply::text("Thanks!");
//! assert_eq!(serde_json::to_value(&text).unwrap(), serde_json::json!({"text": "Thanks!"}));
//!
//! let card = OutboundReply::generic(
//!     Element::new("Is this the right picture?")
//!         .subtitle("Tap a button to answer.")
//!         .button(Button::postback("Yes!", "yes"))
//!         .button(Button::postback("No!", "no")),
//! );
//! assert!(card.as_text().is_none());
//! ```

use serde::Serialize;

/// One messaging notification taken from a webhook entry.
///
/// The sender and timing live on the [`EventContext`](crate::server::EventContext)
/// handed alongside the event.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum InboundEvent {
    /// The user sent a message.
    Message(IncomingMessage),

    /// The user tapped a postback button.
    Postback(Postback),
}

/// A direct message received from a user.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct IncomingMessage {
    /// Platform message id (`mid`), when present.
    pub mid: Option<String>,

    /// Free text typed by the user.
    pub text: Option<String>,

    /// Media or links shared by the user, in the order received.
    pub attachments: Vec<Attachment>,

    /// Set when the platform echoes a message the page itself sent.
    pub is_echo: bool,
}

impl IncomingMessage {
    /// Creates a text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Creates a message carrying only attachments.
    pub fn attachments(attachments: impl IntoIterator<Item = Attachment>) -> Self {
        Self {
            attachments: attachments.into_iter().collect(),
            ..Default::default()
        }
    }

    /// The text of the message, ignoring an empty string.
    pub fn text_content(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.is_empty())
    }

    /// The first attachment, if any.
    pub fn first_attachment(&self) -> Option<&Attachment> {
        self.attachments.first()
    }
}

/// Media shared in a message.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Attachment {
    /// Attachment kind as reported by the platform (`image`, `video`, `audio`, `share`, ...).
    pub kind: Option<String>,

    /// Where the media can be fetched.
    pub url: Option<String>,
}

impl Attachment {
    /// An image attachment at `url`.
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: Some("image".to_owned()),
            url: Some(url.into()),
        }
    }
}

/// A button tap.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Postback {
    /// Label of the tapped button.
    pub title: Option<String>,

    /// Opaque token attached to the button when it was sent.
    pub payload: String,
}

impl Postback {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            title: None,
            payload: payload.into(),
        }
    }
}

/// A reply sent through the Send API.
///
/// Exactly one shape is populated: a plain text string, or a structured
/// template attachment.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum OutboundReply {
    /// `{"text": "..."}`
    Text(String),

    /// `{"attachment": {"type": "template", ...}}`
    Attachment(TemplateAttachment),
}

impl OutboundReply {
    /// A plain text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// A generic template with one element.
    pub fn generic(element: Element) -> Self {
        Self::Attachment(TemplateAttachment {
            payload: GenericTemplate {
                elements: vec![element],
            },
        })
    }

    /// The text of the reply, if it is a text reply.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Attachment(_) => None,
        }
    }
}

/// A template attachment.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename = "template")]
pub struct TemplateAttachment {
    pub payload: GenericTemplate,
}

/// The `generic` template: a carousel of cards.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "template_type", rename = "generic")]
pub struct GenericTemplate {
    pub elements: Vec<Element>,
}

/// One card of a generic template.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[must_use]
pub struct Element {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
}

impl Element {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            image_url: None,
            buttons: Vec::new(),
        }
    }

    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Appends a button. The platform renders at most three per card.
    pub fn button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }
}

/// A template button.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Button {
    /// Sends a postback with `payload` back to the webhook when tapped.
    Postback { title: String, payload: String },

    /// Opens `url` when tapped.
    WebUrl { title: String, url: String },
}

impl Button {
    pub fn postback(title: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Postback {
            title: title.into(),
            payload: payload.into(),
        }
    }

    pub fn web_url(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self::WebUrl {
            title: title.into(),
            url: url.into(),
        }
    }
}
