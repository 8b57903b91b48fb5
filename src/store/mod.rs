//! Conversation persistence
//!
//! The relay records every answered text message as a [`ConversationRecord`]
//! and, before generating, looks up the sender's latest record to recover the
//! conversation handle of stateful generators.
//!
//! Storage is optional. A store failure never stops a reply: lookups fall back
//! to "no history" and appends are logged and dropped.
//!
//! | store | backend |
//! | --- | --- |
//! | [`MemoryStore`] | process memory, lost on restart |
//! | `PgStore` | PostgreSQL (feature `postgres`) |
//! | [`NoStore`] | nothing |

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc};

use crate::{error::StoreError, Timestamp};

/// One answered message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConversationRecord {
    pub sender_id: String,
    pub query: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_handle: Option<String>,
    pub timestamp: Timestamp,
}

impl ConversationRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        sender_id: impl Into<String>,
        query: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            query: query.into(),
            response: response.into(),
            conversation_handle: None,
            timestamp: Timestamp::now(),
        }
    }

    pub fn conversation_handle(mut self, handle: Option<String>) -> Self {
        self.conversation_handle = handle;
        self
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Where conversation records live.
pub trait ConversationStore: Send + Sync {
    /// The most recent record for `sender_id`, if any.
    fn latest(
        &self,
        sender_id: &str,
    ) -> impl Future<Output = Result<Option<ConversationRecord>, StoreError>> + Send;

    /// Stores `record`.
    fn append(&self, record: ConversationRecord)
        -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<S: ConversationStore> ConversationStore for Arc<S> {
    fn latest(
        &self,
        sender_id: &str,
    ) -> impl Future<Output = Result<Option<ConversationRecord>, StoreError>> + Send {
        (**self).latest(sender_id)
    }

    fn append(
        &self,
        record: ConversationRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).append(record)
    }
}

/// Keeps nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStore;

impl ConversationStore for NoStore {
    async fn latest(&self, _sender_id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        Ok(None)
    }

    async fn append(&self, _record: ConversationRecord) -> Result<(), StoreError> {
        Ok(())
    }
}

/// One of the built-in stores, chosen at runtime.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Store {
    Memory(MemoryStore),
    #[cfg(feature = "postgres")]
    Postgres(PgStore),
    None(NoStore),
}

impl Store {
    /// Short name used in logs and configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => "postgres",
            Self::None(_) => "none",
        }
    }
}

impl ConversationStore for Store {
    async fn latest(&self, sender_id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        match self {
            Self::Memory(store) => store.latest(sender_id).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(store) => store.latest(sender_id).await,
            Self::None(store) => store.latest(sender_id).await,
        }
    }

    async fn append(&self, record: ConversationRecord) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.append(record).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(store) => store.append(record).await,
            Self::None(store) => store.append(record).await,
        }
    }
}
