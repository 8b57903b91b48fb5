use dashmap::DashMap;
use std::sync::Arc;

use super::{ConversationRecord, ConversationStore};
use crate::error::StoreError;

/// In-process store keyed by sender.
///
/// Clones share the same map. Records are kept in arrival order; nothing is
/// ever evicted.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, Vec<ConversationRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record of `sender_id`, oldest first.
    pub fn history(&self, sender_id: &str) -> Vec<ConversationRecord> {
        self.records
            .get(sender_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Total number of records across all senders.
    pub fn len(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConversationStore for MemoryStore {
    async fn latest(&self, sender_id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        Ok(self
            .records
            .get(sender_id)
            .and_then(|records| records.last().cloned()))
    }

    async fn append(&self, record: ConversationRecord) -> Result<(), StoreError> {
        self.records
            .entry(record.sender_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }
}
