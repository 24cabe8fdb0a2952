use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::message::{CorrelationId, Message};
use crate::utils::Error;

/// A guaranteed message waiting for its acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub message: Arc<Message>,
    pub submitted_at: Instant,
}

/// In-flight guaranteed messages keyed by correlation id.
#[derive(Debug, Default)]
pub struct CorrelationTracker {
    pending: HashMap<CorrelationId, PendingEntry>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message as in flight. An id that is already pending is never
    /// overwritten.
    pub fn register(
        &mut self,
        id: CorrelationId,
        message: Arc<Message>,
        submitted_at: Instant,
    ) -> Result<(), Error> {
        match self.pending.entry(id) {
            Entry::Occupied(_) => Err(Error::CorrelationCollision(id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    message,
                    submitted_at,
                });
                Ok(())
            }
        }
    }

    /// Removes and returns the entry for `id`. A second call for the same id
    /// returns `None`.
    pub fn resolve(&mut self, id: CorrelationId) -> Option<PendingEntry> {
        self.pending.remove(&id)
    }

    pub fn get(&self, id: CorrelationId) -> Option<&PendingEntry> {
        self.pending.get(&id)
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes every entry, ordered by id.
    pub fn drain(&mut self) -> Vec<(CorrelationId, PendingEntry)> {
        let mut drained: Vec<_> = self.pending.drain().collect();
        drained.sort_by_key(|(id, _)| *id);
        drained
    }

    /// Removes the entries submitted at least `timeout` before `now`, ordered
    /// by id.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<(CorrelationId, PendingEntry)> {
        let mut expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.submitted_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        expired.sort();
        expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|entry| (id, entry)))
            .collect()
    }
}
