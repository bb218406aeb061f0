//! Update listeners.
//!
//! A listener is notified after an evaluation pass with the data-blocks that
//! were updated and what changed on them. This is how renderers and UIs learn
//! which evaluated copies to re-read.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::data::DataBlockId;
use crate::node::IdRecalc;

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Next process-wide listener id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a pass updated.
#[derive(Debug, Clone, Copy)]
pub struct UpdateNotification<'a> {
    /// Evaluation time of the pass.
    pub time: f64,
    /// Updated data-blocks with the aspects that changed, in build order.
    pub updated: &'a [(DataBlockId, IdRecalc)],
}

impl UpdateNotification<'_> {
    /// Whether `id` was updated.
    pub fn contains(&self, id: DataBlockId) -> bool {
        self.updated.iter().any(|(updated, _)| *updated == id)
    }
}

/// Callback invoked after each pass that updated something.
pub type UpdateListener = Box<dyn Fn(&UpdateNotification<'_>) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_ids_are_unique() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn notification_lookup() {
        let updated = [(DataBlockId::new(1), IdRecalc::TRANSFORM)];
        let notification = UpdateNotification {
            time: 1.0,
            updated: &updated,
        };
        assert!(notification.contains(DataBlockId::new(1)));
        assert!(!notification.contains(DataBlockId::new(2)));
    }
}
