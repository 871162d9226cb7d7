//! Shared id generation for triggers, segments, and states.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonically increasing id generator shared between the host and the
/// script handle. A single counter hands out ids for every entity kind, so
/// an id is unique across triggers, segments, and states alike.
#[derive(Clone, Debug, Default)]
pub struct IdGen {
    next: Arc<AtomicU64>,
}

impl IdGen {
    /// Create a new generator starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the next available id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let ids = IdGen::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(b > a);
    }

    #[test]
    fn test_clones_share_the_counter() {
        let ids = IdGen::new();
        let clone = ids.clone();
        let a = ids.next_id();
        let b = clone.next_id();
        assert_ne!(a, b);
    }
}
