//! Bounded recent-play history used to suppress immediate repeats.

use crate::track::TrackId;
use std::collections::VecDeque;

/// Default capacity, matching the persisted `history_limit` default.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Most-recent-first window of played track ids.
#[derive(Debug, Clone)]
pub struct AntiRepeatWindow {
    entries: VecDeque<TrackId>,
    capacity: usize,
}

impl Default for AntiRepeatWindow {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl AntiRepeatWindow {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id` as the most recent play, evicting the oldest entry if full.
    ///
    /// An id already in the window is moved to the front rather than stored
    /// twice.
    pub fn push(&mut self, id: TrackId) {
        if let Some(pos) = self.entries.iter().position(|e| *e == id) {
            self.entries.remove(pos);
        }
        self.entries.push_front(id);
        self.entries.truncate(self.capacity);
    }

    /// True if `id` was played within the last [`Self::capacity`] plays.
    ///
    /// # Arguments
    ///
    /// * `id` - Concrete track id; group variants are not considered here
    pub fn contains(&self, id: &TrackId) -> bool {
        self.entries.contains(id)
    }

    /// The last recorded play, `None` for an empty window.
    pub fn most_recent(&self) -> Option<&TrackId> {
        self.entries.front()
    }

    /// Entries from most to least recent.
    pub fn iter(&self) -> impl Iterator<Item = &TrackId> {
        self.entries.iter()
    }

    /// Forget every entry, keeping the capacity.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Maximum number of entries kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrinking drops the oldest entries.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.entries.truncate(self.capacity);
    }

    /// Number of entries currently held, never more than the capacity.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
