//! # Playback Session Observer
//!
//! Projects transport position, duration and buffering reports plus the
//! current track's [`LyricTimeline`] into a [`PlaybackDisplay`] that any
//! thread can read.
//!
//! Position ticks arrive several times a second. While playback moves
//! forward the matched lyric line is found by scanning onward from the last
//! match, which is O(1) amortized and allocates nothing; a backward jump
//! (seek) falls back to a binary search over the whole timeline.

use log::trace;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::events::{EventBus, Subscription, SubscriptionId};
use crate::lyrics::LyricTimeline;
use crate::track::TrackId;

/// Presentation state for the now-playing view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackDisplay {
    pub track: Option<TrackId>,
    pub position: Duration,
    pub duration: Duration,
    pub buffered: Duration,
    pub buffering: bool,
    /// Index into the current timeline, `None` before the first line.
    pub line: Option<usize>,
}

/// Published when the matched lyric line changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    LyricLineChanged { line: Option<usize> },
}

#[derive(Debug, Default)]
struct ObserverState {
    display: PlaybackDisplay,
    timeline: Arc<LyricTimeline>,
}

/// Thread-safe projection of transport reports for one session.
#[derive(Debug, Default)]
pub struct PlaybackSessionObserver {
    state: Mutex<ObserverState>,
    events: EventBus<ObserverEvent>,
}

impl PlaybackSessionObserver {
    /// An observer with no track and an empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for lyric line changes.
    ///
    /// # Returns
    ///
    /// A [`Subscription`] that receives every [`ObserverEvent`] published
    /// from now on
    pub fn subscribe(&self) -> Subscription<ObserverEvent> {
        self.events.subscribe()
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Reset everything for a new track before any position is matched.
    pub fn on_track_changed(&self, track: Option<TrackId>, timeline: LyricTimeline) {
        let mut state = self.lock();
        let had_line = state.display.line.is_some();
        trace!("Observer switching to {track:?} with {} lyric lines", timeline.len());
        state.display = PlaybackDisplay { track, ..PlaybackDisplay::default() };
        state.timeline = Arc::new(timeline);
        if had_line {
            self.events.publish(ObserverEvent::LyricLineChanged { line: None });
        }
    }

    /// Record a playback position and match it to a lyric line.
    ///
    /// # Arguments
    ///
    /// * `position` - Offset into the current track
    ///
    /// Publishes [`ObserverEvent::LyricLineChanged`] only when the matched
    /// line differs from the previous one.
    pub fn on_position(&self, position: Duration) {
        let mut state = self.lock();
        let previous_line = state.display.line;

        let line = if position >= state.display.position {
            let lines = state.timeline.lines();
            let mut matched = previous_line;
            let mut next = previous_line.map_or(0, |i| i + 1);
            while next < lines.len() && lines[next].at <= position {
                matched = Some(next);
                next += 1;
            }
            matched
        } else {
            trace!("Position jumped back to {position:?}, rescanning lyrics");
            state.timeline.index_at(position)
        };

        state.display.position = position;
        if line != previous_line {
            state.display.line = line;
            trace!("Lyric line {previous_line:?} -> {line:?}");
            self.events.publish(ObserverEvent::LyricLineChanged { line });
        }
    }

    /// Record the current track's total length, as reported by the transport.
    pub fn on_duration(&self, duration: Duration) {
        self.lock().display.duration = duration;
    }

    /// Record how much of the track is buffered.
    ///
    /// # Arguments
    ///
    /// * `buffered` - Buffered span from the start of the track
    /// * `is_buffering` - True while playback waits for data
    pub fn on_buffering(&self, buffered: Duration, is_buffering: bool) {
        let mut state = self.lock();
        state.display.buffered = buffered;
        state.display.buffering = is_buffering;
    }

    /// Copy of the current presentation state.
    pub fn display(&self) -> PlaybackDisplay {
        self.lock().display.clone()
    }

    /// Lyric timeline of the current track; empty when it has none.
    pub fn timeline(&self) -> Arc<LyricTimeline> {
        Arc::clone(&self.lock().timeline)
    }

    /// Text of the matched lyric line.
    pub fn current_line(&self) -> Option<String> {
        let state = self.lock();
        state
            .display
            .line
            .and_then(|i| state.timeline.line(i))
            .map(|line| line.text.clone())
    }

    fn lock(&self) -> MutexGuard<'_, ObserverState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
