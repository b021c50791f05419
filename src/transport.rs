//! The seam between the queue manager and whatever actually makes sound.
//!
//! A transport receives whole queues tagged with a generation and reports
//! back through [`TransportEvent`]s carrying the generation they refer to.
//! Single-item edits (`insert`, `remove`) keep the transport's copy of the
//! queue in step with the manager's without reloading it, so they leave the
//! generation unchanged: a transport keeps tagging its events with the
//! generation of its last [`LoadRequest`].

use anyhow::Result;
use std::time::Duration;

use crate::track::TrackId;

/// A complete queue handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub generation: u64,
    pub tracks: Vec<TrackId>,
    pub start_index: usize,
}

/// Inbound notifications from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport moved to `index` on its own (gapless advance, remote
    /// control, ...).
    TrackChanged { generation: u64, index: usize },
    /// Playback ran off the end of the current track and stopped.
    TrackCompleted { generation: u64 },
    TrackFailed { generation: u64, index: usize, reason: String },
    Position(Duration),
    Duration(Duration),
    Buffering { buffered: Duration, is_buffering: bool },
}

impl TransportEvent {
    /// Queue generation the event was issued for, if it concerns the queue.
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::TrackChanged { generation, .. }
            | Self::TrackCompleted { generation }
            | Self::TrackFailed { generation, .. } => Some(*generation),
            Self::Position(_) | Self::Duration(_) | Self::Buffering { .. } => None,
        }
    }
}

/// Playback backend driven by the queue manager.
///
/// Every method may fail; the manager treats a failure while moving to or
/// starting a track as that track being unplayable.
pub trait Transport: Send + Sync {
    /// Replace the transport's queue, positioned at `start_index`, without
    /// starting playback.
    fn load(&self, request: &LoadRequest) -> Result<()>;
    /// Start or resume playback at the current position.
    fn play(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn seek(&self, position: Duration) -> Result<()>;
    /// Move one entry forward, relative to wherever the transport is now.
    fn skip_next(&self) -> Result<()>;
    fn skip_previous(&self) -> Result<()>;
    /// Jump to an arbitrary queue position. The manager always moves this way.
    fn skip_to(&self, index: usize) -> Result<()>;
    /// Insert `track` so that it ends up at `index`.
    fn insert(&self, index: usize, track: &TrackId) -> Result<()>;
    fn remove(&self, index: usize) -> Result<()>;
}
