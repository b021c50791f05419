//! # Playback Queue Manager
//!
//! Owns the live "now playing" sequence: the ordered track ids, the cursor,
//! the repeat mode and the playback state machine, and keeps an external
//! [`Transport`] in step with them.
//!
//! ```text
//! Empty ──init──▶ Loaded ──resume/play──▶ Playing ◀──▶ Paused
//!                                           │
//!                                           ▼
//!                               Ended / NoPlayableTracks
//! ```
//!
//! ## Supersession
//!
//! Every installed queue gets a fresh generation number, handed to the
//! transport in its [`LoadRequest`]. Transport events carry the generation
//! they were loaded with; events for anything but the current generation are
//! dropped, so the advance logic of a replaced queue can never leak into its
//! successor.
//!
//! In-place edits (play next, removals, shuffle refills) keep the generation,
//! since the transport applies them to the queue it already holds. They bump
//! the snapshot's `revision` instead.
//!
//! ## Concurrency
//!
//! All mutations run under one mutex. After each one an immutable
//! [`QueueSnapshot`] is swapped in behind an `RwLock<Arc<_>>`, so readers only
//! ever wait for a pointer swap, never for a transport round trip.

use anyhow::{bail, Context, Result};
use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use crate::events::{EventBus, Subscription, SubscriptionId};
use crate::history::AntiRepeatWindow;
use crate::shuffle::ShuffleEngine;
use crate::track::{LibrarySnapshot, TrackId};
use crate::transport::{LoadRequest, Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Empty,
    Loaded,
    Playing,
    Paused,
    Ended,
    /// Every queued track failed to start in a row.
    NoPlayableTracks,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Loaded => "loaded",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Ended => "ended",
            Self::NoPlayableTracks => "no playable tracks",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    Library,
    Playlist,
    Restricted,
    Custom,
}

/// Where the current queue came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueSource {
    pub kind: SourceKind,
    pub origin_id: Option<String>,
}

impl QueueSource {
    /// The whole library, as installed by an unrestricted shuffle.
    pub fn library() -> Self {
        Self { kind: SourceKind::Library, origin_id: None }
    }

    /// A saved playlist.
    ///
    /// # Arguments
    ///
    /// * `id` - Identifier of the playlist, kept as the origin id
    pub fn playlist(id: impl Into<String>) -> Self {
        Self { kind: SourceKind::Playlist, origin_id: Some(id.into()) }
    }

    /// A shuffle restricted to a caller-chosen subset of the library.
    pub fn restricted() -> Self {
        Self { kind: SourceKind::Restricted, origin_id: None }
    }

    /// A hand-built queue, e.g. one started by "play next" on an empty queue.
    pub fn custom() -> Self {
        Self { kind: SourceKind::Custom, origin_id: None }
    }
}

/// Notifications published on the manager's event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    QueueReplaced { generation: u64, len: usize },
    TrackChanged { generation: u64, index: usize, track: TrackId },
    StateChanged(PlaybackState),
    TrackFailed { generation: u64, index: usize, track: TrackId, reason: String },
    NoPlayableTracks { generation: u64 },
}

/// Immutable read view of the queue.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueSnapshot {
    pub tracks: Vec<TrackId>,
    pub index: usize,
    pub source: QueueSource,
    /// Bumped each time a new queue is installed and loaded into the
    /// transport.
    pub generation: u64,
    /// Bumped on every in-place edit of the current generation's contents.
    pub revision: u64,
    pub repeat: RepeatMode,
    pub state: PlaybackState,
    /// True when the queue came from the shuffle engine and may be refilled.
    pub shuffled: bool,
}

impl QueueSnapshot {
    /// Track under the cursor, `None` for an empty queue.
    pub fn current(&self) -> Option<&TrackId> {
        self.tracks.get(self.index)
    }

    /// Entries after the cursor.
    pub fn upcoming(&self) -> &[TrackId] {
        self.tracks.get(self.index + 1..).unwrap_or(&[])
    }

    /// Number of queued entries, the cursor entry included.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[derive(Debug, Clone)]
enum QueueOrigin {
    Manual,
    /// `scope` is `None` for the whole library.
    Shuffle { scope: Option<Vec<TrackId>> },
}

struct QueueCore {
    tracks: Vec<TrackId>,
    index: usize,
    source: QueueSource,
    generation: u64,
    revision: u64,
    repeat: RepeatMode,
    state: PlaybackState,
    origin: QueueOrigin,
    /// Consecutive start failures since the last track that played through.
    failures: usize,
    window: AntiRepeatWindow,
    library: Arc<LibrarySnapshot>,
    rng: StdRng,
}

impl QueueCore {
    fn current(&self) -> Option<&TrackId> {
        self.tracks.get(self.index)
    }

    /// The track the listener last heard, if any.
    fn now_playing(&self) -> Option<&TrackId> {
        match self.state {
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Ended => self.current(),
            _ => None,
        }
    }

    fn playing(&self) -> Option<TrackId> {
        (self.state == PlaybackState::Playing).then(|| self.current().cloned()).flatten()
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            tracks: self.tracks.clone(),
            index: self.index,
            source: self.source.clone(),
            generation: self.generation,
            revision: self.revision,
            repeat: self.repeat,
            state: self.state,
            shuffled: matches!(self.origin, QueueOrigin::Shuffle { .. }),
        }
    }
}

/// Owner of the live queue for one app session.
pub struct PlaybackQueueManager {
    core: Mutex<QueueCore>,
    published: RwLock<Arc<QueueSnapshot>>,
    shuffle: Arc<ShuffleEngine>,
    transport: Arc<dyn Transport>,
    events: EventBus<QueueEvent>,
}

impl fmt::Debug for PlaybackQueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackQueueManager")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl PlaybackQueueManager {
    pub fn new(shuffle: Arc<ShuffleEngine>, transport: Arc<dyn Transport>, library: Arc<LibrarySnapshot>) -> Self {
        Self::with_rng(shuffle, transport, library, StdRng::from_entropy())
    }

    /// Like [`Self::new`] with a caller-supplied random source, for
    /// reproducible shuffles.
    pub fn with_rng(
        shuffle: Arc<ShuffleEngine>,
        transport: Arc<dyn Transport>,
        library: Arc<LibrarySnapshot>,
        rng: StdRng,
    ) -> Self {
        let window = AntiRepeatWindow::new(shuffle.config().history_limit);
        Self {
            core: Mutex::new(QueueCore {
                tracks: Vec::new(),
                index: 0,
                source: QueueSource::default(),
                generation: 0,
                revision: 0,
                repeat: RepeatMode::Off,
                state: PlaybackState::Empty,
                origin: QueueOrigin::Manual,
                failures: 0,
                window,
                library,
                rng,
            }),
            published: RwLock::new(Arc::new(QueueSnapshot::default())),
            shuffle,
            transport,
            events: EventBus::new(),
        }
    }

    /// Latest published queue state.
    ///
    /// Never blocks on a mutation in progress: it returns the snapshot
    /// published by the last completed one.
    ///
    /// # Returns
    ///
    /// A shared, immutable [`QueueSnapshot`]
    pub fn snapshot(&self) -> Arc<QueueSnapshot> {
        match self.published.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Register for [`QueueEvent`]s published from now on.
    pub fn subscribe(&self) -> Subscription<QueueEvent> {
        self.events.subscribe()
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Working set used by shuffles and refills.
    pub fn library(&self) -> Arc<LibrarySnapshot> {
        Arc::clone(&self.lock().library)
    }

    /// Anti-repeat window contents, most recent first.
    pub fn recent(&self) -> Vec<TrackId> {
        self.lock().window.iter().cloned().collect()
    }

    /// Swap the working set used by future shuffles and refills.
    pub fn refresh_library(&self, library: Arc<LibrarySnapshot>) {
        let mut core = self.lock();
        debug!("Queue manager now sees {} tracks", library.len());
        core.library = library;
    }

    /// Install `tracks` at index 0 and load the transport without playing.
    ///
    /// An empty list leaves the queue Empty.
    pub fn init(&self, tracks: Vec<TrackId>, source: QueueSource) {
        let mut core = self.lock();
        match self.install(&mut core, tracks, 0, source, QueueOrigin::Manual) {
            Ok(true) => self.set_state(&mut core, PlaybackState::Loaded),
            Ok(false) => {}
            Err(err) => self.load_failed(&mut core, &err),
        }
        self.publish(&core);
    }

    /// Play `track` within `context`, which becomes the new queue.
    ///
    /// `track` is prepended when the context does not contain it. Returns
    /// the track now playing, which differs from `track` only if it failed.
    pub fn play_song(&self, track: TrackId, context: Vec<TrackId>, source: QueueSource) -> Option<TrackId> {
        let mut tracks = context;
        let index = match tracks.iter().position(|t| *t == track) {
            Some(index) => index,
            None => {
                tracks.insert(0, track);
                0
            }
        };

        let mut core = self.lock();
        let previous = core.now_playing().cloned();
        self.replace_and_start(&mut core, tracks, index, source, QueueOrigin::Manual, previous);
        self.publish(&core);
        core.playing()
    }

    /// Shuffle `scope` (or the whole library) into a new queue and play it.
    ///
    /// Clears the anti-repeat window. Nothing changes when there is nothing
    /// to shuffle.
    pub fn shuffle_and_play(&self, scope: Option<&[TrackId]>) -> Option<TrackId> {
        let mut core = self.lock();
        let library = Arc::clone(&core.library);
        let candidates = scope.map_or_else(|| library.ids(), <[TrackId]>::to_vec);
        let order = self.shuffle.shuffle_order(&library, &candidates, &mut core.rng);
        if order.is_empty() {
            debug!("Nothing to shuffle, keeping the current queue");
            return None;
        }

        core.window.clear();
        let source = if scope.is_some() { QueueSource::restricted() } else { QueueSource::library() };
        let origin = QueueOrigin::Shuffle { scope: scope.map(<[TrackId]>::to_vec) };
        self.replace_and_start(&mut core, order, 0, source, origin, None);
        self.publish(&core);
        core.playing()
    }

    /// Move the cursor one step and start the track there.
    ///
    /// Returns the track now playing. A no-op on an empty queue.
    pub fn advance(&self, direction: Direction) -> Option<TrackId> {
        let mut core = self.lock();
        if core.tracks.is_empty() {
            debug!("Advance on an empty queue ignored");
            return None;
        }
        core.failures = 0;
        match direction {
            Direction::Forward => self.step_forward(&mut core),
            Direction::Backward => self.step_backward(&mut core),
        }
        self.publish(&core);
        core.playing()
    }

    /// # Errors
    ///
    /// Returns an error if the transport refuses; the state is unchanged.
    pub fn pause(&self) -> Result<()> {
        let mut core = self.lock();
        if core.state != PlaybackState::Playing {
            debug!("Pause ignored in state {}", core.state);
            return Ok(());
        }
        self.transport.pause().context("Failed to pause playback")?;
        self.set_state(&mut core, PlaybackState::Paused);
        self.publish(&core);
        Ok(())
    }

    /// Continue a paused track, or start the cursor track of a freshly
    /// loaded queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport refuses to continue a paused track.
    /// Start failures on a loaded queue go through the skip path instead.
    pub fn resume(&self) -> Result<()> {
        let mut core = self.lock();
        match core.state {
            PlaybackState::Paused => {
                self.transport.play().context("Failed to resume playback")?;
                self.set_state(&mut core, PlaybackState::Playing);
            }
            PlaybackState::Loaded => {
                core.failures = 0;
                let index = core.index;
                self.start(&mut core, index, None, None);
            }
            state => {
                debug!("Resume ignored in state {state}");
                return Ok(());
            }
        }
        self.publish(&core);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the transport cannot seek.
    pub fn seek(&self, position: Duration) -> Result<()> {
        let core = self.lock();
        if core.tracks.is_empty() {
            return Ok(());
        }
        self.transport
            .seek(position)
            .with_context(|| format!("Failed to seek to {position:?}"))
    }

    /// Change how advancing behaves at the end of the queue.
    ///
    /// Takes effect on the next advance; the current track keeps playing.
    ///
    /// # Arguments
    ///
    /// * `mode` - [`RepeatMode::All`] wraps around, [`RepeatMode::One`]
    ///   restarts the cursor track, [`RepeatMode::Off`] ends the queue
    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        let mut core = self.lock();
        info!("Repeat mode {:?} -> {:?}", core.repeat, mode);
        core.repeat = mode;
        self.publish(&core);
    }

    /// Insert `track` right after the cursor.
    ///
    /// On an empty queue the track becomes the whole queue, loaded but not
    /// playing.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the change; the queue is
    /// left as it was.
    pub fn play_next(&self, track: TrackId) -> Result<()> {
        let mut core = self.lock();
        if core.tracks.is_empty() {
            return match self.install(&mut core, vec![track], 0, QueueSource::custom(), QueueOrigin::Manual) {
                Ok(_) => {
                    self.set_state(&mut core, PlaybackState::Loaded);
                    self.publish(&core);
                    Ok(())
                }
                Err(err) => {
                    self.load_failed(&mut core, &err);
                    self.publish(&core);
                    Err(err)
                }
            };
        }

        let position = core.index + 1;
        self.transport
            .insert(position, &track)
            .with_context(|| format!("Failed to queue {track} next"))?;
        info!("Playing {track} next");
        core.tracks.insert(position, track);
        core.revision += 1;
        self.publish(&core);
        Ok(())
    }

    /// Remove the entry at `index`, which must come after the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error for any other index or if the transport rejects the
    /// change.
    pub fn remove_upcoming(&self, index: usize) -> Result<TrackId> {
        let mut core = self.lock();
        if index <= core.index || index >= core.tracks.len() {
            bail!(
                "Queue position {index} is not upcoming (cursor {}, length {})",
                core.index,
                core.tracks.len()
            );
        }
        self.transport
            .remove(index)
            .with_context(|| format!("Failed to remove queue position {index}"))?;
        let removed = core.tracks.remove(index);
        core.revision += 1;
        debug!("Removed {removed} from position {index}");
        self.publish(&core);
        Ok(removed)
    }

    /// Apply a transport notification.
    ///
    /// Returns false if the event was ignored: not about the queue, issued
    /// for a superseded generation, or pointing outside the queue.
    pub fn handle_transport_event(&self, event: &TransportEvent) -> bool {
        let Some(generation) = event.generation() else {
            return false;
        };
        let mut core = self.lock();
        if generation != core.generation {
            debug!("Ignoring {event:?}: generation {generation} superseded by {}", core.generation);
            return false;
        }
        if core.tracks.is_empty() {
            return false;
        }

        match event {
            TransportEvent::TrackChanged { index, .. } => {
                let index = *index;
                if index >= core.tracks.len() {
                    warn!("Transport reported position {index} outside a queue of {}", core.tracks.len());
                    return false;
                }
                if index != core.index {
                    if let Some(previous) = core.now_playing().cloned() {
                        self.remember(&mut core, previous);
                    }
                    core.index = index;
                    self.announce_track(&core);
                }
                self.set_state(&mut core, PlaybackState::Playing);
            }
            TransportEvent::TrackCompleted { .. } => {
                core.failures = 0;
                self.step_forward(&mut core);
            }
            TransportEvent::TrackFailed { index, reason, .. } => {
                let index = *index;
                if index != core.index {
                    debug!("Ignoring failure of position {index}, cursor is at {}", core.index);
                    return false;
                }
                if self.register_failure(&mut core, index, reason) {
                    let target = (index + 1) % core.tracks.len();
                    self.start(&mut core, target, Some(index), None);
                }
            }
            _ => return false,
        }
        self.publish(&core);
        true
    }

    fn lock(&self) -> MutexGuard<'_, QueueCore> {
        match self.core.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, core: &QueueCore) {
        let snapshot = Arc::new(core.snapshot());
        match self.published.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    fn set_state(&self, core: &mut QueueCore, state: PlaybackState) {
        if core.state != state {
            debug!("Playback state {} -> {}", core.state, state);
            core.state = state;
            self.events.publish(QueueEvent::StateChanged(state));
        }
    }

    fn announce_track(&self, core: &QueueCore) {
        if let Some(track) = core.current() {
            trace!("Now at {track} (position {})", core.index);
            self.events.publish(QueueEvent::TrackChanged {
                generation: core.generation,
                index: core.index,
                track: track.clone(),
            });
        }
    }

    fn remember(&self, core: &mut QueueCore, id: TrackId) {
        core.window.set_capacity(self.shuffle.config().history_limit);
        core.window.push(id);
    }

    /// Bump the generation and hand the new queue to the transport.
    ///
    /// Returns `Ok(false)` for an empty queue, which is not loaded.
    fn install(
        &self,
        core: &mut QueueCore,
        tracks: Vec<TrackId>,
        index: usize,
        source: QueueSource,
        origin: QueueOrigin,
    ) -> Result<bool> {
        core.generation += 1;
        core.revision = 0;
        core.tracks = tracks;
        core.index = index;
        core.source = source;
        core.origin = origin;
        core.failures = 0;
        info!(
            "Installed queue generation {} ({} tracks, {:?})",
            core.generation,
            core.tracks.len(),
            core.source.kind
        );
        self.events.publish(QueueEvent::QueueReplaced {
            generation: core.generation,
            len: core.tracks.len(),
        });

        if core.tracks.is_empty() {
            self.set_state(core, PlaybackState::Empty);
            return Ok(false);
        }

        let request = LoadRequest {
            generation: core.generation,
            tracks: core.tracks.clone(),
            start_index: index,
        };
        self.transport
            .load(&request)
            .with_context(|| format!("Failed to load queue generation {}", core.generation))?;
        Ok(true)
    }

    fn replace_and_start(
        &self,
        core: &mut QueueCore,
        tracks: Vec<TrackId>,
        index: usize,
        source: QueueSource,
        origin: QueueOrigin,
        previous: Option<TrackId>,
    ) {
        match self.install(core, tracks, index, source, origin) {
            Ok(true) => self.start(core, index, None, previous),
            Ok(false) => {}
            Err(err) => self.load_failed(core, &err),
        }
    }

    fn load_failed(&self, core: &mut QueueCore, err: &anyhow::Error) {
        warn!("{err:#}");
        self.set_state(core, PlaybackState::NoPlayableTracks);
        self.events.publish(QueueEvent::NoPlayableTracks { generation: core.generation });
    }

    /// Start the track at `target`, skipping forward past failures until
    /// something plays or every entry has failed.
    ///
    /// `from` is the transport's current position when it must be moved
    /// first; `None` means it already sits at `target`. `previous` enters the
    /// anti-repeat window once a track actually starts.
    fn start(&self, core: &mut QueueCore, mut target: usize, mut from: Option<usize>, previous: Option<TrackId>) {
        loop {
            let attempt = self.try_start(core, target, from);
            core.index = target;
            match attempt {
                Ok(()) => {
                    if let Some(previous) = previous {
                        self.remember(core, previous);
                    }
                    self.set_state(core, PlaybackState::Playing);
                    self.announce_track(core);
                    return;
                }
                Err(err) => {
                    if !self.register_failure(core, target, &format!("{err:#}")) {
                        return;
                    }
                    from = Some(target);
                    target = (target + 1) % core.tracks.len();
                }
            }
        }
    }

    /// Moves use absolute positions: a transport may have advanced on its own
    /// since `from` was last reported.
    fn try_start(&self, core: &QueueCore, target: usize, from: Option<usize>) -> Result<()> {
        if let Some(from) = from {
            let moved = if target == from {
                self.transport.seek(Duration::ZERO)
            } else {
                self.transport.skip_to(target)
            };
            moved.with_context(|| format!("Failed to move transport to position {target}"))?;
        }
        let track = core.tracks.get(target).map_or("<none>", TrackId::as_str);
        self.transport
            .play()
            .with_context(|| format!("Failed to start {track}"))
    }

    /// Record a start failure. Returns false once every entry has failed in
    /// a row, after switching to [`PlaybackState::NoPlayableTracks`].
    fn register_failure(&self, core: &mut QueueCore, index: usize, reason: &str) -> bool {
        warn!("Position {index} of queue generation {} failed: {reason}", core.generation);
        if let Some(track) = core.tracks.get(index) {
            self.events.publish(QueueEvent::TrackFailed {
                generation: core.generation,
                index,
                track: track.clone(),
                reason: reason.to_string(),
            });
        }

        core.failures += 1;
        if core.failures < core.tracks.len() {
            return true;
        }
        warn!("All {} queued tracks failed to play", core.tracks.len());
        self.set_state(core, PlaybackState::NoPlayableTracks);
        self.events.publish(QueueEvent::NoPlayableTracks { generation: core.generation });
        false
    }

    fn step_forward(&self, core: &mut QueueCore) {
        let from = core.index;
        let previous = core.now_playing().cloned();
        let target = if core.repeat == RepeatMode::One {
            Some(from)
        } else if from + 1 < core.tracks.len() {
            Some(from + 1)
        } else if let Some(appended) = self.refill(core) {
            Some(appended)
        } else if core.repeat == RepeatMode::All {
            Some(0)
        } else {
            None
        };

        match target {
            Some(target) => self.start(core, target, Some(from), previous),
            None => self.finish(core),
        }
    }

    fn step_backward(&self, core: &mut QueueCore) {
        let from = core.index;
        let previous = core.now_playing().cloned();
        let target = if from > 0 {
            from - 1
        } else if core.repeat == RepeatMode::All {
            core.tracks.len() - 1
        } else {
            0
        };
        self.start(core, target, Some(from), previous);
    }

    /// Append one engine-selected track to a shuffled queue that ran out.
    fn refill(&self, core: &mut QueueCore) -> Option<usize> {
        let candidates = match &core.origin {
            QueueOrigin::Manual => return None,
            QueueOrigin::Shuffle { scope: Some(scope) } => scope.clone(),
            QueueOrigin::Shuffle { scope: None } => core.library.ids(),
        };
        let config = self.shuffle.config();
        if !config.enabled {
            debug!("Shuffle disabled, not refilling the queue");
            return None;
        }

        core.window.set_capacity(config.history_limit);
        let library = Arc::clone(&core.library);
        let previous = core.current().cloned();
        let next = self
            .shuffle
            .select_next(&library, &candidates, &core.window, previous.as_ref(), &mut core.rng)?;

        let position = core.tracks.len();
        if let Err(err) = self.transport.insert(position, &next) {
            warn!("Could not append {next} to the transport queue: {err:#}");
            return None;
        }
        info!("Queue ran out, continuing with {next}");
        core.tracks.push(next);
        core.revision += 1;
        Some(position)
    }

    fn finish(&self, core: &mut QueueCore) {
        info!("Reached the end of the queue");
        if core.state == PlaybackState::Playing {
            if let Err(err) = self.transport.pause() {
                warn!("Failed to stop the transport at the end of the queue: {err:#}");
            }
        }
        self.set_state(core, PlaybackState::Ended);
    }
}
