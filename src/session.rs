//! Per-app-session wiring of engine, queue, observer and collaborators.
//!
//! A [`Session`] is built once and shared by handle; there is no global
//! state. It routes transport reports to whichever component owns them and
//! loads the lyric timeline whenever the queue lands on a new track.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};

use crate::events::Subscription;
use crate::lyrics::{self, LyricLoader, LyricTimeline};
use crate::observer::PlaybackSessionObserver;
use crate::playback::{Direction, PlaybackQueueManager, PlaybackState, QueueEvent, QueueSource};
use crate::shuffle::{ShuffleConfig, ShuffleEngine};
use crate::track::{LibrarySnapshot, PreferenceSource, ShuffleConfigStore, Track, TrackCatalog, TrackId};
use crate::transport::{Transport, TransportEvent};

/// One app session: library snapshot, shuffle engine, queue and observer.
pub struct Session {
    catalog: Arc<dyn TrackCatalog>,
    preferences: Arc<dyn PreferenceSource>,
    lyrics: Arc<dyn LyricLoader>,
    shuffle: Arc<ShuffleEngine>,
    queue: PlaybackQueueManager,
    observer: PlaybackSessionObserver,
    queue_events: Mutex<Subscription<QueueEvent>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("shuffle", &self.shuffle)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Load the library and the persisted shuffle configuration and wire up
    /// the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog, the preference store or the config
    /// store cannot be read.
    pub fn new(
        catalog: Arc<dyn TrackCatalog>,
        preferences: Arc<dyn PreferenceSource>,
        config_store: Arc<dyn ShuffleConfigStore>,
        lyrics: Arc<dyn LyricLoader>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        Self::with_rng(catalog, preferences, config_store, lyrics, transport, StdRng::from_entropy())
    }

    /// [`Session::new`] with a fixed random source.
    ///
    /// # Errors
    ///
    /// Same as [`Session::new`].
    pub fn with_rng(
        catalog: Arc<dyn TrackCatalog>,
        preferences: Arc<dyn PreferenceSource>,
        config_store: Arc<dyn ShuffleConfigStore>,
        lyrics: Arc<dyn LyricLoader>,
        transport: Arc<dyn Transport>,
        rng: StdRng,
    ) -> Result<Self> {
        let library = Arc::new(
            LibrarySnapshot::load(catalog.as_ref(), preferences.as_ref()).context("Failed to load the library")?,
        );
        let shuffle = Arc::new(ShuffleEngine::load(config_store)?);
        let queue = PlaybackQueueManager::with_rng(Arc::clone(&shuffle), transport, Arc::clone(&library), rng);
        let queue_events = Mutex::new(queue.subscribe());
        info!("Session ready with {} tracks and {} merged groups", library.len(), library.groups.len());

        Ok(Self {
            catalog,
            preferences,
            lyrics,
            shuffle,
            queue,
            observer: PlaybackSessionObserver::new(),
            queue_events,
        })
    }

    /// Reload catalog and preferences into a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if either collaborator fails; the old snapshot stays
    /// in use.
    pub fn refresh(&self) -> Result<Arc<LibrarySnapshot>> {
        let library = Arc::new(
            LibrarySnapshot::load(self.catalog.as_ref(), self.preferences.as_ref())
                .context("Failed to refresh the library")?,
        );
        self.queue.refresh_library(Arc::clone(&library));
        debug!("Library refreshed: {} tracks", library.len());
        Ok(library)
    }

    /// Persist `config` and reload the snapshot, so that consistent sources
    /// take effect for the next shuffle or refill.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be saved or the library
    /// cannot be reloaded.
    pub fn update_shuffle_config(&self, config: ShuffleConfig) -> Result<Arc<LibrarySnapshot>> {
        self.shuffle.update_config(config)?;
        self.refresh()
    }

    pub fn queue(&self) -> &PlaybackQueueManager {
        &self.queue
    }

    pub fn shuffle(&self) -> &ShuffleEngine {
        &self.shuffle
    }

    pub fn observer(&self) -> &PlaybackSessionObserver {
        &self.observer
    }

    /// Snapshot the queue currently shuffles and refills from.
    pub fn library(&self) -> Arc<LibrarySnapshot> {
        self.queue.library()
    }

    /// Top `n` recommendations across the whole library.
    pub fn recommend(&self, n: usize) -> Vec<Track> {
        let library = self.library();
        self.shuffle.top_n(&library, &library.ids(), n, &mut rand::thread_rng())
    }

    /// Load `tracks` without playing; see [`PlaybackQueueManager::init`].
    pub fn init(&self, tracks: Vec<TrackId>, source: QueueSource) {
        self.queue.init(tracks, source);
        self.sync_observer();
    }

    pub fn play_song(&self, track: TrackId, context: Vec<TrackId>, source: QueueSource) -> Option<TrackId> {
        let playing = self.queue.play_song(track, context, source);
        self.sync_observer();
        playing
    }

    pub fn shuffle_and_play(&self, scope: Option<&[TrackId]>) -> Option<TrackId> {
        let playing = self.queue.shuffle_and_play(scope);
        self.sync_observer();
        playing
    }

    pub fn advance(&self, direction: Direction) -> Option<TrackId> {
        let playing = self.queue.advance(direction);
        self.sync_observer();
        playing
    }

    /// Route one transport report. Returns false if it was dropped as stale
    /// or irrelevant.
    pub fn handle_transport_event(&self, event: &TransportEvent) -> bool {
        match event {
            TransportEvent::Position(position) => self.observer.on_position(*position),
            TransportEvent::Duration(duration) => self.observer.on_duration(*duration),
            TransportEvent::Buffering { buffered, is_buffering } => {
                self.observer.on_buffering(*buffered, *is_buffering);
            }
            _ => {
                let applied = self.queue.handle_transport_event(event);
                self.sync_observer();
                return applied;
            }
        }
        true
    }

    /// Timeline for `id`, empty when unavailable.
    pub fn lyrics_for(&self, id: &TrackId) -> LyricTimeline {
        let reference = self
            .library()
            .track(id)
            .and_then(|track| track.lyrics.clone())
            .unwrap_or_else(|| lyrics::default_reference(id.as_str()));

        match self.lyrics.load(&reference) {
            Ok(Some(timeline)) => timeline,
            Ok(None) => {
                debug!("No lyrics for {id}");
                LyricTimeline::default()
            }
            Err(err) => {
                warn!("Failed to load lyrics for {id}: {err:#}");
                LyricTimeline::default()
            }
        }
    }

    /// Apply queued manager events to the observer. Only the latest track
    /// change matters; intermediate ones (failed skips) are not loaded.
    fn sync_observer(&self) {
        let events = match self.queue_events.lock() {
            Ok(sub) => sub.drain(),
            Err(poisoned) => poisoned.into_inner().drain(),
        };

        let mut changed_to = None;
        let mut cleared = false;
        for event in events {
            match event {
                QueueEvent::TrackChanged { track, .. } => {
                    changed_to = Some(track);
                    cleared = false;
                }
                QueueEvent::StateChanged(PlaybackState::Empty | PlaybackState::NoPlayableTracks) => {
                    changed_to = None;
                    cleared = true;
                }
                _ => {}
            }
        }

        if let Some(track) = changed_to {
            let timeline = self.lyrics_for(&track);
            self.observer.on_track_changed(Some(track), timeline);
        } else if cleared {
            self.observer.on_track_changed(None, LyricTimeline::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::MemoryPreferences;
    use crate::transport::LoadRequest;
    use std::collections::HashMap;
    use std::time::Duration;

    struct SilentTransport;

    impl Transport for SilentTransport {
        fn load(&self, _request: &LoadRequest) -> Result<()> {
            Ok(())
        }
        fn play(&self) -> Result<()> {
            Ok(())
        }
        fn pause(&self) -> Result<()> {
            Ok(())
        }
        fn seek(&self, _position: Duration) -> Result<()> {
            Ok(())
        }
        fn skip_next(&self) -> Result<()> {
            Ok(())
        }
        fn skip_previous(&self) -> Result<()> {
            Ok(())
        }
        fn skip_to(&self, _index: usize) -> Result<()> {
            Ok(())
        }
        fn insert(&self, _index: usize, _track: &TrackId) -> Result<()> {
            Ok(())
        }
        fn remove(&self, _index: usize) -> Result<()> {
            Ok(())
        }
    }

    struct MapLyrics(HashMap<String, String>);

    impl LyricLoader for MapLyrics {
        fn load(&self, reference: &str) -> Result<Option<LyricTimeline>> {
            match reference {
                "broken.lrc" => anyhow::bail!("unreadable"),
                _ => Ok(self.0.get(reference).map(|text| LyricTimeline::parse_lrc(text))),
            }
        }
    }

    fn session() -> Result<Session> {
        let tracks = vec![
            Track::new("a.flac"),
            Track::new("b.flac").with_lyrics("custom/b.lrc"),
            Track::new("broken.flac"),
        ];
        let lyrics = MapLyrics(HashMap::from([
            ("a.lrc".to_string(), "[00:00]a one\n[00:05]a two".to_string()),
            ("custom/b.lrc".to_string(), "[00:01]b one".to_string()),
        ]));
        let prefs = Arc::new(MemoryPreferences::default());
        Session::with_rng(
            Arc::new(tracks),
            prefs.clone(),
            prefs,
            Arc::new(lyrics),
            Arc::new(SilentTransport),
            StdRng::seed_from_u64(9),
        )
    }

    fn ids(names: &[&str]) -> Vec<TrackId> {
        names.iter().map(|n| TrackId::from(*n)).collect()
    }

    #[test]
    fn test_track_change_loads_lyrics() -> Result<()> {
        let session = session()?;
        session.play_song(TrackId::from("a.flac"), ids(&["a.flac", "b.flac"]), QueueSource::library());
        assert_eq!(session.observer().timeline().len(), 2);

        session.handle_transport_event(&TransportEvent::Position(Duration::from_secs(6)));
        assert_eq!(session.observer().current_line().as_deref(), Some("a two"));

        session.advance(Direction::Forward);
        let display = session.observer().display();
        assert_eq!(display.track, Some(TrackId::from("b.flac")));
        assert_eq!(display.line, None, "line cursor resets on track change");
        assert_eq!(session.observer().timeline().len(), 1, "explicit lyric reference wins");
        Ok(())
    }

    #[test]
    fn test_transport_driven_track_change_reloads_lyrics() -> Result<()> {
        let session = session()?;
        session.play_song(TrackId::from("b.flac"), ids(&["b.flac", "a.flac"]), QueueSource::library());
        let generation = session.queue().snapshot().generation;

        assert!(session.handle_transport_event(&TransportEvent::TrackChanged { generation, index: 1 }));
        assert_eq!(session.observer().display().track, Some(TrackId::from("a.flac")));
        assert_eq!(session.observer().timeline().len(), 2);
        Ok(())
    }

    #[test]
    fn test_lyric_failures_give_empty_timeline() -> Result<()> {
        let session = session()?;
        assert!(session.lyrics_for(&TrackId::from("broken.flac")).is_empty());
        assert!(session.lyrics_for(&TrackId::from("unknown.flac")).is_empty());
        Ok(())
    }

    #[test]
    fn test_stale_event_is_reported() -> Result<()> {
        let session = session()?;
        session.init(ids(&["a.flac"]), QueueSource::library());
        session.init(ids(&["b.flac"]), QueueSource::library());
        assert!(!session.handle_transport_event(&TransportEvent::TrackCompleted { generation: 1 }));
        Ok(())
    }

    #[test]
    fn test_refresh_picks_up_new_groups() -> Result<()> {
        let prefs = Arc::new(MemoryPreferences::default());
        let session = Session::with_rng(
            Arc::new(vec![Track::new("x"), Track::new("y")]),
            prefs.clone(),
            prefs.clone(),
            Arc::new(MapLyrics(HashMap::new())),
            Arc::new(SilentTransport),
            StdRng::seed_from_u64(1),
        )?;
        assert!(session.library().groups.is_empty());

        prefs.set_groups(vec![crate::track::MergedGroup {
            id: "g".into(),
            members: ids(&["x", "y"]),
            priority: None,
        }]);
        let library = session.refresh()?;
        assert_eq!(library.groups.len(), 1);
        assert_eq!(session.recommend(5).len(), 1, "a group recommends as one entry");
        Ok(())
    }

    #[test]
    fn test_consistent_sources_apply_after_config_update() -> Result<()> {
        let session = session()?;
        assert!(session.library().preferences.consistent.is_empty());

        let config = ShuffleConfig {
            personality: crate::algorithm::Personality::Consistent,
            consistent_sources: vec!["b.flac".to_string()],
            ..session.shuffle().config()
        };
        let library = session.update_shuffle_config(config)?;
        assert!(library.preferences.is_consistent_source(&TrackId::from("b.flac")));
        assert_eq!(session.recommend(1)[0].id, TrackId::from("b.flac"));
        Ok(())
    }
}
