//! # Shuffle Engine
//!
//! Turns [`crate::algorithm`] scores into sequences: ranked recommendations,
//! full weighted-random permutations and single next-track picks.
//!
//! ## Group atomicity
//!
//! Before anything is scored, candidates are *collapsed*: every merged group
//! contributes exactly one entry, its priority member when that member is
//! among the candidates, otherwise its lowest-id candidate member. The entry
//! is scored as that concrete track, so favorite and suggest-less status are
//! evaluated per member. Generated sequences therefore never contain two
//! variants of the same song.
//!
//! ## Anti-repeat
//!
//! Single-track selection drops recently played candidates in tiers so that a
//! tiny library never deadlocks:
//!
//! 1. everything in the [`AntiRepeatWindow`];
//! 2. failing that, only the immediately preceding track;
//! 3. failing that (a library of one), nothing.

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::algorithm::{self, Personality};
use crate::history::{AntiRepeatWindow, DEFAULT_HISTORY_LIMIT};
use crate::track::{GroupId, LibrarySnapshot, ShuffleConfigStore, Track, TrackId};

const SAME_ARTIST_FACTOR: f64 = 0.5;
const SAME_ALBUM_FACTOR: f64 = 0.7;

/// Persisted shuffle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    /// When off, the end of a shuffled queue is not refilled.
    pub enabled: bool,
    pub personality: Personality,
    pub anti_repeat_enabled: bool,
    pub history_limit: usize,
    pub streak_breaker_enabled: bool,
    /// Playlist or track ids whose tracks the Consistent personality boosts.
    ///
    /// Resolved into [`crate::track::PreferenceSignals::consistent`] when the
    /// library snapshot is loaded, so changes apply from the next refresh.
    pub consistent_sources: Vec<String>,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            personality: Personality::Default,
            anti_repeat_enabled: true,
            history_limit: DEFAULT_HISTORY_LIMIT,
            streak_breaker_enabled: true,
            consistent_sources: Vec::new(),
        }
    }
}

/// One collapsed entry: a concrete track standing for itself or its group.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub track: &'a Track,
    pub group: Option<&'a GroupId>,
}

impl Candidate<'_> {
    /// True if this entry, or any variant of its group, is in `window`.
    fn is_recent(&self, window: &AntiRepeatWindow, snapshot: &LibrarySnapshot) -> bool {
        if window.contains(&self.track.id) {
            return true;
        }
        self.group
            .is_some_and(|g| snapshot.groups.members(g).iter().any(|m| window.contains(m)))
    }

    fn is_same_song(&self, other: &TrackId, snapshot: &LibrarySnapshot) -> bool {
        if self.track.id == *other {
            return true;
        }
        match (self.group, snapshot.groups.group_of(other)) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        }
    }
}

/// Collapse `candidates` so that each merged group appears once.
///
/// Order follows the first appearance of each track or group. Ids missing
/// from the snapshot and duplicates are dropped.
pub fn collapse<'a>(snapshot: &'a LibrarySnapshot, candidates: &[TrackId]) -> Vec<Candidate<'a>> {
    let present: HashSet<&TrackId> = candidates.iter().filter(|id| snapshot.contains(id)).collect();
    let mut seen_tracks: HashSet<&TrackId> = HashSet::with_capacity(present.len());
    let mut seen_groups: HashSet<&GroupId> = HashSet::new();
    let mut collapsed = Vec::with_capacity(present.len());

    for id in candidates {
        let Some(track) = snapshot.track(id) else {
            trace!("Skipping candidate {id}: not in library");
            continue;
        };

        match snapshot.groups.group_of(id) {
            None => {
                if seen_tracks.insert(&track.id) {
                    collapsed.push(Candidate { track, group: None });
                }
            }
            Some(group) => {
                if !seen_groups.insert(group) {
                    continue;
                }
                let priority = snapshot.groups.priority(group).filter(|p| present.contains(p));
                let representative = priority
                    .or_else(|| snapshot.groups.members(group).iter().find(|m| present.contains(m)))
                    .and_then(|rep| snapshot.track(rep))
                    .unwrap_or(track);
                collapsed.push(Candidate { track: representative, group: Some(group) });
            }
        }
    }

    collapsed
}

/// Top `n` collapsed candidates by score, highest first.
pub fn rank<R: Rng + ?Sized>(
    snapshot: &LibrarySnapshot,
    candidates: &[TrackId],
    n: usize,
    personality: Personality,
    rng: &mut R,
) -> Vec<Track> {
    let collapsed = collapse(snapshot, candidates);
    if collapsed.is_empty() || n == 0 {
        return Vec::new();
    }

    let tracks: Vec<&Track> = collapsed.iter().map(|c| c.track).collect();
    let scores = algorithm::batch_scores(&tracks, &snapshot.preferences, personality, rng);

    let mut order: Vec<usize> = (0..tracks.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .total_cmp(&scores[a])
            .then_with(|| tracks[a].id.cmp(&tracks[b].id))
    });

    order.into_iter().take(n).map(|i| tracks[i].clone()).collect()
}

/// Weighted random permutation of the collapsed candidates.
///
/// Each entry gets the key `ln(u) / w` with `u` uniform in (0, 1] and `w` its
/// sampling weight; sorting by key descending yields a permutation in which
/// heavier entries tend to come first without ever being pinned there.
pub fn weighted_order<R: Rng + ?Sized>(
    snapshot: &LibrarySnapshot,
    candidates: &[TrackId],
    personality: Personality,
    rng: &mut R,
) -> Vec<TrackId> {
    let collapsed = collapse(snapshot, candidates);
    if collapsed.is_empty() {
        return Vec::new();
    }

    let tracks: Vec<&Track> = collapsed.iter().map(|c| c.track).collect();
    let scores = algorithm::batch_scores(&tracks, &snapshot.preferences, personality, rng);

    let mut keyed: Vec<(f64, &Track)> = tracks
        .iter()
        .zip(&scores)
        .map(|(track, &score)| {
            let u: f64 = 1.0 - rng.gen::<f64>();
            (u.ln() / algorithm::weight_from_score(score), *track)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));

    keyed.into_iter().map(|(_, track)| track.id.clone()).collect()
}

/// Weighted single pick honouring the anti-repeat tiers and streak breaker.
pub fn pick_next<R: Rng + ?Sized>(
    snapshot: &LibrarySnapshot,
    candidates: &[TrackId],
    window: &AntiRepeatWindow,
    previous: Option<&TrackId>,
    config: &ShuffleConfig,
    rng: &mut R,
) -> Option<TrackId> {
    let collapsed = collapse(snapshot, candidates);
    if collapsed.is_empty() {
        debug!("No candidates to pick the next track from");
        return None;
    }

    let not_previous = |c: &Candidate<'_>| previous.map_or(true, |p| !c.is_same_song(p, snapshot));

    let mut pool: Vec<Candidate<'_>> = if config.anti_repeat_enabled {
        collapsed
            .iter()
            .filter(|c| !c.is_recent(window, snapshot) && not_previous(*c))
            .copied()
            .collect()
    } else {
        Vec::new()
    };
    if pool.is_empty() {
        pool = collapsed.iter().filter(|c| not_previous(*c)).copied().collect();
        if config.anti_repeat_enabled && !pool.is_empty() {
            trace!("Anti-repeat window covers every candidate, only excluding the previous track");
        }
    }
    if pool.is_empty() {
        trace!("Single-song library, repeating");
        pool = collapsed;
    }

    let previous_track = previous.and_then(|p| snapshot.track(p));
    let tracks: Vec<&Track> = pool.iter().map(|c| c.track).collect();
    let scores = algorithm::batch_scores(&tracks, &snapshot.preferences, config.personality, rng);
    let weights: Vec<f64> = tracks
        .iter()
        .zip(&scores)
        .map(|(track, &score)| {
            let weight = algorithm::weight_from_score(score);
            if config.streak_breaker_enabled {
                weight * streak_factor(track, previous_track)
            } else {
                weight
            }
        })
        .collect();

    let chosen = match WeightedIndex::new(&weights) {
        Ok(dist) => dist.sample(rng),
        Err(err) => {
            warn!("Weighted selection failed ({err}), taking the heaviest candidate");
            weights
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map_or(0, |(i, _)| i)
        }
    };

    let id = tracks[chosen].id.clone();
    debug!("Selected {id} from {} candidates", tracks.len());
    Some(id)
}

fn streak_factor(candidate: &Track, previous: Option<&Track>) -> f64 {
    let Some(previous) = previous else {
        return 1.0;
    };
    let mut factor = 1.0;
    if is_known(&previous.artist, "Unknown") && candidate.artist == previous.artist {
        factor *= SAME_ARTIST_FACTOR;
    }
    if is_known(&previous.album, "Unknown Album") && candidate.album == previous.album {
        factor *= SAME_ALBUM_FACTOR;
    }
    factor
}

fn is_known(value: &str, placeholder: &str) -> bool {
    !value.trim().is_empty() && value != placeholder
}

/// Owner of the shuffle configuration and entry point for sequence generation.
pub struct ShuffleEngine {
    config: RwLock<ShuffleConfig>,
    update: Mutex<()>,
    store: Arc<dyn ShuffleConfigStore>,
}

impl std::fmt::Debug for ShuffleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShuffleEngine").field("config", &self.config()).finish_non_exhaustive()
    }
}

impl ShuffleEngine {
    /// Build an engine with the persisted configuration, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load(store: Arc<dyn ShuffleConfigStore>) -> Result<Self> {
        let config = store
            .load_shuffle_config()
            .context("Failed to load shuffle configuration")?
            .unwrap_or_default();
        info!("Shuffle engine ready ({} personality, enabled: {})", config.personality, config.enabled);
        Ok(Self::with_config(config, store))
    }

    pub fn with_config(config: ShuffleConfig, store: Arc<dyn ShuffleConfigStore>) -> Self {
        Self {
            config: RwLock::new(config),
            update: Mutex::new(()),
            store,
        }
    }

    /// Current configuration.
    pub fn config(&self) -> ShuffleConfig {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Persist and install `config`.
    ///
    /// Updates are serialized; readers keep seeing the old value until the
    /// store has accepted the new one.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails, in which case nothing changes.
    pub fn update_config(&self, mut config: ShuffleConfig) -> Result<()> {
        let _serial = match self.update.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        config.history_limit = config.history_limit.max(1);

        self.store
            .save_shuffle_config(&config)
            .context("Failed to persist shuffle configuration")?;

        let mut guard = match self.config.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        info!("Shuffle configuration updated: {config:?}");
        *guard = config;
        Ok(())
    }

    /// Change only the personality; unknown names fall back to default.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub fn set_personality(&self, name: &str) -> Result<Personality> {
        let personality = Personality::parse_lenient(name);
        let config = ShuffleConfig { personality, ..self.config() };
        self.update_config(config)?;
        Ok(personality)
    }

    /// Ranked recommendation: the `n` best collapsed candidates.
    pub fn top_n<R: Rng + ?Sized>(
        &self,
        snapshot: &LibrarySnapshot,
        candidates: &[TrackId],
        n: usize,
        rng: &mut R,
    ) -> Vec<Track> {
        rank(snapshot, candidates, n, self.config().personality, rng)
    }

    /// Full weighted shuffle of `candidates`.
    pub fn shuffle_order<R: Rng + ?Sized>(
        &self,
        snapshot: &LibrarySnapshot,
        candidates: &[TrackId],
        rng: &mut R,
    ) -> Vec<TrackId> {
        let order = weighted_order(snapshot, candidates, self.config().personality, rng);
        debug!("Shuffled {} candidates into {} entries", candidates.len(), order.len());
        order
    }

    /// Next track for continuous playback, or `None` with nothing to choose.
    pub fn select_next<R: Rng + ?Sized>(
        &self,
        snapshot: &LibrarySnapshot,
        candidates: &[TrackId],
        window: &AntiRepeatWindow,
        previous: Option<&TrackId>,
        rng: &mut R,
    ) -> Option<TrackId> {
        pick_next(snapshot, candidates, window, previous, &self.config(), rng)
    }
}

/// Count of collapsed entries per group in `sequence`; handy for asserting
/// group atomicity.
pub fn group_occurrences(snapshot: &LibrarySnapshot, sequence: &[TrackId]) -> HashMap<GroupId, usize> {
    let mut counts = HashMap::new();
    for id in sequence {
        if let Some(group) = snapshot.groups.group_of(id) {
            *counts.entry(group.clone()).or_insert(0) += 1;
        }
    }
    counts
}
