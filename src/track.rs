//! # Library Model
//!
//! Tracks, merged groups and preference signals, plus the collaborator traits
//! through which the engine reads them. Everything in here is mirrored
//! read-only into a [`LibrarySnapshot`] on each refresh; the engine never
//! writes back to the catalog or the preference store.
//!
//! ## Merged groups
//!
//! A merged group is a user-defined set of track ids that are variants of one
//! logical song (a live take, a remaster, ...). [`GroupIndex`] is the lookup
//! the shuffle engine uses to treat such a set as one unit. It is rebuilt from
//! the raw group definitions against the current catalog, so stale references
//! left behind by deleted tracks simply disappear.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::shuffle::ShuffleConfig;

/// Stable, path-derived track identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a merged group.
pub type GroupId = String;

/// A catalog entry as the engine sees it.
///
/// `play_count` is only ever written by the external statistics store; the
/// engine reads it for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub play_count: u64,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
}

impl Track {
    /// Minimal track with only an id; metadata left empty.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: TrackId::new(id),
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            duration_ms: 0,
            play_count: 0,
            cover: None,
            lyrics: None,
        }
    }

    #[must_use]
    pub fn with_play_count(mut self, play_count: u64) -> Self {
        self.play_count = play_count;
        self
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>, album: impl Into<String>) -> Self {
        self.artist = artist.into();
        self.album = album.into();
        self
    }

    #[must_use]
    pub fn with_lyrics(mut self, reference: impl Into<String>) -> Self {
        self.lyrics = Some(reference.into());
        self
    }
}

/// Raw group definition as stored by the preference store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedGroup {
    pub id: GroupId,
    pub members: Vec<TrackId>,
    #[serde(default)]
    pub priority: Option<TrackId>,
}

/// Per-user taste signals.
///
/// The sets are not required to be disjoint. A track in both favorites and
/// suggest-less receives the favorite bonus and the suggest-less penalty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceSignals {
    pub favorites: HashSet<TrackId>,
    pub suggest_less: HashSet<TrackId>,
    /// Tracks from the shuffle configuration's consistent sources, already
    /// resolved by the [`PreferenceSource`].
    pub consistent: HashSet<TrackId>,
}

impl PreferenceSignals {
    pub fn is_favorite(&self, id: &TrackId) -> bool {
        self.favorites.contains(id)
    }

    pub fn is_suggest_less(&self, id: &TrackId) -> bool {
        self.suggest_less.contains(id)
    }

    /// True if `id` came from one of the user's consistent sources.
    pub fn is_consistent_source(&self, id: &TrackId) -> bool {
        self.consistent.contains(id)
    }
}

/// Expand consistent-source entries into the tracks they stand for.
///
/// # Arguments
///
/// * `sources` - Entries of [`ShuffleConfig::consistent_sources`]
/// * `playlists` - Known playlists by id
///
/// # Returns
///
/// The members of every entry naming a playlist, plus every other entry
/// taken as a track id. Ids missing from the catalog are harmless: scoring
/// only ever looks up catalog tracks.
pub fn resolve_sources(sources: &[String], playlists: &BTreeMap<String, Vec<TrackId>>) -> HashSet<TrackId> {
    let mut resolved = HashSet::new();
    for source in sources {
        match playlists.get(source) {
            Some(members) => resolved.extend(members.iter().cloned()),
            None => {
                resolved.insert(TrackId::from(source.as_str()));
            }
        }
    }
    resolved
}

/// Resolved group membership for the current catalog.
#[derive(Debug, Clone, Default)]
pub struct GroupIndex {
    by_track: HashMap<TrackId, GroupId>,
    groups: BTreeMap<GroupId, ResolvedGroup>,
}

#[derive(Debug, Clone)]
struct ResolvedGroup {
    /// Sorted, known members only.
    members: Vec<TrackId>,
    priority: Option<TrackId>,
}

impl GroupIndex {
    /// Resolve `groups` against the set of ids present in the catalog.
    ///
    /// Dangling members are dropped, groups left with fewer than two members
    /// are dissolved, and a track claimed twice stays with the group whose id
    /// sorts first.
    pub fn build<'a>(groups: &[MergedGroup], known: impl IntoIterator<Item = &'a TrackId>) -> Self {
        let known: HashSet<&TrackId> = known.into_iter().collect();

        let mut ordered: Vec<&MergedGroup> = groups.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut claimed: HashSet<TrackId> = HashSet::new();
        let mut index = Self::default();

        for group in ordered {
            let mut members: Vec<TrackId> = Vec::with_capacity(group.members.len());
            for member in &group.members {
                if !known.contains(member) {
                    debug!("Dropping unknown track {member} from merged group {}", group.id);
                    continue;
                }
                if claimed.contains(member) {
                    warn!("Track {member} already belongs to another merged group; ignoring it in {}", group.id);
                    continue;
                }
                if !members.contains(member) {
                    members.push(member.clone());
                }
            }

            if members.len() < 2 {
                debug!("Merged group {} has fewer than two known members, dissolving", group.id);
                continue;
            }

            members.sort();
            let priority = group
                .priority
                .as_ref()
                .filter(|p| members.contains(p))
                .cloned();
            if group.priority.is_some() && priority.is_none() {
                debug!("Priority of merged group {} is not a known member, falling back", group.id);
            }

            for member in &members {
                claimed.insert(member.clone());
                index.by_track.insert(member.clone(), group.id.clone());
            }
            index.groups.insert(group.id.clone(), ResolvedGroup { members, priority });
        }

        index
    }

    pub fn group_of(&self, id: &TrackId) -> Option<&GroupId> {
        self.by_track.get(id)
    }

    pub fn members(&self, group: &str) -> &[TrackId] {
        self.groups.get(group).map_or(&[], |g| g.members.as_slice())
    }

    pub fn priority(&self, group: &str) -> Option<&TrackId> {
        self.groups.get(group).and_then(|g| g.priority.as_ref())
    }

    /// Priority member, or the lowest id when no priority is set.
    pub fn representative(&self, group: &str) -> Option<&TrackId> {
        let resolved = self.groups.get(group)?;
        resolved.priority.as_ref().or_else(|| resolved.members.first())
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Immutable working set used by the shuffle engine and the queue manager.
#[derive(Debug, Clone, Default)]
pub struct LibrarySnapshot {
    tracks: Vec<Track>,
    by_id: HashMap<TrackId, usize>,
    pub preferences: PreferenceSignals,
    pub groups: GroupIndex,
}

impl LibrarySnapshot {
    pub fn new(tracks: Vec<Track>, preferences: PreferenceSignals, groups: &[MergedGroup]) -> Self {
        let mut by_id = HashMap::with_capacity(tracks.len());
        let mut unique: Vec<Track> = Vec::with_capacity(tracks.len());
        for track in tracks {
            if by_id.contains_key(&track.id) {
                warn!("Duplicate track id {} in catalog, keeping the first entry", track.id);
                continue;
            }
            by_id.insert(track.id.clone(), unique.len());
            unique.push(track);
        }

        let groups = GroupIndex::build(groups, unique.iter().map(|t| &t.id));
        Self { tracks: unique, by_id, preferences, groups }
    }

    /// Read everything from the collaborators into a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Propagates catalog or preference-store failures.
    pub fn load(catalog: &dyn TrackCatalog, preferences: &dyn PreferenceSource) -> Result<Self> {
        let tracks = catalog.tracks().context("Failed to read track catalog")?;
        let signals = preferences.signals().context("Failed to read preference signals")?;
        let groups = preferences.merged_groups().context("Failed to read merged groups")?;
        debug!(
            "Loaded library snapshot: {} tracks, {} favorites, {} suggest-less, {} groups",
            tracks.len(),
            signals.favorites.len(),
            signals.suggest_less.len(),
            groups.len()
        );
        Ok(Self::new(tracks, signals, &groups))
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: &TrackId) -> Option<&Track> {
        self.by_id.get(id).map(|&i| &self.tracks[i])
    }

    pub fn contains(&self, id: &TrackId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.id.clone()).collect()
    }

    /// Tracks matching a user-typed query.
    ///
    /// An exact id wins outright. Otherwise every track whose id, title or
    /// `artist - title` contains the query (case-insensitively) is returned
    /// in catalog order.
    pub fn search(&self, query: &str) -> Vec<&Track> {
        if let Some(track) = self.track(&TrackId::from(query)) {
            return vec![track];
        }
        let needle = query.to_lowercase();
        self.tracks
            .iter()
            .filter(|t| {
                t.id.as_str().to_lowercase().contains(&needle)
                    || t.title.to_lowercase().contains(&needle)
                    || format!("{} - {}", t.artist, t.title).to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Source of the canonical track list.
pub trait TrackCatalog: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn tracks(&self) -> Result<Vec<Track>>;
}

impl TrackCatalog for Vec<Track> {
    fn tracks(&self) -> Result<Vec<Track>> {
        Ok(self.clone())
    }
}

/// Source of favorites, suggest-less tracks and merged groups.
pub trait PreferenceSource: Send + Sync {
    /// Current taste signals, consistent sources included.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn signals(&self) -> Result<PreferenceSignals>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn merged_groups(&self) -> Result<Vec<MergedGroup>>;
}

/// Persistence for the shuffle configuration.
pub trait ShuffleConfigStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn load_shuffle_config(&self) -> Result<Option<ShuffleConfig>>;

    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    fn save_shuffle_config(&self, config: &ShuffleConfig) -> Result<()>;
}

/// JSON library file: an array of [`Track`] objects.
#[derive(Debug, Clone)]
pub struct JsonCatalog {
    path: PathBuf,
}

impl JsonCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrackCatalog for JsonCatalog {
    fn tracks(&self) -> Result<Vec<Track>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read library file {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Library file {} is not a valid track list", self.path.display()))
    }
}

/// In-memory preference store; useful for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    signals: Mutex<PreferenceSignals>,
    groups: Mutex<Vec<MergedGroup>>,
    config: Mutex<Option<ShuffleConfig>>,
}

impl MemoryPreferences {
    pub fn new(signals: PreferenceSignals, groups: Vec<MergedGroup>) -> Self {
        Self {
            signals: Mutex::new(signals),
            groups: Mutex::new(groups),
            config: Mutex::new(None),
        }
    }

    pub fn set_signals(&self, signals: PreferenceSignals) {
        if let Ok(mut guard) = self.signals.lock() {
            *guard = signals;
        }
    }

    pub fn set_groups(&self, groups: Vec<MergedGroup>) {
        if let Ok(mut guard) = self.groups.lock() {
            *guard = groups;
        }
    }
}

impl PreferenceSource for MemoryPreferences {
    /// Stored signals, with the saved configuration's consistent sources
    /// taken as track ids.
    fn signals(&self) -> Result<PreferenceSignals> {
        let mut signals = self
            .signals
            .lock()
            .map(|s| s.clone())
            .map_err(|_| anyhow::anyhow!("Preference lock poisoned"))?;
        if let Some(config) = self.load_shuffle_config()? {
            let sources = resolve_sources(&config.consistent_sources, &BTreeMap::new());
            signals.consistent.extend(sources);
        }
        Ok(signals)
    }

    fn merged_groups(&self) -> Result<Vec<MergedGroup>> {
        self.groups
            .lock()
            .map(|g| g.clone())
            .map_err(|_| anyhow::anyhow!("Group lock poisoned"))
    }
}

impl ShuffleConfigStore for MemoryPreferences {
    fn load_shuffle_config(&self) -> Result<Option<ShuffleConfig>> {
        self.config
            .lock()
            .map(|c| c.clone())
            .map_err(|_| anyhow::anyhow!("Config lock poisoned"))
    }

    fn save_shuffle_config(&self, config: &ShuffleConfig) -> Result<()> {
        let mut guard = self
            .config
            .lock()
            .map_err(|_| anyhow::anyhow!("Config lock poisoned"))?;
        *guard = Some(config.clone());
        Ok(())
    }
}
