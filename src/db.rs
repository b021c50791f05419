//! SQLite-backed preference store.
//!
//! Holds the user's taste signals (favorites, suggest-less), merged-group
//! definitions, saved playlists and the persisted shuffle configuration.
//! Track metadata and play counts are not stored here; they come from the
//! catalog.
//!
//! Playlists matter to scoring through the shuffle configuration's
//! consistent sources, which [`Store::signals`] resolves against them.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::shuffle::ShuffleConfig;
use crate::track::{resolve_sources, MergedGroup, PreferenceSignals, PreferenceSource, ShuffleConfigStore, TrackId};

const SHUFFLE_CONFIG_KEY: &str = "shuffle_config";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS favorites (
        track_id TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS suggest_less (
        track_id TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS merged_groups (
        id       TEXT PRIMARY KEY,
        priority TEXT
    );
    CREATE TABLE IF NOT EXISTS group_members (
        group_id TEXT    NOT NULL REFERENCES merged_groups(id) ON DELETE CASCADE,
        track_id TEXT    NOT NULL UNIQUE,
        position INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS playlist_tracks (
        playlist_id TEXT    NOT NULL,
        track_id    TEXT    NOT NULL,
        position    INTEGER NOT NULL,
        PRIMARY KEY (playlist_id, position)
    );
    CREATE TABLE IF NOT EXISTS settings (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

pub struct Store {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (creating if needed) the database at `path` and bring its schema
    /// up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Rusqlite DB connection refused. DB location: {}", path.display()))?;
        info!("Opened preference database {}", path.display());
        Self::with_connection(conn)
    }

    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("Invalid SQL command when creating preference tables")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn set_favorite(&self, id: &TrackId, favorite: bool) -> Result<()> {
        self.set_flag("favorites", id, favorite)
    }

    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn set_suggest_less(&self, id: &TrackId, suggest_less: bool) -> Result<()> {
        self.set_flag("suggest_less", id, suggest_less)
    }

    fn set_flag(&self, table: &str, id: &TrackId, on: bool) -> Result<()> {
        let sql = if on {
            format!("INSERT OR IGNORE INTO {table} (track_id) VALUES (?1)")
        } else {
            format!("DELETE FROM {table} WHERE track_id = ?1")
        };
        self.lock()
            .execute(&sql, [id.as_str()])
            .with_context(|| format!("Failed to update {table} for {id}"))?;
        debug!("{table}: {id} -> {on}");
        Ok(())
    }

    /// Define a merged group.
    ///
    /// # Errors
    ///
    /// Returns an error if the group has fewer than two distinct members, if
    /// `priority` is not one of them, if the id is taken, or if a member
    /// already belongs to another group.
    pub fn create_group(&self, id: &str, members: &[TrackId], priority: Option<&TrackId>) -> Result<()> {
        let mut distinct: Vec<&TrackId> = Vec::with_capacity(members.len());
        for member in members {
            if !distinct.contains(&member) {
                distinct.push(member);
            }
        }
        if distinct.len() < 2 {
            bail!("A merged group needs at least two distinct tracks");
        }
        if let Some(priority) = priority {
            if !distinct.contains(&priority) {
                bail!("Priority track {priority} is not a member of group {id}");
            }
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO merged_groups (id, priority) VALUES (?1, ?2)",
            (id, priority.map(TrackId::as_str)),
        )
        .with_context(|| format!("Group {id} already exists"))?;
        {
            let mut stmt = tx.prepare("INSERT INTO group_members (group_id, track_id, position) VALUES (?1, ?2, ?3)")?;
            for (position, member) in distinct.iter().enumerate() {
                stmt.execute((id, member.as_str(), position as i64))
                    .with_context(|| format!("Track {member} already belongs to a merged group"))?;
            }
        }
        tx.commit().context("Committing SQL transaction failed")?;
        info!("Created merged group {id} with {} tracks", distinct.len());
        Ok(())
    }

    /// Returns false if no such group existed.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn delete_group(&self, id: &str) -> Result<bool> {
        let removed = self
            .lock()
            .execute("DELETE FROM merged_groups WHERE id = ?1", [id])
            .with_context(|| format!("Failed to delete group {id}"))?;
        Ok(removed > 0)
    }

    /// # Errors
    ///
    /// Returns an error if the group does not exist or `priority` is not a
    /// member.
    pub fn set_group_priority(&self, id: &str, priority: Option<&TrackId>) -> Result<()> {
        let conn = self.lock();
        if let Some(priority) = priority {
            let member: Option<String> = conn
                .query_row(
                    "SELECT group_id FROM group_members WHERE track_id = ?1",
                    [priority.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if member.as_deref() != Some(id) {
                bail!("Track {priority} is not a member of group {id}");
            }
        }

        let updated = conn
            .execute(
                "UPDATE merged_groups SET priority = ?1 WHERE id = ?2",
                (priority.map(TrackId::as_str), id),
            )
            .with_context(|| format!("Failed to update priority of group {id}"))?;
        if updated == 0 {
            bail!("No merged group named {id}");
        }
        Ok(())
    }

    /// Create or replace a playlist.
    ///
    /// # Arguments
    ///
    /// * `id` - Playlist id, also usable as a consistent source
    /// * `tracks` - Members in play order; duplicates are kept
    ///
    /// # Errors
    ///
    /// Returns an error if `tracks` is empty or on database failure.
    pub fn save_playlist(&self, id: &str, tracks: &[TrackId]) -> Result<()> {
        if tracks.is_empty() {
            bail!("Playlist {id} needs at least one track");
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM playlist_tracks WHERE playlist_id = ?1", [id])
            .with_context(|| format!("Failed to replace playlist {id}"))?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO playlist_tracks (playlist_id, track_id, position) VALUES (?1, ?2, ?3)")?;
            for (position, track) in tracks.iter().enumerate() {
                stmt.execute((id, track.as_str(), position as i64))?;
            }
        }
        tx.commit().context("Committing SQL transaction failed")?;
        info!("Saved playlist {id} with {} tracks", tracks.len());
        Ok(())
    }

    /// Returns false if no such playlist existed.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn delete_playlist(&self, id: &str) -> Result<bool> {
        let removed = self
            .lock()
            .execute("DELETE FROM playlist_tracks WHERE playlist_id = ?1", [id])
            .with_context(|| format!("Failed to delete playlist {id}"))?;
        Ok(removed > 0)
    }

    /// Every playlist by id, members in play order.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn playlists(&self) -> Result<BTreeMap<String, Vec<TrackId>>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT playlist_id, track_id FROM playlist_tracks ORDER BY playlist_id, position")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read playlists")?;

        let mut playlists: BTreeMap<String, Vec<TrackId>> = BTreeMap::new();
        for (id, track) in rows {
            playlists.entry(id).or_default().push(TrackId::from(track));
        }
        Ok(playlists)
    }

    fn track_set(conn: &Connection, table: &str) -> Result<Vec<TrackId>> {
        let mut stmt = conn.prepare(&format!("SELECT track_id FROM {table} ORDER BY track_id"))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read {table}"))?;
        Ok(ids.into_iter().map(TrackId::from).collect())
    }
}

impl PreferenceSource for Store {
    /// Favorites, suggest-less marks and the tracks behind the saved
    /// configuration's consistent sources.
    fn signals(&self) -> Result<PreferenceSignals> {
        let sources = self.load_shuffle_config()?.map(|c| c.consistent_sources).unwrap_or_default();
        let consistent = if sources.is_empty() {
            Default::default()
        } else {
            resolve_sources(&sources, &self.playlists()?)
        };

        let conn = self.lock();
        Ok(PreferenceSignals {
            favorites: Self::track_set(&conn, "favorites")?.into_iter().collect(),
            suggest_less: Self::track_set(&conn, "suggest_less")?.into_iter().collect(),
            consistent,
        })
    }

    fn merged_groups(&self) -> Result<Vec<MergedGroup>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT g.id, g.priority, m.track_id
             FROM merged_groups g JOIN group_members m ON m.group_id = g.id
             ORDER BY g.id, m.position",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read merged groups")?;

        let mut groups: Vec<MergedGroup> = Vec::new();
        for (id, priority, member) in rows {
            match groups.last_mut() {
                Some(group) if group.id == id => group.members.push(TrackId::from(member)),
                _ => groups.push(MergedGroup {
                    id,
                    members: vec![TrackId::from(member)],
                    priority: priority.map(TrackId::from),
                }),
            }
        }
        Ok(groups)
    }
}

impl ShuffleConfigStore for Store {
    fn load_shuffle_config(&self) -> Result<Option<ShuffleConfig>> {
        let value: Option<String> = self
            .lock()
            .query_row("SELECT value FROM settings WHERE key = ?1", [SHUFFLE_CONFIG_KEY], |row| row.get(0))
            .optional()
            .context("Failed to read shuffle configuration")?;

        let Some(value) = value else {
            return Ok(None);
        };
        match serde_json::from_str(&value) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                warn!("Stored shuffle configuration is unreadable ({err}), using defaults");
                Ok(None)
            }
        }
    }

    fn save_shuffle_config(&self, config: &ShuffleConfig) -> Result<()> {
        let value = serde_json::to_string(config).context("Failed to serialize shuffle configuration")?;
        self.lock()
            .execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                (SHUFFLE_CONFIG_KEY, value),
            )
            .context("Failed to save shuffle configuration")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Personality;
    use tempfile::TempDir;

    fn id(s: &str) -> TrackId {
        TrackId::from(s)
    }

    #[test]
    fn test_signals_round_trip() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.set_favorite(&id("a"), true)?;
        store.set_favorite(&id("a"), true)?;
        store.set_favorite(&id("b"), true)?;
        store.set_favorite(&id("b"), false)?;
        store.set_suggest_less(&id("a"), true)?;

        let signals = store.signals()?;
        assert!(signals.is_favorite(&id("a")));
        assert!(!signals.is_favorite(&id("b")));
        assert!(signals.is_suggest_less(&id("a")), "a track may be both favorite and suggest-less");
        Ok(())
    }

    #[test]
    fn test_group_lifecycle() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.create_group("song", &[id("x"), id("y"), id("x")], Some(&id("y")))?;

        let groups = store.merged_groups()?;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, [id("x"), id("y")]);
        assert_eq!(groups[0].priority, Some(id("y")));

        store.set_group_priority("song", None)?;
        assert_eq!(store.merged_groups()?[0].priority, None);

        assert!(store.delete_group("song")?);
        assert!(!store.delete_group("song")?);
        assert!(store.merged_groups()?.is_empty());

        store.create_group("again", &[id("x"), id("z")], None)?;
        assert_eq!(store.merged_groups()?.len(), 1, "members are free again after deletion");
        Ok(())
    }

    #[test]
    fn test_group_validation() -> Result<()> {
        let store = Store::open_in_memory()?;
        assert!(store.create_group("solo", &[id("x"), id("x")], None).is_err());
        assert!(store.create_group("bad", &[id("x"), id("y")], Some(&id("z"))).is_err());

        store.create_group("first", &[id("x"), id("y")], None)?;
        assert!(
            store.create_group("second", &[id("y"), id("z")], None).is_err(),
            "a track belongs to at most one group"
        );
        assert_eq!(store.merged_groups()?.len(), 1, "failed creation must roll back");

        assert!(store.set_group_priority("first", Some(&id("z"))).is_err());
        assert!(store.set_group_priority("missing", None).is_err());
        Ok(())
    }

    #[test]
    fn test_shuffle_config_persistence() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("encore.db");
        {
            let store = Store::open(&path)?;
            assert_eq!(store.load_shuffle_config()?, None);
            let config = ShuffleConfig {
                personality: Personality::Explorer,
                history_limit: 12,
                ..ShuffleConfig::default()
            };
            store.save_shuffle_config(&config)?;
            store.save_shuffle_config(&config)?;
        }

        let reopened = Store::open(&path)?;
        let config = reopened.load_shuffle_config()?.expect("config was saved");
        assert_eq!(config.personality, Personality::Explorer);
        assert_eq!(config.history_limit, 12);
        Ok(())
    }

    #[test]
    fn test_playlist_lifecycle() -> Result<()> {
        let store = Store::open_in_memory()?;
        assert!(store.save_playlist("empty", &[]).is_err());

        store.save_playlist("mix", &[id("b"), id("a"), id("b")])?;
        store.save_playlist("calm", &[id("c")])?;
        store.save_playlist("mix", &[id("a"), id("d")])?;

        let playlists = store.playlists()?;
        assert_eq!(playlists.keys().collect::<Vec<_>>(), ["calm", "mix"]);
        assert_eq!(playlists["mix"], [id("a"), id("d")], "saving again replaces the members");

        assert!(store.delete_playlist("mix")?);
        assert!(!store.delete_playlist("mix")?);
        assert_eq!(store.playlists()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_consistent_sources_resolve_through_playlists() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.save_playlist("road-trip", &[id("a"), id("b")])?;
        assert!(store.signals()?.consistent.is_empty());

        let config = ShuffleConfig {
            personality: Personality::Consistent,
            consistent_sources: vec!["road-trip".to_string(), "c".to_string()],
            ..ShuffleConfig::default()
        };
        store.save_shuffle_config(&config)?;

        let signals = store.signals()?;
        for track in ["a", "b", "c"] {
            assert!(signals.is_consistent_source(&id(track)), "{track} should be boosted");
        }
        assert!(!signals.is_consistent_source(&id("road-trip")), "a playlist id stands for its members");
        assert_eq!(store.load_shuffle_config()?.map(|c| c.consistent_sources), Some(config.consistent_sources));
        Ok(())
    }

    #[test]
    fn test_corrupt_shuffle_config_falls_back() -> Result<()> {
        let store = Store::open_in_memory()?;
        store
            .lock()
            .execute("INSERT INTO settings (key, value) VALUES (?1, 'garbage')", [SHUFFLE_CONFIG_KEY])?;
        assert_eq!(store.load_shuffle_config()?, None);
        Ok(())
    }
}
