//! # Configuration Module
//!
//! Data directory setup and the runtime settings file for Encore.
//!
//! ## Data Storage
//!
//! Encore keeps everything in the platform-standard data directory:
//! - Linux: `~/.local/share/encore/`
//! - macOS: `~/Library/Application Support/encore/`
//! - Windows: `%APPDATA%\encore\`
//!
//! | File            | Contents                                              |
//! |-----------------|-------------------------------------------------------|
//! | `encore.db`     | favorites, suggest-less, merged groups, shuffle config |
//! | `library.json`  | default track catalog                                 |
//! | `lyrics/`       | `.lrc` files, relative to this directory              |
//! | `settings.json` | [`RuntimeConfig`]                                     |
//!
//! Command-line flags (and their `ENCORE_*` environment variables) override
//! whatever `settings.json` says.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "encore";
const DB_FILE: &str = "encore.db";
const SETTINGS_FILE: &str = "settings.json";
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Returns the Encore data directory, creating it if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The encore subdirectory cannot be created due to permissions
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let encore_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&encore_dir).with_context(|| {
        format!(
            "Failed to create Encore data directory at {}. Please check file permissions.",
            encore_dir.display()
        )
    })?;

    Ok(encore_dir)
}

/// Returns the platform-appropriate database file path.
///
/// # Errors
///
/// Same as [`get_data_dir`].
///
/// # Examples
///
/// ```no_run
/// use encore::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Database location: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Path of `settings.json`.
///
/// # Errors
///
/// Same as [`get_data_dir`].
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(SETTINGS_FILE))
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// SQLite database holding preferences and shuffle settings
    pub db_path: PathBuf,
    /// JSON track catalog
    pub library_path: PathBuf,
    /// Directory `.lrc` references are resolved against
    pub lyrics_dir: PathBuf,
    /// Status polling interval of `encore watch`
    pub poll_interval_ms: u64,
    /// Passed to `mpc --host` when set
    pub mpd_host: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::in_dir(&get_data_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

impl RuntimeConfig {
    /// Defaults rooted at `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            db_path: dir.join(DB_FILE),
            library_path: dir.join("library.json"),
            lyrics_dir: dir.join("lyrics"),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            mpd_host: None,
        }
    }

    /// Read `settings.json` from the data directory, or defaults if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory is unavailable or the file
    /// exists but is not valid JSON.
    pub fn load() -> Result<Self> {
        let path = get_settings_path()?;
        Self::load_from(&path)
    }

    /// # Errors
    ///
    /// Returns an error if `path` exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid settings file {}", path.display()))
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, text).with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    /// Apply command-line overrides.
    #[must_use]
    pub fn with_overrides(
        mut self,
        db_path: Option<PathBuf>,
        library_path: Option<PathBuf>,
        lyrics_dir: Option<PathBuf>,
    ) -> Self {
        if let Some(db_path) = db_path {
            self.db_path = db_path;
        }
        if let Some(library_path) = library_path {
            self.library_path = library_path;
        }
        if let Some(lyrics_dir) = lyrics_dir {
            self.lyrics_dir = lyrics_dir;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_db_path_structure() {
        if let Ok(path) = get_db_path() {
            assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(DB_FILE));
            assert_eq!(
                path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()),
                Some(APP_DIR)
            );
            assert!(path.is_absolute(), "Database path should be absolute");
        }
    }

    #[test]
    fn test_missing_settings_file_gives_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let config = RuntimeConfig::load_from(&dir.path().join("settings.json"))?;
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        Ok(())
    }

    #[test]
    fn test_settings_round_trip_and_partial_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("settings.json");

        let config = RuntimeConfig {
            mpd_host: Some("media-box".to_string()),
            ..RuntimeConfig::in_dir(dir.path())
        };
        config.save_to(&path)?;
        assert_eq!(RuntimeConfig::load_from(&path)?, config);

        fs::write(&path, r#"{"poll_interval_ms": 250}"#)?;
        let partial = RuntimeConfig::load_from(&path)?;
        assert_eq!(partial.poll_interval_ms, 250);
        assert_eq!(partial.mpd_host, None);
        Ok(())
    }

    #[test]
    fn test_invalid_settings_file_is_an_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json")?;
        assert!(RuntimeConfig::load_from(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::in_dir(Path::new("/data")).with_overrides(
            Some(PathBuf::from("/tmp/other.db")),
            None,
            Some(PathBuf::from("/srv/lyrics")),
        );
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.library_path, PathBuf::from("/data/library.json"));
        assert_eq!(config.lyrics_dir, PathBuf::from("/srv/lyrics"));
    }
}
