//! # Command-Line Interface Module
//!
//! Defines Encore's command-line interface with Clap derive macros. Parsing
//! is type-checked here and `main` routes each command to the library.
//!
//! ## Commands
//!
//! - `tracks`: list the catalog, optionally with score statistics
//! - `recommend`: print the top recommendations
//! - `shuffle`: shuffle the library (or a scope) into MPD
//! - `play`: play one track within the library
//! - `watch`: adaptive radio that follows MPD and refills the queue
//! - `favorite` / `suggest-less`: taste signals
//! - `group`: merge variants of the same song
//! - `playlist`: saved playlists, usable as consistent sources
//! - `config`: shuffle settings
//! - `lyrics`: show a track's synced lyrics
//!
//! ## Examples
//!
//! ```bash
//! encore shuffle
//! encore favorite "Bohemian Rhapsody"
//! encore group create bohemian queen/bohemian.flac live/bohemian.flac --priority queen/bohemian.flac
//! encore config set --personality explorer
//! encore playlist save road-trip Heroes Waterloo
//! encore config set --personality consistent --source road-trip
//! encore watch
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
///
/// Path flags override `settings.json` and can also be given through
/// `ENCORE_*` environment variables.
#[derive(Parser)]
#[command(name = "encore")]
#[command(about = "Encore: adaptive shuffle and playback queue for your music library")]
#[command(version)]
pub struct Args {
    /// SQLite database holding favorites, groups and shuffle settings
    #[arg(long, global = true, env = "ENCORE_DB", value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// JSON track catalog
    #[arg(long, global = true, env = "ENCORE_LIBRARY", value_name = "FILE")]
    pub library: Option<PathBuf>,

    /// Directory lyric references are resolved against
    #[arg(long, global = true, env = "ENCORE_LYRICS_DIR", value_name = "DIR")]
    pub lyrics_dir: Option<PathBuf>,

    /// MPD host passed to mpc
    #[arg(long, global = true, value_name = "HOST")]
    pub mpd_host: Option<String>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List every track in the catalog
    ///
    /// Tracks that belong to a merged group are marked with the group id,
    /// favorites with `♥` and suggest-less tracks with `↓`.
    Tracks {
        /// Also print score statistics for every personality
        #[arg(long)]
        stats: bool,
    },

    /// Print the highest-scoring tracks
    ///
    /// Merged groups count once. Scores include a random term, so two runs
    /// rarely agree on the tail of the list.
    Recommend {
        /// Number of recommendations
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Shuffle the library into MPD and start playing
    ///
    /// With track arguments only those tracks are shuffled. Without `--follow`
    /// Encore exits once MPD is playing and the queue is not refilled.
    Shuffle {
        /// Restrict the shuffle to these tracks (ids or search terms)
        tracks: Vec<String>,

        /// Print the order instead of loading it into MPD
        #[arg(long)]
        dry_run: bool,

        /// Keep running and follow playback like `watch`
        #[arg(long)]
        follow: bool,
    },

    /// Play a track, queueing the rest of the library after it
    Play {
        /// Track id or search term
        track: String,

        /// Keep running and follow playback like `watch`
        #[arg(long)]
        follow: bool,
    },

    /// Print what the shuffle engine would pick next
    Next {
        /// Track that just finished (its artist and album feed the streak breaker)
        #[arg(long, value_name = "TRACK")]
        after: Option<String>,
    },

    /// Adaptive radio: shuffle, play and follow MPD
    ///
    /// Polls MPD, keeps the queue cursor in sync, appends a fresh pick
    /// whenever the end of the queue is reached and prints lyric lines as
    /// they come up. Stops when playback ends or nothing is playable.
    Watch {
        /// Restrict the radio to these tracks (ids or search terms)
        tracks: Vec<String>,
    },

    /// Show or change shuffle settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Mark a track as a favorite
    Favorite {
        /// Track id or search term
        track: String,

        /// Clear the mark instead
        #[arg(long)]
        remove: bool,
    },

    /// Ask the shuffle to suggest a track less often
    ///
    /// The track stays eligible; it only gets a scoring penalty.
    SuggestLess {
        /// Track id or search term
        track: String,

        /// Clear the mark instead
        #[arg(long)]
        remove: bool,
    },

    /// Manage merged groups of song variants
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },

    /// Manage saved playlists
    Playlist {
        #[command(subcommand)]
        action: PlaylistAction,
    },

    /// Print a track's synced lyrics
    Lyrics {
        /// Track id or search term
        track: String,

        /// Only print the line active at this many seconds
        #[arg(long, value_name = "SECONDS")]
        at: Option<f64>,
    },

    /// Generate shell completion scripts
    ///
    /// ```bash
    /// encore completion bash > ~/.local/share/bash-completion/completions/encore
    /// encore completion fish > ~/.config/fish/completions/encore.fish
    /// ```
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// Print track ids for dynamic shell completion
    #[command(hide = true)]
    CompleteTracks,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the current shuffle settings
    Show,

    /// Change one or more shuffle settings
    Set {
        /// default, explorer or consistent
        #[arg(long)]
        personality: Option<String>,

        /// Refill the queue from the shuffle engine when it runs out
        #[arg(long)]
        enabled: Option<bool>,

        /// Avoid recently played tracks
        #[arg(long)]
        anti_repeat: Option<bool>,

        /// How many recent tracks anti-repeat remembers
        #[arg(long)]
        history_limit: Option<usize>,

        /// Lower the odds of the same artist or album twice in a row
        #[arg(long)]
        streak_breaker: Option<bool>,

        /// Add a playlist or track the consistent personality favors
        /// (repeatable)
        #[arg(long = "source", value_name = "PLAYLIST|TRACK")]
        sources: Vec<String>,

        /// Forget every consistent source before adding new ones
        #[arg(long)]
        clear_sources: bool,
    },
}

#[derive(Subcommand)]
pub enum PlaylistAction {
    /// Create or replace a playlist
    Save {
        /// Playlist id
        id: String,

        /// Tracks in play order (ids or search terms)
        #[arg(num_args = 1.., required = true)]
        tracks: Vec<String>,
    },

    /// Delete a playlist
    Remove {
        /// Playlist id
        id: String,
    },

    /// List playlists and their tracks
    List,
}

#[derive(Subcommand)]
pub enum GroupAction {
    /// Merge two or more tracks into one logical song
    Create {
        /// Group id
        id: String,

        /// Member tracks (ids or search terms)
        #[arg(num_args = 2.., required = true)]
        members: Vec<String>,

        /// Member played whenever the group is chosen
        #[arg(long, value_name = "TRACK")]
        priority: Option<String>,
    },

    /// Dissolve a group
    Remove {
        /// Group id
        id: String,
    },

    /// List groups and their members
    List,

    /// Change (or with no track, clear) a group's priority member
    Priority {
        /// Group id
        id: String,

        /// Member track (id or search term)
        track: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_group_create() {
        let args = Args::try_parse_from([
            "encore", "group", "create", "bohemian", "a.flac", "b.flac", "--priority", "a.flac",
        ])
        .unwrap();
        match args.command {
            Command::Group { action: GroupAction::Create { id, members, priority } } => {
                assert_eq!(id, "bohemian");
                assert_eq!(members, ["a.flac", "b.flac"]);
                assert_eq!(priority.as_deref(), Some("a.flac"));
            }
            _ => panic!("expected group create"),
        }
    }

    #[test]
    fn test_group_create_needs_two_members() {
        assert!(Args::try_parse_from(["encore", "group", "create", "solo", "a.flac"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["encore", "recommend", "-n", "3", "--db", "/tmp/x.db"]).unwrap();
        assert_eq!(args.db, Some(PathBuf::from("/tmp/x.db")));
        assert!(matches!(args.command, Command::Recommend { count: 3 }));
    }

    #[test]
    fn test_config_set_parses_booleans() {
        let args = Args::try_parse_from(["encore", "config", "set", "--anti-repeat", "false", "--history-limit", "5"])
            .unwrap();
        match args.command {
            Command::Config {
                action: ConfigAction::Set { anti_repeat, history_limit, personality, .. },
            } => {
                assert_eq!(anti_repeat, Some(false));
                assert_eq!(history_limit, Some(5));
                assert_eq!(personality, None);
            }
            _ => panic!("expected config set"),
        }
    }

    #[test]
    fn test_config_set_collects_repeated_sources() {
        let args = Args::try_parse_from([
            "encore", "config", "set", "--source", "road-trip", "--source", "Heroes", "--clear-sources",
        ])
        .unwrap();
        match args.command {
            Command::Config { action: ConfigAction::Set { sources, clear_sources, .. } } => {
                assert_eq!(sources, ["road-trip", "Heroes"]);
                assert!(clear_sources);
            }
            _ => panic!("expected config set"),
        }
    }

    #[test]
    fn test_playlist_save_needs_a_track() {
        assert!(Args::try_parse_from(["encore", "playlist", "save", "empty"]).is_err());
        assert!(Args::try_parse_from(["encore", "playlist", "save", "mix", "a.flac"]).is_ok());
    }
}
