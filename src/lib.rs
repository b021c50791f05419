//! Adaptive shuffle and playback queue engine for a personal music library.
//!
//! Encore decides what plays next. It scores tracks from play counts and the
//! user's taste signals, treats merged variants of a song as one unit, keeps
//! a versioned "now playing" queue in step with an external media transport
//! and follows playback position to highlight synced lyrics.
//!
//! Core modules:
//! - [`algorithm`] - Personality-weighted track scoring
//! - [`shuffle`] - Group collapsing, weighted shuffle and next-track selection
//! - [`playback`] - The playback queue manager and its state machine
//! - [`observer`] - Position, buffering and lyric-line tracking
//! - [`session`] - Wires the above to the external collaborators
//!
//! ### Supporting Modules
//!
//! - [`track`] - Track model, merged groups and collaborator traits
//! - [`history`] - Anti-repeat window
//! - [`events`] - Subscribe/unsubscribe event bus
//! - [`transport`] - Media transport interface
//! - [`lyrics`] - LRC parsing and lyric loading
//! - [`mpd`] - MPD transport via `mpc`
//! - [`db`] - SQLite preference store
//! - [`config`] - Data directory and runtime settings
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use encore::db::Store;
//! use encore::lyrics::FsLyricLoader;
//! use encore::mpd::MpdTransport;
//! use encore::session::Session;
//! use encore::track::JsonCatalog;
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::open(&encore::config::get_db_path()?)?);
//! let session = Session::new(
//!     Arc::new(JsonCatalog::new("library.json")),
//!     store.clone(),
//!     store,
//!     Arc::new(FsLyricLoader::new("lyrics")),
//!     Arc::new(MpdTransport::default()),
//! )?;
//!
//! for track in session.recommend(5) {
//!     println!("{}", track.id);
//! }
//! if let Some(first) = session.shuffle_and_play(None) {
//!     println!("Now playing {first}");
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Scoring
//!
//! `score = play_count_weight * ln(play_count + 1.5) + favorite_bonus +
//! suggest_less_penalty + uniform(-jitter, jitter)`, with the constants taken
//! from the active [`algorithm::Personality`]. Sampling weights are
//! `exp(score / 2)`, so higher scores are favored without ever making a
//! track impossible to draw.
//!
//! ## Concurrency
//!
//! Every aggregate has a single lock owner and hands out `Arc` snapshots to
//! readers. Replacing the queue bumps a generation counter; transport events
//! tagged with an older generation are dropped.

pub mod algorithm;
pub mod config;
pub mod db;
pub mod events;
pub mod history;
pub mod lyrics;
pub mod mpd;
pub mod observer;
pub mod playback;
pub mod session;
pub mod shuffle;
pub mod track;
pub mod transport;
