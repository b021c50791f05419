//! # Encore - Adaptive Shuffle for Your Music Library
//!
//! Command-line front end over the `encore` library. Playback goes through
//! MPD (driven with `mpc`); preferences live in SQLite and the catalog is a
//! JSON file.
//!
//! ## Usage
//!
//! ```bash
//! # What would the shuffle pick?
//! encore recommend -n 20
//!
//! # Shuffle everything into MPD and keep the radio going
//! encore watch
//!
//! # Taste signals
//! encore favorite "Bohemian Rhapsody"
//! encore suggest-less "Never Gonna Give You Up"
//! ```

mod cli;
mod completion;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use encore::algorithm::{statistics, Personality};
use encore::config::RuntimeConfig;
use encore::db::Store;
use encore::history::AntiRepeatWindow;
use encore::lyrics::FsLyricLoader;
use encore::mpd::{MpdTransport, StatusTracker};
use encore::playback::{PlaybackState, QueueEvent, QueueSource};
use encore::session::Session;
use encore::shuffle::ShuffleEngine;
use encore::track::{JsonCatalog, LibrarySnapshot, PreferenceSource, Track, TrackId};

/// Everything a command may need, opened lazily per command.
struct App {
    config: RuntimeConfig,
}

impl App {
    fn store(&self) -> Result<Arc<Store>> {
        Ok(Arc::new(Store::open(&self.config.db_path)?))
    }

    fn catalog(&self) -> Arc<JsonCatalog> {
        Arc::new(JsonCatalog::new(&self.config.library_path))
    }

    fn transport(&self) -> Arc<MpdTransport> {
        Arc::new(MpdTransport::new(self.config.mpd_host.clone()))
    }

    fn library(&self, store: &Store) -> Result<LibrarySnapshot> {
        LibrarySnapshot::load(self.catalog().as_ref(), store)
    }

    fn session(&self, transport: Arc<MpdTransport>) -> Result<Session> {
        let store = self.store()?;
        let preferences: Arc<dyn PreferenceSource> = store.clone();
        Session::new(
            self.catalog(),
            preferences,
            store,
            Arc::new(FsLyricLoader::new(&self.config.lyrics_dir)),
            transport,
        )
    }
}

/// Main entry point for Encore.
///
/// # Logging
///
/// Controlled via `RUST_LOG`:
/// - `RUST_LOG=debug encore watch` - Enable debug logging
/// - `RUST_LOG=encore::shuffle=trace encore shuffle --dry-run` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();
    let mut config = RuntimeConfig::load()?.with_overrides(args.db, args.library, args.lyrics_dir);
    if args.mpd_host.is_some() {
        config.mpd_host = args.mpd_host;
    }
    debug!("Runtime config: {config:?}");
    let app = App { config };

    match args.command {
        cli::Command::Tracks { stats } => list_tracks(&app, stats)?,
        cli::Command::Recommend { count } => {
            let session = app.session(app.transport())?;
            for (rank, track) in session.recommend(count).iter().enumerate() {
                println!("{:>3}. {}", rank + 1, describe(track));
            }
        }
        cli::Command::Shuffle { tracks, dry_run, follow } => {
            let transport = app.transport();
            let session = app.session(Arc::clone(&transport))?;
            let scope = resolve_all(&session.library(), &tracks)?;
            let scope = (!scope.is_empty()).then_some(scope);

            if dry_run {
                let library = session.library();
                let candidates = scope.unwrap_or_else(|| library.ids());
                let order = session.shuffle().shuffle_order(&library, &candidates, &mut rand::thread_rng());
                for id in &order {
                    println!("{}", library.track(id).map_or_else(|| id.to_string(), describe));
                }
                return Ok(());
            }

            transport.ping()?;
            match session.shuffle_and_play(scope.as_deref()) {
                Some(first) => println!("▶ {}", describe_id(&session, &first)),
                None => bail!("Nothing to shuffle. Is the catalog at {} empty?", app.config.library_path.display()),
            }
            if follow {
                follow_playback(&session, &transport, app.config.poll_interval_ms)?;
            }
        }
        cli::Command::Play { track, follow } => {
            let transport = app.transport();
            let session = app.session(Arc::clone(&transport))?;
            let library = session.library();
            let id = resolve(&library, &track)?;

            transport.ping()?;
            match session.play_song(id.clone(), library.ids(), QueueSource::library()) {
                Some(playing) => println!("▶ {}", describe_id(&session, &playing)),
                None => bail!("Could not start {id}"),
            }
            if follow {
                follow_playback(&session, &transport, app.config.poll_interval_ms)?;
            }
        }
        cli::Command::Next { after } => {
            let session = app.session(app.transport())?;
            let library = session.library();
            let previous = after.map(|query| resolve(&library, &query)).transpose()?;

            let mut window = AntiRepeatWindow::new(session.shuffle().config().history_limit);
            if let Some(previous) = &previous {
                window.push(previous.clone());
            }
            let pick = session.shuffle().select_next(
                &library,
                &library.ids(),
                &window,
                previous.as_ref(),
                &mut rand::thread_rng(),
            );
            match pick {
                Some(id) => println!("{}", describe_id(&session, &id)),
                None => println!("Nothing to pick: the catalog is empty."),
            }
        }
        cli::Command::Watch { tracks } => {
            let transport = app.transport();
            let session = app.session(Arc::clone(&transport))?;
            let scope = resolve_all(&session.library(), &tracks)?;

            transport.ping()?;
            let first = session.shuffle_and_play((!scope.is_empty()).then_some(scope.as_slice()));
            let Some(first) = first else {
                bail!("Nothing to play. Is the catalog at {} empty?", app.config.library_path.display());
            };
            println!("▶ {}", describe_id(&session, &first));
            follow_playback(&session, &transport, app.config.poll_interval_ms)?;
        }
        cli::Command::Config { action } => configure(&app, action)?,
        cli::Command::Favorite { track, remove } => {
            let store = app.store()?;
            let id = resolve(&app.library(&store)?, &track)?;
            store.set_favorite(&id, !remove)?;
            println!("{} {id}", if remove { "Unfavorited" } else { "♥ Favorited" });
        }
        cli::Command::SuggestLess { track, remove } => {
            let store = app.store()?;
            let id = resolve(&app.library(&store)?, &track)?;
            store.set_suggest_less(&id, !remove)?;
            println!("{} {id}", if remove { "Back to normal:" } else { "↓ Suggesting less:" });
        }
        cli::Command::Group { action } => manage_groups(&app, action)?,
        cli::Command::Playlist { action } => manage_playlists(&app, action)?,
        cli::Command::Lyrics { track, at } => {
            let session = app.session(app.transport())?;
            let id = resolve(&session.library(), &track)?;
            let timeline = session.lyrics_for(&id);
            if timeline.is_empty() {
                println!("No lyrics for {id}");
                return Ok(());
            }

            match at {
                Some(seconds) => {
                    let position = Duration::try_from_secs_f64(seconds)
                        .with_context(|| format!("Invalid position {seconds}"))?;
                    match timeline.index_at(position).and_then(|i| timeline.line(i)) {
                        Some(line) => println!("{}", line.text),
                        None => println!("(before the first line)"),
                    }
                }
                None => {
                    for line in timeline.lines() {
                        println!("[{}] {}", encore::mpd::format_time(line.at), line.text);
                    }
                }
            }
        }
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
        }
        cli::Command::CompleteTracks => {
            completion::print_track_completions(app.catalog().as_ref())?;
        }
    }

    Ok(())
}

fn list_tracks(app: &App, stats: bool) -> Result<()> {
    let store = app.store()?;
    let library = app.library(&store)?;

    for track in library.tracks() {
        let mut marks = String::new();
        if library.preferences.is_favorite(&track.id) {
            marks.push('♥');
        }
        if library.preferences.is_suggest_less(&track.id) {
            marks.push('↓');
        }
        if library.preferences.is_consistent_source(&track.id) {
            marks.push('★');
        }
        let group = library
            .groups
            .group_of(&track.id)
            .map(|g| format!(" [{g}]"))
            .unwrap_or_default();
        println!("{marks:<3} {:>5} plays  {}{group}", track.play_count, describe(track));
    }
    println!("\n{} tracks, {} merged groups", library.len(), library.groups.len());

    if stats {
        println!();
        for personality in Personality::ALL {
            if let Some(s) = statistics::analyze(library.tracks(), &library.preferences, personality) {
                println!(
                    "{:<10} mean {:.3}  sd {:.3}  min {:.3}  max {:.3}",
                    personality.as_str(),
                    s.mean,
                    s.std_deviation,
                    s.min,
                    s.max
                );
            }
        }
    }
    Ok(())
}

fn configure(app: &App, action: cli::ConfigAction) -> Result<()> {
    let store = app.store()?;
    let engine = ShuffleEngine::load(store.clone())?;
    match action {
        cli::ConfigAction::Show => {}
        cli::ConfigAction::Set {
            personality,
            enabled,
            anti_repeat,
            history_limit,
            streak_breaker,
            sources,
            clear_sources,
        } => {
            let mut config = engine.config();
            if let Some(personality) = personality {
                config.personality = Personality::parse_lenient(&personality);
            }
            if let Some(enabled) = enabled {
                config.enabled = enabled;
            }
            if let Some(anti_repeat) = anti_repeat {
                config.anti_repeat_enabled = anti_repeat;
            }
            if let Some(history_limit) = history_limit {
                config.history_limit = history_limit;
            }
            if let Some(streak_breaker) = streak_breaker {
                config.streak_breaker_enabled = streak_breaker;
            }
            if clear_sources {
                config.consistent_sources.clear();
            }
            if !sources.is_empty() {
                let playlists = store.playlists()?;
                let library = app.library(&store)?;
                for source in sources {
                    let source = if playlists.contains_key(&source) {
                        source
                    } else {
                        resolve(&library, &source)?.to_string()
                    };
                    if !config.consistent_sources.contains(&source) {
                        config.consistent_sources.push(source);
                    }
                }
            }
            engine.update_config(config)?;
            info!("Shuffle config saved");
        }
    }

    let config = engine.config();
    println!("enabled:        {}", config.enabled);
    println!("personality:    {}", config.personality);
    println!("anti-repeat:    {}", config.anti_repeat_enabled);
    println!("history limit:  {}", config.history_limit);
    println!("streak breaker: {}", config.streak_breaker_enabled);
    println!("sources:        {}", config.consistent_sources.join(", "));
    Ok(())
}

fn manage_playlists(app: &App, action: cli::PlaylistAction) -> Result<()> {
    let store = app.store()?;
    match action {
        cli::PlaylistAction::Save { id, tracks } => {
            let tracks = resolve_all(&app.library(&store)?, &tracks)?;
            store.save_playlist(&id, &tracks)?;
            println!("Saved playlist {id} with {} tracks", tracks.len());
        }
        cli::PlaylistAction::Remove { id } => {
            if !store.delete_playlist(&id)? {
                bail!("No playlist named {id}");
            }
            println!("Removed playlist {id}");
        }
        cli::PlaylistAction::List => {
            let playlists = store.playlists()?;
            if playlists.is_empty() {
                println!("No playlists.");
            }
            for (id, tracks) in playlists {
                println!("{id}");
                for track in tracks {
                    println!("  {track}");
                }
            }
        }
    }
    Ok(())
}

fn manage_groups(app: &App, action: cli::GroupAction) -> Result<()> {
    let store = app.store()?;
    match action {
        cli::GroupAction::Create { id, members, priority } => {
            let library = app.library(&store)?;
            let members = resolve_all(&library, &members)?;
            let priority = priority.map(|query| resolve(&library, &query)).transpose()?;
            store.create_group(&id, &members, priority.as_ref())?;
            println!("Created group {id} with {} members", members.len());
        }
        cli::GroupAction::Remove { id } => {
            if store.delete_group(&id)? {
                println!("Removed group {id}");
            } else {
                bail!("No group named {id}");
            }
        }
        cli::GroupAction::List => {
            let groups = store.merged_groups()?;
            if groups.is_empty() {
                println!("No merged groups.");
            }
            for group in groups {
                println!("{}", group.id);
                for member in &group.members {
                    let star = if group.priority.as_ref() == Some(member) { "*" } else { " " };
                    println!("  {star} {member}");
                }
            }
        }
        cli::GroupAction::Priority { id, track } => {
            let priority = match track {
                Some(query) => Some(resolve(&app.library(&store)?, &query)?),
                None => None,
            };
            store.set_group_priority(&id, priority.as_ref())?;
            match priority {
                Some(track) => println!("{id} now plays {track}"),
                None => println!("{id} has no priority member"),
            }
        }
    }
    Ok(())
}

/// Poll MPD and feed the session until playback ends.
///
/// Prints each new track and each lyric line as it comes up. Status errors
/// are logged and retried on the next tick, like a dropped MPD connection
/// would be.
fn follow_playback(session: &Session, transport: &MpdTransport, poll_interval_ms: u64) -> Result<()> {
    let interval = Duration::from_millis(poll_interval_ms.max(50));
    let queue_events = session.queue().subscribe();
    let lyric_events = session.observer().subscribe();
    let mut tracker = StatusTracker::new();
    let mut failures = 0_u32;

    info!("Following MPD every {}ms", interval.as_millis());
    loop {
        match transport.status() {
            Ok(status) => {
                failures = 0;
                for event in tracker.poll(status, transport.generation()) {
                    if !session.handle_transport_event(&event) {
                        debug!("Ignored transport event {event:?}");
                    }
                }
            }
            Err(err) => {
                failures += 1;
                error!("Failed to read MPD status: {err:#}");
                if failures >= 10 {
                    bail!("MPD stopped answering");
                }
            }
        }

        for event in queue_events.drain() {
            match event {
                QueueEvent::TrackChanged { track, .. } => println!("▶ {}", describe_id(session, &track)),
                QueueEvent::TrackFailed { track, reason, .. } => warn!("Skipped {track}: {reason}"),
                _ => {}
            }
        }
        if !lyric_events.drain().is_empty() {
            if let Some(line) = session.observer().current_line() {
                println!("  ♪ {line}");
            }
        }

        match session.queue().snapshot().state {
            PlaybackState::Ended => {
                println!("Queue finished.");
                return Ok(());
            }
            PlaybackState::NoPlayableTracks => bail!("None of the queued tracks could be played"),
            _ => thread::sleep(interval),
        }
    }
}

/// One track from a user-typed query.
fn resolve(library: &LibrarySnapshot, query: &str) -> Result<TrackId> {
    let matches = library.search(query);
    match matches.as_slice() {
        [] => bail!("No track matches '{query}'"),
        [track] => Ok(track.id.clone()),
        many => {
            let shown: Vec<String> = many.iter().take(5).map(|t| format!("  {}", t.id)).collect();
            bail!(
                "'{query}' matches {} tracks, be more specific:\n{}",
                many.len(),
                shown.join("\n")
            )
        }
    }
}

fn resolve_all(library: &LibrarySnapshot, queries: &[String]) -> Result<Vec<TrackId>> {
    queries.iter().map(|query| resolve(library, query)).collect()
}

fn describe(track: &Track) -> String {
    if track.title.is_empty() {
        track.id.to_string()
    } else if track.artist.is_empty() {
        track.title.clone()
    } else {
        format!("{} - {}", track.artist, track.title)
    }
}

fn describe_id(session: &Session, id: &TrackId) -> String {
    session.library().track(id).map_or_else(|| id.to_string(), describe)
}
