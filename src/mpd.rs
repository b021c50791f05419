//! # MPD Transport
//!
//! [`Transport`] implementation that drives a Music Player Daemon through the
//! `mpc` command-line client, plus the status polling that turns MPD's view
//! of the world back into [`TransportEvent`]s.
//!
//! Track ids are MPD-relative file paths (`artist/album/01 song.flac`), so
//! they can be handed to `mpc add` unchanged.
//!
//! Connection settings follow `mpc` itself (`MPD_HOST`, `MPD_PORT`), with an
//! optional explicit `--host`.
//!
//! ## Positions
//!
//! MPD has no "loaded but not playing at index N" state. Jumps requested
//! while stopped are remembered and applied by the next `play`, which then
//! becomes `mpc play N`.

use anyhow::{bail, Context, Result};
use log::{debug, info, trace};
use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::track::TrackId;
use crate::transport::{LoadRequest, Transport, TransportEvent};

/// How close to the end a stopped track must have been to count as
/// completed rather than stopped by the user.
const COMPLETION_SLACK: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

/// Parsed `mpc status -f %file%` output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MpdStatus {
    /// Current song file (MPD relative), `None` when stopped.
    pub current: Option<String>,
    /// Zero-based playlist position of the current song.
    pub position: Option<usize>,
    pub queue_len: Option<usize>,
    pub elapsed: Duration,
    /// `None` for streams.
    pub duration: Option<Duration>,
    pub state: PlayerState,
}

impl MpdStatus {
    /// Parse the output of `mpc status -f %file%`.
    ///
    /// ```text
    /// artist/album/song.mp3
    /// [playing] #5/20   1:23/3:45 (37%)
    /// volume: 80%   repeat: on    random: off   single: off   consume: off
    /// ```
    pub fn parse(text: &str) -> Self {
        let mut status = Self::default();

        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("volume:") || line.starts_with("ERROR") {
                continue;
            }
            if line.starts_with('[') {
                status.parse_status_line(line);
            } else if i == 0 {
                status.current = Some(line.to_string());
            }
        }

        if status.state == PlayerState::Stopped {
            status.current = None;
        }
        status
    }

    fn parse_status_line(&mut self, line: &str) {
        if line.starts_with("[playing]") {
            self.state = PlayerState::Playing;
        } else if line.starts_with("[paused]") {
            self.state = PlayerState::Paused;
        }

        for field in line.split_whitespace().skip(1) {
            if let Some(position) = field.strip_prefix('#') {
                if let Some((n, len)) = position.split_once('/') {
                    self.position = n.parse::<usize>().ok().and_then(|n| n.checked_sub(1));
                    self.queue_len = len.parse().ok();
                }
            } else if let Some((elapsed, total)) = field.split_once('/') {
                if let Ok(elapsed) = parse_time(elapsed) {
                    self.elapsed = elapsed;
                }
                self.duration = parse_time(total).ok();
            }
        }
    }
}

/// Parse `m:ss` or `h:mm:ss` into a duration.
///
/// # Errors
///
/// Returns an error for anything else.
pub fn parse_time(text: &str) -> Result<Duration> {
    let parts: Vec<&str> = text.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => ("0", *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => bail!("Invalid time format: {text}"),
    };
    let hours: u64 = hours.parse().with_context(|| format!("Invalid hours in {text}"))?;
    let minutes: u64 = minutes.parse().with_context(|| format!("Invalid minutes in {text}"))?;
    let seconds: u64 = seconds.parse().with_context(|| format!("Invalid seconds in {text}"))?;
    Ok(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

/// `H:MM:SS`, the form `mpc seek` accepts.
pub fn format_time(position: Duration) -> String {
    let secs = position.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[derive(Debug, Default)]
struct Cursor {
    /// Jump to apply on the next `play`.
    pending: Option<usize>,
    /// Last position known to be current, from `mpc play` or a status poll.
    last: usize,
    len: usize,
    /// Generation of the last [`LoadRequest`].
    generation: u64,
}

/// Drives MPD through `mpc`.
#[derive(Debug)]
pub struct MpdTransport {
    program: String,
    host: Option<String>,
    cursor: Mutex<Cursor>,
}

impl Default for MpdTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MpdTransport {
    /// `host` is passed as `--host`; `None` leaves it to `MPD_HOST`.
    pub fn new(host: Option<String>) -> Self {
        Self::with_program("mpc", host)
    }

    /// Like [`Self::new`], running `program` instead of `mpc`.
    ///
    /// # Arguments
    ///
    /// * `program` - Name or path of an `mpc`-compatible executable
    /// * `host` - Passed as `--host` when set
    pub fn with_program(program: impl Into<String>, host: Option<String>) -> Self {
        Self {
            program: program.into(),
            host,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    /// Check that `mpc` can reach the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if `mpc` is missing or MPD is unreachable.
    pub fn ping(&self) -> Result<()> {
        self.mpc(&["version"])
            .context("Cannot reach MPD. Is mpd running and mpc installed?")?;
        Ok(())
    }

    /// Read the daemon's status.
    ///
    /// MPD advances through its playlist on its own, so a reported position
    /// also becomes the base for later relative skips.
    ///
    /// # Errors
    ///
    /// Returns an error if `mpc status` fails.
    pub fn status(&self) -> Result<MpdStatus> {
        let text = self.mpc(&["status", "-f", "%file%"])?;
        let status = MpdStatus::parse(&text);
        if let Some(position) = status.position {
            self.lock().last = position;
        }
        Ok(status)
    }

    /// Generation of the queue last loaded into MPD, for tagging the events
    /// a [`StatusTracker`] derives from this transport's status.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn mpc(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new(&self.program);
        if let Some(host) = &self.host {
            command.arg("--host").arg(host);
        }
        trace!("Running {} {}", self.program, args.join(" "));

        let output = command
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute {} {}", self.program, args.join(" ")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} {} failed: {}", self.program, args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn lock(&self) -> MutexGuard<'_, Cursor> {
        match self.cursor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Position the next relative skip starts from.
    fn base_position(&self) -> usize {
        if let Some(pending) = self.lock().pending {
            return pending;
        }
        let live = self.status().ok().and_then(|status| status.position);
        live.unwrap_or_else(|| self.lock().last)
    }
}

impl Transport for MpdTransport {
    fn load(&self, request: &LoadRequest) -> Result<()> {
        self.mpc(&["clear"]).context("Failed to clear the MPD queue")?;
        for track in &request.tracks {
            self.mpc(&["add", track.as_str()])
                .with_context(|| format!("Failed to add {track} to the MPD queue"))?;
        }

        let mut cursor = self.lock();
        cursor.pending = Some(request.start_index);
        cursor.len = request.tracks.len();
        cursor.generation = request.generation;
        info!(
            "Loaded {} tracks into MPD (generation {})",
            request.tracks.len(),
            request.generation
        );
        Ok(())
    }

    fn play(&self) -> Result<()> {
        let pending = self.lock().pending.take();
        match pending {
            Some(index) => {
                let position = (index + 1).to_string();
                self.mpc(&["play", &position])?;
                self.lock().last = index;
                debug!("MPD playing position {position}");
            }
            None => {
                self.mpc(&["play"])?;
            }
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.mpc(&["pause"])?;
        Ok(())
    }

    fn seek(&self, position: Duration) -> Result<()> {
        self.mpc(&["seek", &format_time(position)])?;
        Ok(())
    }

    fn skip_next(&self) -> Result<()> {
        let base = self.base_position();
        self.lock().pending = Some(base + 1);
        Ok(())
    }

    fn skip_previous(&self) -> Result<()> {
        let base = self.base_position();
        self.lock().pending = Some(base.saturating_sub(1));
        Ok(())
    }

    fn skip_to(&self, index: usize) -> Result<()> {
        self.lock().pending = Some(index);
        Ok(())
    }

    fn insert(&self, index: usize, track: &TrackId) -> Result<()> {
        self.mpc(&["add", track.as_str()])
            .with_context(|| format!("Failed to add {track} to the MPD queue"))?;
        let appended_at = {
            let mut cursor = self.lock();
            cursor.len += 1;
            cursor.len
        };
        if index + 1 < appended_at {
            let from = appended_at.to_string();
            let to = (index + 1).to_string();
            self.mpc(&["move", &from, &to])
                .with_context(|| format!("Failed to move {track} to position {to}"))?;
        }
        Ok(())
    }

    fn remove(&self, index: usize) -> Result<()> {
        let position = (index + 1).to_string();
        self.mpc(&["del", &position])
            .with_context(|| format!("Failed to delete MPD queue position {position}"))?;
        let mut cursor = self.lock();
        cursor.len = cursor.len.saturating_sub(1);
        Ok(())
    }
}

/// Diffs consecutive [`MpdStatus`] samples into transport events.
#[derive(Debug, Default)]
pub struct StatusTracker {
    last: Option<MpdStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events implied by `status` relative to the previous poll, tagged
    /// with the queue `generation` they belong to.
    pub fn poll(&mut self, status: MpdStatus, generation: u64) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        let previous = self.last.take().unwrap_or_default();

        if status.state != PlayerState::Stopped {
            if let Some(index) = status.position {
                if previous.position != Some(index) || previous.state == PlayerState::Stopped {
                    events.push(TransportEvent::TrackChanged { generation, index });
                }
            }
            if let Some(duration) = status.duration {
                if previous.duration != Some(duration) || previous.position != status.position {
                    events.push(TransportEvent::Duration(duration));
                }
            }
            events.push(TransportEvent::Position(status.elapsed));
        } else if previous.state == PlayerState::Playing && ran_to_end(&previous) {
            events.push(TransportEvent::TrackCompleted { generation });
        }

        self.last = Some(status);
        events
    }
}

fn ran_to_end(status: &MpdStatus) -> bool {
    status
        .duration
        .is_some_and(|duration| status.elapsed + COMPLETION_SLACK >= duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYING: &str = "artist/album/song.mp3\n[playing] #5/20   1:23/3:45 (37%)\nvolume: 80%   repeat: on    random: off   single: off   consume: off\n";
    const STOPPED: &str = "volume: 80%   repeat: off   random: off   single: off   consume: off\n";

    fn status(position: usize, elapsed: u64, state: PlayerState) -> MpdStatus {
        MpdStatus {
            current: Some(format!("song{position}.flac")),
            position: Some(position),
            queue_len: Some(10),
            elapsed: Duration::from_secs(elapsed),
            duration: Some(Duration::from_secs(180)),
            state,
        }
    }

    #[test]
    fn test_parse_time_valid_formats() -> Result<()> {
        assert_eq!(parse_time("0:30")?, Duration::from_secs(30));
        assert_eq!(parse_time("1:23")?, Duration::from_secs(83));
        assert_eq!(parse_time("12:34")?, Duration::from_secs(754));
        assert_eq!(parse_time("1:02:03")?, Duration::from_secs(3723));
        Ok(())
    }

    #[test]
    fn test_parse_time_invalid_formats() {
        assert!(parse_time("").is_err());
        assert!(parse_time("abc").is_err());
        assert!(parse_time("1:xx").is_err());
        assert!(parse_time("1:2:3:4").is_err());
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Duration::from_secs(83)), "0:01:23");
        assert_eq!(format_time(Duration::from_secs(3723)), "1:02:03");
    }

    #[test]
    fn test_mpd_status_parsing() {
        let status = MpdStatus::parse(PLAYING);
        assert_eq!(status.current.as_deref(), Some("artist/album/song.mp3"));
        assert_eq!(status.position, Some(4));
        assert_eq!(status.queue_len, Some(20));
        assert_eq!(status.elapsed, Duration::from_secs(83));
        assert_eq!(status.duration, Some(Duration::from_secs(225)));
        assert_eq!(status.state, PlayerState::Playing);
    }

    #[test]
    fn test_mpd_status_edge_cases() {
        let stopped = MpdStatus::parse(STOPPED);
        assert_eq!(stopped, MpdStatus::default());

        let paused = MpdStatus::parse("a.flac\n[paused]  #1/1   0:00/0:00 (0%)\n");
        assert_eq!(paused.state, PlayerState::Paused);
        assert_eq!(paused.position, Some(0));

        assert_eq!(MpdStatus::parse(""), MpdStatus::default());
    }

    #[test]
    fn test_tracker_reports_track_changes_once() {
        let mut tracker = StatusTracker::new();

        let first = tracker.poll(status(0, 1, PlayerState::Playing), 3);
        assert!(first.contains(&TransportEvent::TrackChanged { generation: 3, index: 0 }));
        assert!(first.contains(&TransportEvent::Duration(Duration::from_secs(180))));

        let steady = tracker.poll(status(0, 2, PlayerState::Playing), 3);
        assert_eq!(steady, [TransportEvent::Position(Duration::from_secs(2))]);

        let moved = tracker.poll(status(1, 0, PlayerState::Playing), 3);
        assert_eq!(moved[0], TransportEvent::TrackChanged { generation: 3, index: 1 });
    }

    #[test]
    fn test_tracker_completion_vs_user_stop() {
        let mut tracker = StatusTracker::new();
        tracker.poll(status(9, 179, PlayerState::Playing), 1);
        let ended = tracker.poll(MpdStatus::default(), 1);
        assert_eq!(ended, [TransportEvent::TrackCompleted { generation: 1 }]);

        let mut tracker = StatusTracker::new();
        tracker.poll(status(2, 40, PlayerState::Playing), 1);
        assert!(tracker.poll(MpdStatus::default(), 1).is_empty(), "a manual stop is not a completion");
    }

    #[test]
    fn test_tracker_resume_after_pause_is_not_a_change() {
        let mut tracker = StatusTracker::new();
        tracker.poll(status(0, 10, PlayerState::Playing), 1);
        tracker.poll(status(0, 10, PlayerState::Paused), 1);
        let resumed = tracker.poll(status(0, 11, PlayerState::Playing), 1);
        assert_eq!(resumed, [TransportEvent::Position(Duration::from_secs(11))]);
    }

    /// Stand-in `mpc` that appends its arguments to a log and answers
    /// `status` from a file the test controls.
    #[cfg(unix)]
    struct FakeMpc {
        dir: tempfile::TempDir,
    }

    #[cfg(unix)]
    impl FakeMpc {
        fn new() -> Result<Self> {
            use std::os::unix::fs::PermissionsExt;

            let dir = tempfile::TempDir::new()?;
            let script = dir.path().join("mpc");
            let body = format!(
                "#!/bin/sh\necho \"$*\" >> '{log}'\nif [ \"$1\" = status ]; then cat '{status}'; fi\n",
                log = dir.path().join("calls.log").display(),
                status = dir.path().join("status.txt").display(),
            );
            std::fs::write(&script, body)?;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
            std::fs::write(dir.path().join("status.txt"), STOPPED)?;
            Ok(Self { dir })
        }

        fn transport(&self) -> MpdTransport {
            MpdTransport::with_program(self.dir.path().join("mpc").to_string_lossy(), None)
        }

        fn set_status(&self, text: &str) -> Result<()> {
            std::fs::write(self.dir.path().join("status.txt"), text)?;
            Ok(())
        }

        /// Every command except status reads, in order.
        fn commands(&self) -> Result<Vec<String>> {
            let log = std::fs::read_to_string(self.dir.path().join("calls.log")).unwrap_or_default();
            Ok(log
                .lines()
                .filter(|line| !line.starts_with("status"))
                .map(str::to_string)
                .collect())
        }
    }

    #[cfg(unix)]
    fn load(transport: &MpdTransport, generation: u64, names: &[&str], start_index: usize) -> Result<()> {
        transport.load(&LoadRequest {
            generation,
            tracks: names.iter().map(|n| TrackId::from(*n)).collect(),
            start_index,
        })
    }

    #[cfg(unix)]
    #[test]
    fn test_load_defers_position_to_play() -> Result<()> {
        let mpc = FakeMpc::new()?;
        let transport = mpc.transport();

        load(&transport, 3, &["a.flac", "b.flac", "c.flac"], 1)?;
        assert_eq!(mpc.commands()?, ["clear", "add a.flac", "add b.flac", "add c.flac"]);
        assert_eq!(transport.generation(), 3);

        transport.play()?;
        transport.pause()?;
        transport.play()?;
        assert_eq!(mpc.commands()?[4..], ["play 2", "pause", "play"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_insert_moves_into_place_unless_appending() -> Result<()> {
        let mpc = FakeMpc::new()?;
        let transport = mpc.transport();
        load(&transport, 1, &["a.flac", "b.flac", "c.flac"], 0)?;

        transport.insert(1, &TrackId::from("n.flac"))?;
        transport.insert(4, &TrackId::from("z.flac"))?;
        transport.remove(2)?;
        transport.seek(Duration::from_secs(75))?;

        assert_eq!(
            mpc.commands()?[4..],
            ["add n.flac", "move 4 2", "add z.flac", "del 3", "seek 0:01:15"]
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_skips_resolve_against_polled_position() -> Result<()> {
        let mpc = FakeMpc::new()?;
        let transport = mpc.transport();
        load(&transport, 1, &["a.flac", "b.flac", "c.flac"], 0)?;
        transport.play()?;

        // MPD moved on gaplessly to the last entry, then stopped.
        mpc.set_status("c.flac\n[playing] #3/3   2:59/3:00 (99%)\n")?;
        assert_eq!(transport.status()?.position, Some(2));
        mpc.set_status(STOPPED)?;

        transport.insert(3, &TrackId::from("d.flac"))?;
        transport.skip_next()?;
        transport.play()?;
        transport.skip_to(0)?;
        transport.play()?;

        assert_eq!(mpc.commands()?[4..], ["play 1", "add d.flac", "play 4", "play 1"]);
        Ok(())
    }
}
