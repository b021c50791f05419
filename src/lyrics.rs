//! # Lyrics
//!
//! Parsing of `.lrc` files into a [`LyricTimeline`] and the loader trait the
//! session uses to fetch them.
//!
//! ## Supported LRC
//!
//! - time tags `[mm:ss]`, `[mm:ss.x]`, `[mm:ss.xx]` and `[mm:ss.xxx]`;
//! - several time tags in front of one line (`[00:12.00][01:30.50]Chorus`);
//! - `[offset:+/-ms]`, where a positive offset makes lines appear sooner;
//! - other ID tags (`[ar:...]`, `[ti:...]`, ...) and untimed lines are
//!   skipped.

use anyhow::{bail, Context, Result};
use log::{debug, trace};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// One timed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub at: Duration,
    pub text: String,
}

/// Lines ordered by non-decreasing timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricTimeline {
    lines: Vec<LyricLine>,
}

impl LyricTimeline {
    /// Build a timeline from arbitrary lines; they are sorted stably.
    pub fn from_lines(mut lines: Vec<LyricLine>) -> Self {
        lines.sort_by_key(|line| line.at);
        Self { lines }
    }

    /// Parse LRC text. Malformed tags are skipped rather than rejected, so an
    /// unusable file yields an empty timeline.
    pub fn parse_lrc(text: &str) -> Self {
        let mut offset_ms: i64 = 0;
        let mut timed: Vec<(i64, String)> = Vec::new();

        for raw in text.lines() {
            let mut rest = raw.trim();
            let mut stamps = Vec::new();

            while let Some(tag_body) = rest.strip_prefix('[') {
                let Some(end) = tag_body.find(']') else {
                    break;
                };
                let tag = &tag_body[..end];
                rest = &tag_body[end + 1..];

                if let Some(ms) = parse_timestamp(tag) {
                    stamps.push(ms);
                } else if let Some(value) = tag.strip_prefix("offset:") {
                    match value.trim().parse::<i64>() {
                        Ok(parsed) => offset_ms = parsed,
                        Err(_) => debug!("Ignoring malformed LRC offset {value:?}"),
                    }
                } else {
                    trace!("Skipping LRC tag [{tag}]");
                }
            }

            let text = rest.trim();
            for ms in stamps {
                timed.push((ms, text.to_string()));
            }
        }

        let lines = timed
            .into_iter()
            .map(|(ms, text)| LyricLine {
                at: Duration::from_millis(ms.saturating_sub(offset_ms).max(0).unsigned_abs()),
                text,
            })
            .collect();
        Self::from_lines(lines)
    }

    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&LyricLine> {
        self.lines.get(index)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Index of the last line whose timestamp is at or before `position`.
    pub fn index_at(&self, position: Duration) -> Option<usize> {
        self.lines.partition_point(|line| line.at <= position).checked_sub(1)
    }
}

/// Parses `mm:ss`, `mm:ss.x`, `mm:ss.xx` or `mm:ss.xxx` into milliseconds.
fn parse_timestamp(tag: &str) -> Option<i64> {
    let (minutes, seconds) = tag.split_once(':')?;
    let minutes: i64 = minutes.trim().parse().ok()?;
    let (whole, fraction) = match seconds.split_once(|c: char| c == '.' || c == ':') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (seconds, None),
    };
    let whole: i64 = whole.parse().ok()?;
    if !(0..60).contains(&whole) || minutes < 0 {
        return None;
    }

    let fraction_ms = match fraction {
        None => 0,
        Some(digits) if (1..=3).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()) => {
            let value: i64 = digits.parse().ok()?;
            value * 10_i64.pow(3 - digits.len() as u32)
        }
        Some(_) => return None,
    };

    Some(minutes * 60_000 + whole * 1000 + fraction_ms)
}

/// Source of lyric timelines.
pub trait LyricLoader: Send + Sync {
    /// Load the timeline for `reference`.
    ///
    /// `Ok(None)` means the track simply has no lyrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the lyrics exist but cannot be read.
    fn load(&self, reference: &str) -> Result<Option<LyricTimeline>>;
}

/// Reads `.lrc` files relative to a directory.
#[derive(Debug, Clone)]
pub struct FsLyricLoader {
    dir: PathBuf,
}

impl FsLyricLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl LyricLoader for FsLyricLoader {
    fn load(&self, reference: &str) -> Result<Option<LyricTimeline>> {
        let relative = Path::new(reference);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("Lyric reference {reference:?} must be a plain relative path");
        }

        let path = self.dir.join(relative);
        if !path.is_file() {
            trace!("No lyrics at {}", path.display());
            return Ok(None);
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read lyrics from {}", path.display()))?;
        let timeline = LyricTimeline::parse_lrc(&text);
        debug!("Loaded {} lyric lines from {}", timeline.len(), path.display());
        Ok((!timeline.is_empty()).then_some(timeline))
    }
}

/// Default lyric reference for a track id: the id with an `.lrc` extension.
pub fn default_reference(track_id: &str) -> String {
    Path::new(track_id).with_extension("lrc").to_string_lossy().into_owned()
}
