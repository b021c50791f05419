//! Track scoring for recommendations.
//!
//! A score is a plain number: a logarithmic play-count term, additive
//! preference bonuses and penalties, and a bounded random jitter. The constants come from a per-[`Personality`] [`WeightTable`], so
//! switching personality is a table lookup rather than a branch in the math.
//!
//! ```text
//! score = ln(play_count + 1.5) * play_count_weight
//!       + favorite_bonus        (if favorite)
//!       + suggest_less_penalty  (if suggest-less)
//!       + source_bonus          (if from a consistent source)
//!       + uniform(-jitter, jitter)
//! ```

use crate::track::{PreferenceSignals, Track};
use log::{trace, warn};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Offset inside the logarithm; keeps zero-play tracks finite and positive.
const PLAY_COUNT_OFFSET: f64 = 1.5;

/// Divisor applied before exponentiating a score into a sampling weight.
const WEIGHT_TEMPERATURE: f64 = 2.0;

/// Named weighting profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Personality {
    #[default]
    Default,
    /// Rarely played tracks dominate.
    Explorer,
    /// Favorites dominate.
    Consistent,
}

/// Constants for one personality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightTable {
    pub play_count_weight: f64,
    pub favorite_bonus: f64,
    pub suggest_less_penalty: f64,
    /// Only the Consistent personality rewards the user's chosen sources.
    pub source_bonus: f64,
    pub jitter: f64,
}

const DEFAULT_WEIGHTS: WeightTable = WeightTable {
    play_count_weight: 1.0,
    favorite_bonus: 2.0,
    suggest_less_penalty: -3.0,
    source_bonus: 0.0,
    jitter: 0.5,
};

const EXPLORER_WEIGHTS: WeightTable = WeightTable {
    play_count_weight: -0.75,
    favorite_bonus: 1.0,
    suggest_less_penalty: -3.0,
    source_bonus: 0.0,
    jitter: 0.75,
};

const CONSISTENT_WEIGHTS: WeightTable = WeightTable {
    play_count_weight: 1.0,
    favorite_bonus: 6.0,
    suggest_less_penalty: -8.0,
    source_bonus: 4.0,
    jitter: 0.5,
};

impl Personality {
    pub const ALL: [Self; 3] = [Self::Default, Self::Explorer, Self::Consistent];

    #[must_use]
    pub const fn weights(self) -> &'static WeightTable {
        match self {
            Self::Default => &DEFAULT_WEIGHTS,
            Self::Explorer => &EXPLORER_WEIGHTS,
            Self::Consistent => &CONSISTENT_WEIGHTS,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Explorer => "explorer",
            Self::Consistent => "consistent",
        }
    }

    /// Lenient parse: anything unrecognised becomes [`Personality::Default`].
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" | "" => Self::Default,
            "explorer" => Self::Explorer,
            "consistent" => Self::Consistent,
            other => {
                warn!("Unknown shuffle personality '{other}', using default weighting");
                Self::Default
            }
        }
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Personality {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_lenient(s))
    }
}

impl From<String> for Personality {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

impl From<Personality> for String {
    fn from(value: Personality) -> Self {
        value.as_str().to_string()
    }
}

/// Score without the random term.
#[must_use]
pub fn base_score(track: &Track, prefs: &PreferenceSignals, personality: Personality) -> f64 {
    let weights = personality.weights();

    // u64 -> f64 loses precision only far beyond any real play count.
    #[allow(clippy::cast_precision_loss)]
    let plays = track.play_count as f64;
    let mut score = (plays + PLAY_COUNT_OFFSET).ln() * weights.play_count_weight;

    if prefs.is_favorite(&track.id) {
        score += weights.favorite_bonus;
    }
    if prefs.is_suggest_less(&track.id) {
        score += weights.suggest_less_penalty;
    }
    if prefs.is_consistent_source(&track.id) {
        score += weights.source_bonus;
    }

    score
}

/// Full score: [`base_score`] plus jitter drawn from `rng`.
pub fn score<R: Rng + ?Sized>(
    track: &Track,
    prefs: &PreferenceSignals,
    personality: Personality,
    rng: &mut R,
) -> f64 {
    let base = base_score(track, prefs, personality);
    let value = base + jitter(personality, rng);
    trace!("Scored {} at {value:.3} (base {base:.3}, {personality})", track.id);
    value
}

fn jitter<R: Rng + ?Sized>(personality: Personality, rng: &mut R) -> f64 {
    let bound = personality.weights().jitter;
    rng.gen_range(-bound..=bound)
}

/// Scores for many tracks at once.
///
/// Base scores are computed on the rayon pool; jitter is drawn in input order
/// from `rng` so a seeded generator gives reproducible results.
pub fn batch_scores<R: Rng + ?Sized>(
    tracks: &[&Track],
    prefs: &PreferenceSignals,
    personality: Personality,
    rng: &mut R,
) -> Vec<f64> {
    let mut scores: Vec<f64> = tracks
        .par_iter()
        .map(|track| base_score(track, prefs, personality))
        .collect();
    for value in &mut scores {
        *value += jitter(personality, rng);
    }
    scores
}

/// Strictly positive sampling weight for a score.
#[must_use]
pub fn weight_from_score(score: f64) -> f64 {
    let weight = (score / WEIGHT_TEMPERATURE).exp();
    if weight.is_finite() && weight > 0.0 {
        weight
    } else if score > 0.0 {
        f64::MAX
    } else {
        f64::MIN_POSITIVE
    }
}

/// Score distribution helpers for the `tracks --stats` command.
pub mod statistics {
    use super::{base_score, Personality};
    use crate::track::{PreferenceSignals, Track};

    #[derive(Debug, Clone, PartialEq)]
    pub struct ScoreStatistics {
        pub mean: f64,
        pub std_deviation: f64,
        pub min: f64,
        pub max: f64,
        pub count: usize,
    }

    /// `None` for an empty library.
    #[must_use]
    pub fn analyze(tracks: &[Track], prefs: &PreferenceSignals, personality: Personality) -> Option<ScoreStatistics> {
        if tracks.is_empty() {
            return None;
        }
        let scores: Vec<f64> = tracks.iter().map(|t| base_score(t, prefs, personality)).collect();

        #[allow(clippy::cast_precision_loss)]
        let count = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / count;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count;

        Some(ScoreStatistics {
            mean,
            std_deviation: variance.sqrt(),
            min: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            count: scores.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn prefs(favorites: &[&str], suggest_less: &[&str]) -> PreferenceSignals {
        PreferenceSignals {
            favorites: favorites.iter().map(|f| TrackId::from(*f)).collect(),
            suggest_less: suggest_less.iter().map(|s| TrackId::from(*s)).collect(),
            ..PreferenceSignals::default()
        }
    }

    #[test]
    fn test_zero_plays_is_positive_and_finite() {
        let track = Track::new("fresh.flac");
        let score = base_score(&track, &PreferenceSignals::default(), Personality::Default);
        assert!(score.is_finite());
        assert!(score > 0.0, "ln(1.5) should give a positive base score");
    }

    #[test]
    fn test_default_is_strictly_increasing_in_play_count() {
        let prefs = PreferenceSignals::default();
        let mut previous = f64::NEG_INFINITY;
        for plays in [0, 1, 2, 5, 10, 100, 10_000, u64::from(u32::MAX)] {
            let score = base_score(&Track::new("t").with_play_count(plays), &prefs, Personality::Default);
            assert!(score.is_finite());
            assert!(score > previous, "score must grow with play count ({plays})");
            previous = score;
        }
    }

    #[test]
    fn test_explorer_favours_rarely_played_tracks() {
        let prefs = PreferenceSignals::default();
        let rare = base_score(&Track::new("rare").with_play_count(0), &prefs, Personality::Explorer);
        let worn = base_score(&Track::new("worn").with_play_count(200), &prefs, Personality::Explorer);
        assert!(rare > worn);
    }

    #[test]
    fn test_bonus_and_penalty_signs_in_every_personality() {
        for personality in Personality::ALL {
            let w = personality.weights();
            assert!(w.favorite_bonus > 0.0, "{personality}: favorite bonus must be positive");
            assert!(w.suggest_less_penalty < 0.0, "{personality}: penalty must be negative");
            assert!(
                w.suggest_less_penalty.abs() > w.favorite_bonus,
                "{personality}: penalty must outweigh the bonus"
            );
            assert!(w.jitter > 0.0);
        }
    }

    #[test]
    fn test_consistent_amplifies_favorite_bonus() {
        assert!(
            Personality::Consistent.weights().favorite_bonus > Personality::Default.weights().favorite_bonus
        );
    }

    #[test]
    fn test_favorite_and_suggest_less_combine_additively() {
        let track = Track::new("both").with_play_count(7);
        let plain = base_score(&track, &prefs(&[], &[]), Personality::Default);
        let both = base_score(&track, &prefs(&["both"], &["both"]), Personality::Default);
        let w = Personality::Default.weights();
        let expected = plain + w.favorite_bonus + w.suggest_less_penalty;
        assert!((both - expected).abs() < 1e-9);
    }

    #[test]
    fn test_consistent_sources_only_count_for_consistent() {
        let track = Track::new("mix").with_play_count(4);
        let sourced = PreferenceSignals {
            consistent: [TrackId::from("mix")].into_iter().collect(),
            ..PreferenceSignals::default()
        };
        let plain = PreferenceSignals::default();

        for personality in [Personality::Default, Personality::Explorer] {
            assert_eq!(base_score(&track, &sourced, personality), base_score(&track, &plain, personality));
        }
        let boost = base_score(&track, &sourced, Personality::Consistent) - base_score(&track, &plain, Personality::Consistent);
        assert!((boost - Personality::Consistent.weights().source_bonus).abs() < 1e-9);
        assert!(boost > Personality::Consistent.weights().jitter * 2.0, "the boost must outweigh jitter");
    }

    #[test]
    fn test_jitter_is_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        let track = Track::new("t").with_play_count(3);
        let prefs = PreferenceSignals::default();
        let base = base_score(&track, &prefs, Personality::Explorer);
        for _ in 0..1_000 {
            let value = score(&track, &prefs, Personality::Explorer, &mut rng);
            assert!((value - base).abs() <= Personality::Explorer.weights().jitter + 1e-12);
        }
    }

    #[test]
    fn test_jitter_varies_between_calls() {
        let mut rng = StdRng::seed_from_u64(99);
        let track = Track::new("t");
        let prefs = PreferenceSignals::default();
        let first = score(&track, &prefs, Personality::Default, &mut rng);
        let differs = (0..20).any(|_| score(&track, &prefs, Personality::Default, &mut rng) != first);
        assert!(differs, "repeated scoring should not be frozen");
    }

    #[test]
    fn test_batch_matches_base_within_jitter() {
        let tracks: Vec<Track> = (0..64).map(|i| Track::new(format!("t{i}")).with_play_count(i)).collect();
        let refs: Vec<&Track> = tracks.iter().collect();
        let prefs = prefs(&["t3"], &["t4"]);
        let mut rng = StdRng::seed_from_u64(1);

        let scores = batch_scores(&refs, &prefs, Personality::Consistent, &mut rng);
        assert_eq!(scores.len(), tracks.len());
        for (track, value) in tracks.iter().zip(&scores) {
            let base = base_score(track, &prefs, Personality::Consistent);
            assert!((value - base).abs() <= Personality::Consistent.weights().jitter + 1e-12);
        }
    }

    #[test]
    fn test_unknown_personality_defaults() {
        assert_eq!(Personality::parse_lenient("chaotic"), Personality::Default);
        assert_eq!(Personality::parse_lenient(" Explorer "), Personality::Explorer);
        assert_eq!("consistent".parse::<Personality>(), Ok(Personality::Consistent));

        let parsed: Personality = serde_json::from_str("\"wild\"").expect("lenient deserialize");
        assert_eq!(parsed, Personality::Default);
        assert_eq!(serde_json::to_string(&Personality::Explorer).ok().as_deref(), Some("\"explorer\""));
    }

    #[test]
    fn test_weight_from_score_is_positive_and_monotonic() {
        let values = [-1_000.0, -8.0, 0.0, 3.0, 1_000.0, 1e308];
        let weights: Vec<f64> = values.iter().map(|&s| weight_from_score(s)).collect();
        for w in &weights {
            assert!(*w > 0.0 && w.is_finite());
        }
        for pair in weights.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_statistics_on_empty_and_small_library() {
        let prefs = PreferenceSignals::default();
        assert!(statistics::analyze(&[], &prefs, Personality::Default).is_none());

        let tracks = vec![Track::new("a"), Track::new("b").with_play_count(50)];
        let stats = statistics::analyze(&tracks, &prefs, Personality::Default).expect("two tracks");
        assert_eq!(stats.count, 2);
        assert!(stats.min < stats.max);
        assert!(stats.mean > stats.min && stats.mean < stats.max);
    }
}
