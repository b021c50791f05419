//! # Encore Performance Benchmarks
//!
//! Benchmarks for the hot paths of the engine.
//!
//! ## Benchmark Categories
//!
//! - **Scoring**: single and batch track scoring
//! - **Shuffle**: group collapsing, full weighted shuffle and next-track picks
//! - **Lyrics**: LRC parsing and per-tick line matching
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench shuffle
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt::Write;
use std::hint::black_box;
use std::time::Duration;

use encore::algorithm::{self, Personality};
use encore::history::AntiRepeatWindow;
use encore::lyrics::LyricTimeline;
use encore::observer::PlaybackSessionObserver;
use encore::shuffle::{self, ShuffleConfig};
use encore::track::{LibrarySnapshot, MergedGroup, PreferenceSignals, Track, TrackId};

/// Library of `size` tracks over 50 artists, every tenth track a favorite
/// and every fifth pair merged into a group.
fn create_library(size: usize) -> LibrarySnapshot {
    let tracks: Vec<Track> = (0..size)
        .map(|i| {
            Track::new(format!("artist{}/album{}/track{i:05}.flac", i % 50, i % 200))
                .with_artist(format!("Artist {}", i % 50), format!("Album {}", i % 200))
                .with_play_count((i * 7 % 300) as u64)
        })
        .collect();

    let preferences = PreferenceSignals {
        favorites: tracks.iter().step_by(10).map(|t| t.id.clone()).collect(),
        suggest_less: tracks.iter().skip(3).step_by(25).map(|t| t.id.clone()).collect(),
        consistent: tracks.iter().skip(5).step_by(40).map(|t| t.id.clone()).collect(),
    };
    let groups: Vec<MergedGroup> = tracks
        .chunks(2)
        .step_by(5)
        .filter(|pair| pair.len() == 2)
        .enumerate()
        .map(|(n, pair)| MergedGroup {
            id: format!("group{n}"),
            members: vec![pair[0].id.clone(), pair[1].id.clone()],
            priority: Some(pair[1].id.clone()),
        })
        .collect();

    LibrarySnapshot::new(tracks, preferences, &groups)
}

fn create_lrc(lines: usize) -> String {
    let mut text = String::from("[ar:Bench]\n[ti:Ticks]\n");
    for i in 0..lines {
        let _ = writeln!(text, "[{:02}:{:02}.{:02}]line {i}", i * 3 / 60, i * 3 % 60, i % 100);
    }
    text
}

fn benchmark_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoring");
    let library = create_library(1000);
    let track = &library.tracks()[10];
    let mut rng = StdRng::seed_from_u64(1);

    group.bench_function("single_track_score", |b| {
        b.iter(|| {
            algorithm::score(black_box(track), black_box(&library.preferences), Personality::Default, &mut rng)
        })
    });

    for size in [100, 1000, 10_000] {
        let library = create_library(size);
        let tracks: Vec<&Track> = library.tracks().iter().collect();
        group.bench_with_input(BenchmarkId::new("batch_scores", size), &tracks, |b, tracks| {
            b.iter(|| algorithm::batch_scores(black_box(tracks), &library.preferences, Personality::Explorer, &mut rng))
        });
    }

    group.finish();
}

fn benchmark_shuffle(c: &mut Criterion) {
    let mut group = c.benchmark_group("shuffle");
    let mut rng = StdRng::seed_from_u64(2);

    for size in [100, 1000, 10_000] {
        let library = create_library(size);
        let ids = library.ids();

        group.bench_with_input(BenchmarkId::new("collapse", size), &ids, |b, ids| {
            b.iter(|| shuffle::collapse(black_box(&library), black_box(ids)).len())
        });
        group.bench_with_input(BenchmarkId::new("weighted_order", size), &ids, |b, ids| {
            b.iter(|| shuffle::weighted_order(&library, black_box(ids), Personality::Default, &mut rng))
        });
    }

    let library = create_library(1000);
    let ids = library.ids();
    let config = ShuffleConfig::default();
    let mut window = AntiRepeatWindow::new(config.history_limit);
    for id in ids.iter().take(config.history_limit) {
        window.push(id.clone());
    }
    let previous: Option<&TrackId> = window.most_recent();

    group.bench_function("pick_next_1000", |b| {
        b.iter(|| shuffle::pick_next(&library, black_box(&ids), &window, previous, &config, &mut rng))
    });

    group.finish();
}

fn benchmark_lyrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("lyrics");
    let text = create_lrc(400);

    group.bench_function("parse_lrc_400_lines", |b| b.iter(|| LyricTimeline::parse_lrc(black_box(&text))));

    let timeline = LyricTimeline::parse_lrc(&text);
    group.bench_function("index_at", |b| {
        b.iter(|| timeline.index_at(black_box(Duration::from_millis(612_345))))
    });

    // Twenty minutes of 250 ms position ticks.
    let observer = PlaybackSessionObserver::new();
    group.bench_function("observer_ticks_4800", |b| {
        b.iter(|| {
            observer.on_track_changed(Some(TrackId::from("bench")), timeline.clone());
            for tick in 0..4800_u64 {
                observer.on_position(Duration::from_millis(tick * 250));
            }
            observer.display().line
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_scoring, benchmark_shuffle, benchmark_lyrics);

criterion_main!(benches);
