//! # Shell Completion Module
//!
//! Static completion scripts come from `clap_complete`. Track arguments are
//! completed dynamically through the hidden `complete-tracks` command, which
//! prints every track id in the catalog.
//!
//! ## Usage
//!
//! ```bash
//! encore completion bash > ~/.local/share/bash-completion/completions/encore
//! encore completion zsh > ~/.config/zsh/completions/_encore
//! ```

use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io;

use encore::track::{LibrarySnapshot, TrackCatalog};

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Sorted track ids plus `artist - title` labels where both are known.
pub fn track_completions(library: &LibrarySnapshot) -> Vec<String> {
    let mut completions: Vec<String> = library
        .tracks()
        .iter()
        .flat_map(|track| {
            let label = (!track.artist.is_empty() && !track.title.is_empty())
                .then(|| format!("{} - {}", track.artist, track.title));
            std::iter::once(track.id.to_string()).chain(label)
        })
        .collect();
    completions.sort();
    completions.dedup();
    completions
}

/// Print completions for track arguments, one per line.
///
/// A missing or unreadable catalog prints nothing: shells call this on
/// every tab press and must not see errors.
pub fn print_track_completions(catalog: &dyn TrackCatalog) -> Result<()> {
    let Ok(tracks) = catalog.tracks() else {
        return Ok(());
    };
    let library = LibrarySnapshot::new(tracks, Default::default(), &[]);
    for completion in track_completions(&library) {
        if completion.contains(' ') || completion.contains('\t') {
            println!("\"{}\"", completion.replace('"', "\\\""));
        } else {
            println!("{completion}");
        }
    }
    Ok(())
}
