//! Audio front end: decoding, window normalization and feature extraction.

pub mod loader;
pub mod mel;
pub mod waveform;

use std::fs;
use std::path::{Path, PathBuf};

pub use loader::{AudioInput, AudioLoader};
pub use mel::{FeatureExtractor, MelSpectrogram};
pub use waveform::{NormalizedWaveform, Waveform, pad_or_trim};

/// File extensions the loader is expected to decode.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac", "aac", "mp4"];

/// Whether a file name carries one of [`SUPPORTED_EXTENSIONS`].
pub fn is_supported_extension(name: &str) -> bool {
    loader::extension_of(name).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// First file in `dir`, by name, whose extension is one of `extensions`.
///
/// Returns `Ok(None)` when the directory holds no matching file.
pub fn find_first_audio(dir: &Path, extensions: &[&str]) -> std::io::Result<Option<PathBuf>> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.to_str()
                .and_then(loader::extension_of)
                .is_some_and(|ext| extensions.contains(&ext.as_str()))
        })
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}
