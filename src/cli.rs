//! Command-line interface for voxscribe
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Offline speech-to-text for audio files
#[derive(Parser, Debug)]
#[command(
    name = "voxscribe",
    version,
    about = "Offline speech-to-text for audio files",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Audio file to transcribe (default: first mp3/wav in the upload directory)
    #[arg(value_name = "AUDIO")]
    pub audio: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: per-window progress, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Whisper model tier (default: base). Examples: tiny, base.en, small, large-v3-turbo
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Language code or name (default: auto-detect). Examples: auto, en, zh, german
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,

    /// Inference precision: fp32 or fp16
    #[arg(long, value_name = "PRECISION")]
    pub precision: Option<String>,

    /// First temperature of the fallback ladder (0.0 to 1.0)
    #[arg(long, value_name = "T")]
    pub temperature: Option<f32>,

    /// Decode without segment timestamps
    #[arg(long)]
    pub no_timestamps: bool,

    /// Keep text from windows judged to be silence
    #[arg(long)]
    pub keep_silence: bool,

    /// Seconds re-decoded between windows
    #[arg(long, value_name = "SECONDS")]
    pub overlap: Option<f32>,

    /// Request timeout. Examples: 90s, 5m, 1h30m
    #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Fail instead of printing a partial transcript when the timeout expires
    #[arg(long)]
    pub fail_on_timeout: bool,

    /// Print the service JSON response instead of plain text
    #[arg(long)]
    pub json: bool,

    /// Print at most N timestamped segments after the transcript
    #[arg(long, value_name = "N")]
    pub segments: Option<usize>,
}

/// Parse a timeout string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the model tiers in the catalog
    Models,

    /// List supported languages
    Languages,

    /// Print the effective configuration as TOML
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}
