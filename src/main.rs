use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use voxscribe::audio::{AudioInput, find_first_audio};
use voxscribe::cli::{Cli, Commands};
use voxscribe::config::Config;
use voxscribe::defaults::UPLOAD_EXTENSIONS;
use voxscribe::model::catalog::list_models;
use voxscribe::orchestrator::{RequestControl, TranscriptionOrchestrator};
use voxscribe::output::{print_languages, print_models, print_transcription};
use voxscribe::segment::CancelToken;
use voxscribe::service::{AudioUpload, OrchestratorService, SpeechService};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match cli.command {
        None => run_transcribe(&cli).await?,
        Some(Commands::Models) => {
            let config = load_config(cli.config.as_deref())?;
            print_models(list_models(), &config.model.name);
        }
        Some(Commands::Languages) => print_languages(),
        Some(Commands::Config) => {
            let config = load_config(cli.config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "voxscribe",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Log to stderr. `RUST_LOG` wins over `-q` / `-v`.
fn init_tracing(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "voxscribe=info,warn",
        (false, _) => "voxscribe=debug,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .init();
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        // Try default path, fall back to defaults
        Config::load_or_default(&Config::default_path())?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

/// Whole milliseconds, rounded up so a nonzero timeout never disables itself.
fn timeout_millis(timeout: std::time::Duration) -> u64 {
    u64::try_from(timeout.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

/// Command-line flags take precedence over the config file and environment.
fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    if let Some(language) = &cli.language {
        config.decoding.language = language.clone();
    }
    if let Some(precision) = &cli.precision {
        config.model.precision = precision.clone();
    }
    if let Some(temperature) = cli.temperature {
        config.decoding.temperature = temperature;
    }
    if let Some(overlap) = cli.overlap {
        config.decoding.window_overlap_secs = overlap;
    }
    if cli.no_timestamps {
        config.decoding.timestamps = false;
    }
    if cli.keep_silence {
        config.decoding.suppress_silence = false;
    }
    if let Some(timeout) = cli.timeout {
        config.runtime.timeout_ms = timeout_millis(timeout);
    }
    if cli.fail_on_timeout {
        config.runtime.fail_on_timeout = true;
    }
}

fn resolve_audio_path(cli: &Cli, config: &Config) -> Result<PathBuf> {
    if let Some(path) = &cli.audio {
        return Ok(path.clone());
    }
    let dir = &config.runtime.upload_dir;
    match find_first_audio(dir, UPLOAD_EXTENSIONS)
        .with_context(|| format!("Cannot read upload directory {}", dir.display()))?
    {
        Some(path) => Ok(path),
        None => bail!(
            "No {} files in {}; pass an audio file explicitly",
            UPLOAD_EXTENSIONS.join("/"),
            dir.display()
        ),
    }
}

async fn run_transcribe(cli: &Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, cli);
    config.validate()?;
    let options = config.decoding_options()?;

    let path = resolve_audio_path(cli, &config)?;
    if !cli.quiet {
        eprintln!(
            "{} {} {}",
            "Transcribing".green(),
            path.display(),
            format!("(model {})", config.model.name).dimmed()
        );
    }

    let orchestrator = Arc::new(TranscriptionOrchestrator::from_config(&config)?);

    if cli.json {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let service = OrchestratorService::new(orchestrator, options);
        let response = service.recognize(AudioUpload::new(file_name, bytes)).await;
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    // Ctrl-C stops at the next window boundary and prints what was decoded.
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let control = RequestControl::default().with_cancel(cancel);
    let transcription = orchestrator
        .transcribe_async(AudioInput::path(path), options, control)
        .await?;
    print_transcription(&transcription, cli.segments, cli.quiet);
    Ok(())
}
