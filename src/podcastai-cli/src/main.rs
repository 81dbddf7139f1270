//! PodcastAI CLI - Podcast Audio Assembly
//!
//! Turns a speaker-tagged dialogue script into a single podcast file.

use clap::{Parser, ValueEnum};
use colored::Colorize;
use podcastai_core::config::ProviderKind;
use podcastai_core::{
    CancellationToken, Config, PipelineCallback, PipelineCoordinator, PipelineEvent,
    PipelineResult, RunLayout, default_config, logging, script,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "podcastai",
    version,
    about = "Podcast Audio Assembly - Turn a dialogue script into one podcast file",
    long_about = "Synthesizes every line of a two-host dialogue script, normalizes and paces the segments, and mixes them into a single WAV file with a manifest."
)]
struct Cli {
    /// Dialogue script (JSON or `Speaker: text` lines)
    #[arg(value_name = "SCRIPT")]
    script: PathBuf,

    /// TOML configuration file (defaults to the built-in two-host show)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run directory (default: outputs/<timestamp>)
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Segment cache shared across runs
    #[arg(long, default_value = "outputs/cache", value_name = "DIR")]
    cache_dir: PathBuf,

    /// Maximum concurrent synthesis requests
    #[arg(short = 'j', long, value_name = "N")]
    concurrency: Option<usize>,

    /// Maximum synthesis attempts per line
    #[arg(long, value_name = "N")]
    max_attempts: Option<u32>,

    /// Override the configured speech provider
    #[arg(long, value_enum, value_name = "PROVIDER")]
    provider: Option<Provider>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Provider {
    Elevenlabs,
    Tone,
}

impl From<Provider> for ProviderKind {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::Elevenlabs => ProviderKind::ElevenLabs,
            Provider::Tone => ProviderKind::Tone,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if let Some(concurrency) = cli.concurrency {
        config.pipeline.concurrency = concurrency;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.retry.max_attempts = max_attempts;
    }
    if let Some(provider) = cli.provider {
        config.synthesizer.provider = provider.into();
    }
    config.validate()?;

    let lines = script::load_script(&cli.script)?;

    // The tone provider ignores voice ids, so missing ones are not an error.
    let offline = config.synthesizer.provider == ProviderKind::Tone;
    let registry = config.build_registry_with(|var| {
        env::var(var)
            .ok()
            .or_else(|| offline.then(|| var.to_lowercase()))
    })?;
    let synthesizer = config
        .synthesizer
        .build(&config.retry, |var| env::var(var).ok())?;

    let run_dir = cli.output_dir.clone().unwrap_or_else(|| {
        PathBuf::from("outputs").join(chrono::Local::now().format("%Y%m%d_%H%M%S").to_string())
    });
    let layout = RunLayout::new(&run_dir);

    // Print header
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  PodcastAI - Audio Assembly".bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Script:".bold(), cli.script.display().to_string().bright_white());
    println!("{} {}", "Lines:".bold(), lines.len());
    println!("{} {}", "Provider:".bold(), synthesizer.name().yellow());
    println!("{} {}", "Voices:".bold(), registry.speakers().join(", ").bright_cyan());
    println!("{} {}", "Run directory:".bold(), run_dir.display().to_string().dimmed());
    println!();
    println!("{}", "─".repeat(70).dimmed());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; finishing in-flight requests");
                cancel.cancel();
            }
        });
    }

    let coordinator = PipelineCoordinator::new(&config, registry, synthesizer, &cli.cache_dir)?
        .with_callback(create_console_callback(lines.len()));

    let result = coordinator.run(&lines, &layout, &cancel).await?;
    print_summary(&result, &layout);

    if !result.is_complete() {
        std::process::exit(1);
    }
    info!(path = %layout.final_audio_path().display(), "done");
    Ok(())
}

/// Create a callback that prints pipeline events to the console.
fn create_console_callback(total: usize) -> PipelineCallback {
    Arc::new(move |event: PipelineEvent| match event {
        PipelineEvent::SegmentStarted { index, speaker } => {
            println!(
                "{} [{:>3}/{}] {}",
                "▶".bright_cyan(),
                index + 1,
                total,
                speaker.bright_cyan()
            );
        }
        PipelineEvent::SegmentReady {
            index,
            speaker,
            duration_ms,
            cached,
        } => {
            let source = if cached { "cached".dimmed() } else { "synthesized".green() };
            println!(
                "{} [{:>3}/{}] {} {:.1}s ({})",
                "✓".green(),
                index + 1,
                total,
                speaker.bright_cyan().bold(),
                duration_ms as f64 / 1000.0,
                source
            );
        }
        PipelineEvent::SegmentFailed { index, error } => {
            println!(
                "{} [{:>3}/{}] {}",
                "✗".red(),
                index + 1,
                total,
                error.to_string().red()
            );
        }
        PipelineEvent::MixStarted { segments } => {
            println!();
            println!("{}", format!("  Mixing {} segments...", segments).bright_magenta());
        }
        PipelineEvent::MixFinished { path, duration_ms } => {
            println!(
                "{}",
                format!(
                    "  Wrote {} ({:.1}s)",
                    path.display(),
                    duration_ms as f64 / 1000.0
                )
                .bright_magenta()
            );
        }
    })
}

fn print_summary(result: &PipelineResult, layout: &RunLayout) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());

    if let Some(path) = &result.final_audio_path {
        println!("{}", "  Podcast assembled.".bright_green().bold());
        println!("  {} {}", "Audio:".bold(), path.display());
        if let Some(manifest) = &result.manifest_path {
            println!("  {} {}", "Manifest:".bold(), manifest.display());
        }
        println!(
            "  {} {:.1}s, {} segments ({} from cache)",
            "Length:".bold(),
            result.total_duration_ms as f64 / 1000.0,
            result.manifest.len(),
            result.cache_hits
        );
    } else if !result.failures.is_empty() {
        println!(
            "{}",
            format!("  {} line(s) failed; podcast not mixed.", result.failures.len())
                .red()
                .bold()
        );
        for failure in &result.failures {
            println!(
                "  {} line {} ({}) after {} attempt(s): {}",
                "✗".red(),
                failure.index,
                failure.speaker.bright_cyan(),
                failure.attempts,
                failure.error
            );
        }
        println!("  {} {}", "Report:".bold(), layout.failures_path().display());
        println!("  {}", "Re-run to retry; finished lines are cached.".dimmed());
    } else {
        println!(
            "{}",
            format!("  Cancelled with {} line(s) pending.", result.pending.len())
                .yellow()
                .bold()
        );
        println!("  {}", "Re-run to resume; finished lines are cached.".dimmed());
    }

    println!("{}", "═".repeat(70).bright_blue());
    println!();
}
