use std::{
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, atomic::Ordering, Arc},
    time::Duration,
};

use chromesthesia_core::{AppConfig, ChromaError, Engine, LogSink, RecordingSink, Script};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Extra time after the last scripted event so fades can finish.
const TAIL_S: f32 = 0.5;

fn main() -> chromesthesia_core::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Live {
            script,
            seconds,
            tuning,
        } => run_live(&script, seconds, &tuning),
        Commands::Render {
            script,
            output,
            fps,
            tuning,
        } => run_render(&script, &output, fps, &tuning),
        Commands::DefaultConfig { output } => AppConfig::default().save(output),
    }
}

fn run_live(script: &Path, seconds: Option<f32>, tuning: &Tuning) -> chromesthesia_core::Result<()> {
    let config = tuning.resolve()?;
    let script = Script::load(script)?;
    tracing::info!(events = script.len(), "starting live mode");

    let limit = seconds.unwrap_or(script.duration() + config.animator.fade_out_s + TAIL_S);
    let limit = Duration::try_from_secs_f32(limit)
        .map_err(|_| ChromaError::InvalidInput("run time must be finite and >= 0"))?;

    let mut engine = Engine::new(&config, LogSink::new())?;
    let stop = Arc::new(AtomicBool::new(false));
    let detectors: Vec<_> = script
        .issuers()
        .into_iter()
        .map(|issuer| {
            tracing::debug!(%issuer, "spawning scripted detector");
            script
                .for_issuer(issuer)
                .spawn(engine.publisher(), Arc::clone(&stop))
        })
        .collect();

    let outcome = engine.run(&stop, Some(limit));
    stop.store(true, Ordering::Relaxed);

    for detector in detectors {
        match detector.join() {
            Ok(Ok(published)) => tracing::debug!(published, "detector finished"),
            Ok(Err(error)) => tracing::warn!(%error, "detector failed"),
            Err(_) => return Err(ChromaError::msg("detector thread panicked")),
        }
    }
    outcome
}

fn run_render(script: &Path, output: &Path, fps: f32, tuning: &Tuning) -> chromesthesia_core::Result<()> {
    let config = tuning.resolve()?;
    let script = Script::load(script)?;
    tracing::info!(events = script.len(), ?output, fps, "rendering offline");

    let mut engine = Engine::new(&config, RecordingSink::new())?;
    let ticks = script.render(&mut engine, fps, config.animator.fade_out_s + TAIL_S)?;
    let out = engine.into_output();
    tracing::info!(ticks, frames = out.sink().frames().len(), "render complete");
    out.sink().save(output)
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Turns played notes into LED colour", long_about = None)]
struct Cli {
    /// Log lifecycle decisions at debug level.
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay an event script through the real-time control loop.
    Live {
        /// JSON event script standing in for the detectors.
        #[arg(short, long)]
        script: PathBuf,
        /// Stop after this many seconds instead of when the script ends.
        #[arg(long)]
        seconds: Option<f32>,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Step an event script offline at a fixed frame rate and save the frames.
    Render {
        #[arg(short, long)]
        script: PathBuf,
        /// Where to write the recorded frames as JSON.
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = 60.0)]
        fps: f32,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Write the default configuration file.
    DefaultConfig {
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Configuration file plus command line overrides.
#[derive(Args, Debug)]
struct Tuning {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Let the microphone originate notes even while MIDI is connected.
    #[arg(long)]
    no_midi_priority: bool,
    #[arg(long)]
    fade_in: Option<f32>,
    #[arg(long)]
    fade_out: Option<f32>,
    #[arg(long)]
    grace_window: Option<f32>,
    #[arg(long)]
    brightness: Option<f32>,
}

impl Tuning {
    fn resolve(&self) -> chromesthesia_core::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        if self.no_midi_priority {
            config.animator.midi_priority = false;
        }
        if let Some(fade_in) = self.fade_in {
            config.animator.fade_in_s = fade_in;
        }
        if let Some(fade_out) = self.fade_out {
            config.animator.fade_out_s = fade_out;
        }
        if let Some(grace_window) = self.grace_window {
            config.animator.grace_window_s = grace_window;
        }
        if let Some(brightness) = self.brightness {
            config.output.brightness = brightness;
        }
        config.validate()?;
        Ok(config)
    }
}
