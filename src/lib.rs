//! Live Features Library
//!
//! Microphone capture and per-hop feature extraction (spectrum, pitch,
//! loudness, spectral shape) for driving reactive visuals.

pub mod audio;
pub mod config;
pub mod session;

pub use audio::{
    list_sources, CaptureError, FeatureFrame, InputSource, Peak, SpectralSnapshot,
};
pub use config::{AnalysisConfig, ConfigError, FallbackConfig};
pub use session::{
    AudioCaptureSession, EndReason, MicrophoneSession, ProcessingPath, SessionEvent, SessionState,
};

use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Consumer tick of the demo loop (~60 Hz)
const TICK: Duration = Duration::from_millis(16);

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "live-features", about = "Print live microphone features as JSON lines")]
pub struct RunOptions {
    /// Analysis config (TOML)
    pub config: Option<PathBuf>,

    /// How long to capture, in seconds
    #[arg(short, long, default_value = "10", value_parser = parse_seconds)]
    pub seconds: Duration,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("`{}` is not a number", value))?;
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(format!("must be positive, got {}", value));
    }
    Ok(Duration::from_secs_f64(seconds))
}

/// Capture from the microphone and print features as JSON lines until the
/// duration elapses or the input goes away.
pub fn run() -> Result<(), CaptureError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = RunOptions::parse();
    let config = match &options.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };

    match list_sources() {
        Ok(sources) => {
            for source in sources {
                log::info!(
                    "Input source: {}{}",
                    source.id,
                    if source.is_default { " (default)" } else { "" }
                );
            }
        }
        Err(e) => log::warn!("Failed to enumerate input sources: {}", e),
    }

    let mut session = MicrophoneSession::microphone(config)?;
    let events = session.events();
    let path = session.start()?;

    let deadline = Instant::now() + options.seconds;
    let mut last_sequence = None;

    while Instant::now() < deadline {
        for event in events.try_iter() {
            log::info!("Session event: {:?}", event);
        }

        if !matches!(session.poll(), SessionState::Active(_)) {
            log::warn!("Session ended early: {:?}", session.state());
            break;
        }

        let line = match path {
            ProcessingPath::Realtime => session.latest_frame().map(|frame| {
                (
                    frame.sequence,
                    json!({
                        "path": path,
                        "sequence": frame.sequence,
                        "produced_at": frame.produced_at,
                        "pitch": frame.pitch,
                        "volume": frame.volume,
                        "bins": frame.fft.len(),
                    }),
                )
            }),
            ProcessingPath::Fallback => session.snapshot().map(|snapshot| {
                (
                    snapshot.sequence,
                    json!({
                        "path": path,
                        "sequence": snapshot.sequence,
                        "bass": snapshot.bass,
                        "mid": snapshot.mid,
                        "treble": snapshot.treble,
                        "energy": snapshot.energy,
                        "spectral_centroid": snapshot.spectral_centroid,
                        "spectral_rolloff": snapshot.spectral_rolloff,
                        "zero_crossing_rate": snapshot.zero_crossing_rate,
                        "peaks": snapshot.peaks,
                    }),
                )
            }),
        };

        if let Some((sequence, value)) = line {
            // The fallback snapshot is held between ticks; print each once
            if last_sequence != Some(sequence) {
                println!("{}", value);
                last_sequence = Some(sequence);
            }
        }

        std::thread::sleep(TICK);
    }

    session.stop();
    for event in events.try_iter() {
        log::info!("Session event: {:?}", event);
    }
    Ok(())
}
