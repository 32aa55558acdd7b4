//! sfx-stream - Main entry point
//!
//! Plays synthesized tones through the streaming core on the null device and
//! logs pipeline activity. Sounds come from a TOML sounds file or from the
//! `--tones` list; the program exits on Ctrl+C or once every source stopped.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use sfx_common::config::{resolve_config_path, SfxConfig, CONFIG_ENV_VAR};
use sfx_common::{SampleFormat, SoundDescription};
use sfx_stream::device::NullDevice;
use sfx_stream::stream::{SourceStream, ToneStream};
use sfx_stream::{
    RealTimeSource, SoundEvent, SoundProfile, SoundSystem, SourceId, SourceStatus, TimeSource,
    UpdateThread,
};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for sfx-stream
#[derive(Parser, Debug)]
#[command(name = "sfx-stream")]
#[command(about = "Streams synthesized tones through the sfx playback core")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "SFX_CONFIG")]
    config: Option<PathBuf>,

    /// Sounds file (TOML, `[[sound]]` tables)
    #[arg(short, long)]
    sounds: Option<PathBuf>,

    /// Tone frequencies in Hz, used when no sounds file is given
    #[arg(long, value_delimiter = ',', default_values_t = vec![440.0, 660.0])]
    tones: Vec<f32>,

    /// Tone length in seconds
    #[arg(long, default_value_t = 3.0)]
    duration: f32,

    /// Stream the tones instead of loading them whole
    #[arg(long)]
    streaming: bool,

    /// Loop the tones until interrupted
    #[arg(long)]
    looping: bool,

    /// Packets buffered ahead of playback
    #[arg(long)]
    read_ahead: Option<u32>,

    /// Seconds of audio per streamed packet
    #[arg(long)]
    packet_duration: Option<f32>,

    /// Device voice limit
    #[arg(long)]
    max_voices: Option<usize>,

    /// Reader pool threads (0 = read inline)
    #[arg(long)]
    reader_threads: Option<usize>,

    /// Sample rate of the synthesized tones
    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,

    /// Channel count of the synthesized tones
    #[arg(long, default_value_t = 2)]
    channels: u8,
}

/// One entry of the sounds file
#[derive(Debug, Deserialize)]
struct SoundSpec {
    name: String,
    frequency: f32,
    duration: f32,
    /// Overrides the config `[defaults]` description
    #[serde(default)]
    description: Option<SoundDescription>,
}

#[derive(Debug, Default, Deserialize)]
struct SoundsFile {
    #[serde(default)]
    sound: Vec<SoundSpec>,
}

fn load_sounds(path: &Path) -> Result<Vec<SoundSpec>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sounds file {}", path.display()))?;
    let file: SoundsFile = toml::from_str(&text)
        .with_context(|| format!("Failed to parse sounds file {}", path.display()))?;
    Ok(file.sound)
}

fn tone_profile(spec: &SoundSpec, format: SampleFormat, defaults: &SoundDescription) -> Result<Arc<SoundProfile>> {
    // Fail early on an unusable format rather than at every open
    ToneStream::with_duration(format, spec.frequency, spec.duration)
        .with_context(|| format!("Sound '{}'", spec.name))?;

    let (frequency, duration) = (spec.frequency, spec.duration);
    let provider = move || {
        ToneStream::with_duration(format, frequency, duration)
            .ok()
            .map(|tone| Box::new(tone) as Box<dyn SourceStream>)
    };
    let description = spec.description.clone().unwrap_or_else(|| defaults.clone());
    Ok(SoundProfile::new(spec.name.clone(), Arc::new(provider), description))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let mut config = SfxConfig::load_or_default(config_path.as_deref());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.system.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file, using defaults"),
    }

    // CLI flags override the file
    if let Some(max_voices) = args.max_voices {
        config.system.max_voices = max_voices;
    }
    if let Some(reader_threads) = args.reader_threads {
        config.system.reader_threads = reader_threads;
    }
    let defaults = &mut config.defaults;
    defaults.is_streaming |= args.streaming;
    defaults.is_looping |= args.looping;
    if let Some(read_ahead) = args.read_ahead {
        defaults.stream_read_ahead = read_ahead;
    }
    if let Some(packet_duration) = args.packet_duration {
        defaults.stream_packet_duration = packet_duration;
    }
    let config = config.validated();

    let specs = match &args.sounds {
        Some(path) => load_sounds(path)?,
        None => args
            .tones
            .iter()
            .map(|&frequency| SoundSpec {
                name: format!("tone-{}hz", frequency),
                frequency,
                duration: args.duration,
                description: None,
            })
            .collect(),
    };
    if specs.is_empty() {
        warn!("Nothing to play");
        return Ok(());
    }

    let format = SampleFormat::new(args.channels, 16, args.sample_rate)
        .context("Invalid tone format")?;

    let clock: Arc<dyn TimeSource> = Arc::new(RealTimeSource::new());
    let mut system = SoundSystem::from_config(&config.system, Arc::clone(&clock));
    system.init(Box::new(NullDevice::new(
        Arc::clone(&clock),
        config.system.max_voices,
    )));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    system.set_event_channel(events_tx);

    let mut sources: Vec<SourceId> = Vec::with_capacity(specs.len());
    for spec in &specs {
        let profile = tone_profile(spec, format, &config.defaults)?;
        let id = system
            .create_source(profile)
            .with_context(|| format!("Failed to create source '{}'", spec.name))?;
        system.play(id, None)?;
        info!("Playing '{}' as {}", spec.name, id);
        sources.push(id);
    }

    let system = Arc::new(Mutex::new(system));
    let mut updater = UpdateThread::spawn(
        Arc::clone(&system),
        Duration::from_millis(config.system.update_interval_ms),
    )
    .context("Failed to start update thread")?;

    let events = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match &event {
                SoundEvent::DeviceLost { device } => warn!("Device lost: {}", device),
                other => debug!("{:?}", other),
            }
        }
    });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut report = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = report.tick() => {
                let (stats, all_stopped) = {
                    let system = system
                        .lock()
                        .map_err(|_| anyhow::anyhow!("Sound system mutex poisoned"))?;
                    let all_stopped = sources
                        .iter()
                        .all(|id| matches!(system.status(*id), Ok(SourceStatus::Stopped) | Err(_)));
                    (system.stats(), all_stopped)
                };
                info!(
                    "{} sources ({} virtual), {} voices, {} buffers, {} updating, {} parked",
                    stats.sources,
                    stats.virtual_sources,
                    stats.voices,
                    stats.buffers,
                    stats.update_list,
                    stats.parked_states
                );
                if all_stopped {
                    info!("All sources stopped");
                    break;
                }
            }
        }
    }

    updater.stop().context("Failed to stop update thread")?;
    {
        let mut system = system
            .lock()
            .map_err(|_| anyhow::anyhow!("Sound system mutex poisoned"))?;
        for id in &sources {
            system.delete_source(*id).ok();
        }
        system.shutdown();
    }
    drop(system);
    events.await.context("Event logger failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
