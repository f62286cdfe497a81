//! # Backbeat
//!
//! Unattended background music for venues: playlists with crossfades and
//! random segments, plus scheduled announcements over ducked music.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use backbeat_audio::{output, AudioEngine, DeviceEngine, VirtualEngine};
use backbeat_playback::Venue;
use chrono::Local;
use clap::Parser;
use config::{EngineKind, Settings};
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "backbeat=info,backbeat_playback=info,backbeat_audio=info";
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "backbeat", version)]
#[command(about = "Background music and scheduled announcements for venues")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(short, long, env = "BACKBEAT_CONFIG")]
    config: Option<PathBuf>,

    /// Playlist to start, overriding `autoplay`
    #[arg(short, long)]
    play: Option<String>,

    /// Run without audio output on the clock-driven engine
    #[arg(long = "virtual")]
    virtual_engine: bool,

    /// Tick interval in milliseconds, overriding `tick_ms`
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Print the available output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                settings
                    .log_filter
                    .as_deref()
                    .unwrap_or(DEFAULT_LOG_FILTER)
                    .into()
            }),
        )
        .init();

    info!("Starting Backbeat v{}", env!("CARGO_PKG_VERSION"));

    if cli.list_devices {
        for name in output::list_output_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    if let Some(tick_ms) = cli.tick_ms {
        settings.tick_ms = tick_ms;
    }
    if cli.virtual_engine {
        settings.engine = EngineKind::Virtual;
    }
    if cli.play.is_some() {
        settings.autoplay = cli.play;
    }
    settings.validate()?;

    let engine: Arc<dyn AudioEngine> = match settings.engine {
        EngineKind::Device => {
            Arc::new(DeviceEngine::new().context("Failed to open audio output")?)
        }
        EngineKind::Virtual => {
            info!("Using the virtual engine, no audio will be heard");
            Arc::new(VirtualEngine::with_file_probe())
        }
    };

    let venue = Venue::init(engine, settings.venue_config());
    load_content(&venue, &settings);

    if let Some(name) = &settings.autoplay {
        if let Err(e) = venue.orchestrator().play(name, None) {
            warn!("Could not start playlist {name}: {e}");
        }
    }

    run(&venue, settings.tick()).await?;

    venue.shutdown();
    info!("Backbeat stopped");
    Ok(())
}

/// Load sound effects, announcements, the schedule and saved playlists.
/// Anything that fails to load is logged and skipped.
fn load_content(venue: &Venue, settings: &Settings) {
    let seq = venue.sequencer();
    if let Err(e) = seq.set_lead_sfx(settings.sfx.lead.as_deref()) {
        warn!("Lead sfx not loaded: {e}");
    }
    if let Err(e) = seq.set_trail_sfx(settings.sfx.trail.as_deref()) {
        warn!("Trail sfx not loaded: {e}");
    }

    for entry in &settings.announcements {
        if let Err(e) = seq.register_announcement(&entry.id, &entry.path) {
            warn!("Announcement {} not loaded: {e}", entry.id);
        }
    }

    for entry in &settings.schedule {
        let added = entry.time().and_then(|(hour, minute)| {
            seq.add_schedule(hour, minute, &entry.announcement)
                .map_err(Into::into)
        });
        if let Err(e) = added {
            warn!("Schedule entry {} ({}) skipped: {e}", entry.at, entry.announcement);
        }
    }

    match settings.playlists_path() {
        Some(path) if path.exists() => {
            if let Err(e) = venue.orchestrator().import_all(&path) {
                warn!("Could not read playlists from {}: {e}", path.display());
            }
        }
        Some(path) => info!("No playlists file at {}", path.display()),
        None => {}
    }
}

async fn run(venue: &Venue, tick: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last = Instant::now();
    info!("Running, tick every {} ms", tick.as_millis());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                venue.tick(now - last, Local::now().naive_local());
                last = now;
            }
            _ = status.tick() => log_status(venue),
            result = signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Ctrl-C received, shutting down");
                return Ok(());
            }
        }
    }
}

fn log_status(venue: &Venue) {
    match venue.orchestrator().progress() {
        Some(p) => info!(
            "{}: {} [{} / {}]",
            p.playlist,
            p.track.display_name,
            p.position.format(),
            p.length.format()
        ),
        None => info!("No playlist playing"),
    }
    let seq = venue.sequencer();
    if let Some(id) = seq.current_announcement() {
        info!("Announcement {id}: {}", seq.state());
    }
}
