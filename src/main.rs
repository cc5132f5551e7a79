use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use chirp::audio::wav::read_wav;
use chirp::audio::{MicrophoneSource, list_devices};
use chirp::conf::{Settings, config_path};
use chirp::location::LocationProvider;
use chirp::{
    FrameSource, HttpClassifier, JsonlStore, Reporting, SegmentReporter, Session, ThresholdMode,
    analyze_clip, listen,
};

#[derive(Parser)]
#[command(name = "chirp")]
#[command(about = "Listen for bird calls and classify them")]
#[command(version)]
struct Cli {
    /// Debug logging for chirp (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Settings overridable from the command line
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Threshold strategy: calibrated, adaptive or hybrid
    #[arg(long)]
    mode: Option<ThresholdMode>,

    /// Latitude attached to detections
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude attached to detections
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Classifier endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Sighting log path
    #[arg(long)]
    store: Option<PathBuf>,

    /// Only detect segments, never call the classifier
    #[arg(long)]
    no_classify: bool,
}

impl Overrides {
    fn apply(&self, settings: &mut Settings) {
        if let Some(mode) = self.mode {
            settings.threshold_mode = mode;
        }
        if self.lat.is_some() {
            settings.latitude = self.lat;
        }
        if self.lon.is_some() {
            settings.longitude = self.lon;
        }
        if let Some(endpoint) = &self.endpoint {
            settings.classifier_endpoint = Some(endpoint.clone());
        }
        if let Some(store) = &self.store {
            settings.store_path = Some(store.clone());
        }
        if self.no_classify {
            settings.classifier_endpoint = None;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Listen on an input device and report bird calls until Ctrl-C
    Listen {
        /// Input device name (see `chirp devices`)
        #[arg(long)]
        device: Option<String>,

        /// Noise-floor warm-up in seconds
        #[arg(long)]
        warmup: Option<f64>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Detect and classify bird calls in a WAV recording
    Analyze {
        /// Recording to analyze
        path: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// List available audio recording devices
    Devices,

    /// Show the effective configuration
    Config {
        /// Write the current settings to the config file
        #[arg(long)]
        init: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "info,chirp=debug"
    } else {
        "info,chirp=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Classifier and store wired from settings, if a classifier is configured
fn reporting(settings: &Settings) -> Result<Option<Reporting>> {
    let Some(endpoint) = &settings.classifier_endpoint else {
        warn!("No classifier endpoint configured; segments will only be logged");
        return Ok(None);
    };

    let location = settings
        .location()
        .locate()
        .context("A location is required to classify detections")?;
    let store_path = settings
        .resolved_store_path()
        .ok_or_else(|| anyhow!("Could not determine data directory for the sighting log"))?;
    info!(endpoint = %endpoint, store = %store_path.display(), "Reporting detections");

    let classifier = Arc::new(HttpClassifier::new(
        endpoint.clone(),
        settings.classifier_timeout(),
    ));
    let store = Arc::new(JsonlStore::new(store_path));
    let reporter = SegmentReporter::new(classifier, store, settings.min_confidence)
        .with_timezone(settings.timezone.clone());

    Ok(Some(Reporting {
        reporter: Arc::new(reporter),
        location,
    }))
}

async fn run_listen(
    mut settings: Settings,
    device: Option<String>,
    warmup: Option<f64>,
    overrides: Overrides,
) -> Result<()> {
    overrides.apply(&mut settings);
    if let Some(device) = device {
        settings.audio_device = Some(device);
    }
    if let Some(warmup) = warmup {
        settings.warmup_secs = warmup;
    }
    settings.validate()?;

    let reporting = reporting(&settings)?;
    let source = MicrophoneSource::open(settings.audio_device.as_deref(), settings.format())
        .context("Failed to open audio input")?;

    if settings.threshold_mode.needs_warmup() {
        println!(
            "Calibrating for {:.0}s, keep the area quiet...",
            settings.warmup_secs
        );
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping");
            stop_signal.store(true, Ordering::Release);
        }
    });

    let session = Session::from_settings(&settings, source.format().sample_rate);
    let summary = listen(Box::new(source), session, reporting, stop).await?;

    println!(
        "{} segments from {} frames ({} reported, {} failed)",
        summary.run.segments, summary.run.frames, summary.reported, summary.failed
    );
    Ok(())
}

async fn run_analyze(mut settings: Settings, path: PathBuf, overrides: Overrides) -> Result<()> {
    overrides.apply(&mut settings);
    if overrides.mode.is_none() {
        settings.threshold_mode = ThresholdMode::Adaptive;
    }
    settings.validate()?;

    let clip = read_wav(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let reporting = reporting(&settings)?;
    let session = Session::from_settings(&settings, clip.sample_rate);

    let analysis = analyze_clip(clip, session, reporting.as_ref()).await?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

fn print_devices() {
    match list_devices() {
        Ok(devices) => {
            println!("Available Audio Devices:");
            println!(
                "{:<30} {:<10} {:<20} Formats",
                "Name", "Default", "Sample Rates"
            );
            println!("{}", "-".repeat(80));

            for device in devices {
                let default_str = if device.is_default { "YES" } else { "NO" };
                let sample_rates = device
                    .supported_sample_rates
                    .iter()
                    .take(3)
                    .map(|sr| sr.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");

                let formats = device
                    .supported_formats
                    .iter()
                    .take(2)
                    .map(|f| format!("{:?}", f))
                    .collect::<Vec<_>>()
                    .join(", ");

                let name: String = device.name.chars().take(30).collect();
                println!(
                    "{:<30} {:<10} {:<20} {}",
                    name, default_str, sample_rates, formats
                );
            }
        }
        Err(e) => {
            eprintln!("Failed to list audio devices: {}", e);
        }
    }
}

fn show_config(settings: &Settings, init: bool) -> Result<()> {
    if init {
        let path = settings.save()?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    match config_path() {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config directory available"),
    }
    print!("{}", settings.to_toml()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load();

    match cli.command {
        Commands::Listen {
            device,
            warmup,
            overrides,
        } => run_listen(settings, device, warmup, overrides).await?,
        Commands::Analyze { path, overrides } => run_analyze(settings, path, overrides).await?,
        Commands::Devices => print_devices(),
        Commands::Config { init } => show_config(&settings, init)?,
    }

    Ok(())
}
