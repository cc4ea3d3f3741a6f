// Classwatch Command Line Interface
// Frame analysis, live detection and session control against the classroom API

use anyhow::Context;
use clap::{Parser, Subcommand};
use classwatch_core::{ConsoleConfig, TokenStore};
use classwatch_eye::{
    BehaviorSummary, CameraSource, DetectionClient, DetectionResult, Detector, FrameAnalysis, LiveDetection,
    LiveSnapshot, PipelineConfig, PipelineError, Progress, SamplingRate, SessionClient, VideoFileSource,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "classwatch")]
#[command(about = "Classwatch - classroom behavior detection console", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// API base URL
    #[arg(long, global = true)]
    api: Option<String>,

    /// Bearer token from the login endpoint
    #[arg(long, global = true)]
    token: Option<String>,

    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a recorded video frame by frame
    Analyze {
        /// Video file
        video: PathBuf,

        /// Session the detections are filed under
        #[arg(long, short)]
        session: String,

        /// Frames per second (0.2, 0.5, 1, 2 or 5)
        #[arg(long, short)]
        rate: Option<f64>,

        /// Longest accepted video in seconds
        #[arg(long)]
        max_duration: Option<f64>,

        /// Accept videos of any length
        #[arg(long, conflicts_with = "max_duration")]
        no_limit: bool,

        /// Print the behavior summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run continuous detection on the camera
    Watch {
        #[arg(long, short)]
        session: String,

        /// Frames per second (0.2, 0.5, 1, 2 or 5)
        #[arg(long, short)]
        rate: Option<f64>,

        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(long)]
        seconds: Option<u64>,

        /// Camera device
        #[arg(long)]
        device: Option<String>,
    },

    /// Capture one camera frame and detect on it
    Snapshot {
        #[arg(long, short)]
        session: String,

        /// Camera device
        #[arg(long)]
        device: Option<String>,
    },

    /// Monitoring session control
    #[command(subcommand)]
    Session(SessionCommands),
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Show whether a session is active for a class
    Status { class_id: String },
    /// Start a session, or end the running one
    Toggle { class_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "warn".to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let tokens = TokenStore::new();
    if let Some(token) = config.api.token.as_deref() {
        tokens.login(token).context("Invalid bearer token")?;
    } else {
        warn!("No bearer token configured; requests will be sent unauthenticated");
    }

    match cli.command {
        Commands::Analyze {
            video,
            session,
            rate,
            max_duration,
            no_limit,
            json,
        } => {
            let limit = if no_limit {
                None
            } else {
                Some(max_duration.unwrap_or(config.analysis.max_duration_secs))
            };
            analyze(&config, tokens, video, &session, rate, limit, json).await?;
        }
        Commands::Watch {
            session,
            rate,
            seconds,
            device,
        } => {
            watch(&config, tokens, &session, rate, seconds, device).await?;
        }
        Commands::Snapshot { session, device } => {
            snapshot(&config, tokens, &session, device).await?;
        }
        Commands::Session(cmd) => {
            handle_session_command(&config, tokens, cmd).await?;
        }
    }

    Ok(())
}

/// Config file, then environment, then command line flags
fn load_config(cli: &Cli) -> anyhow::Result<ConsoleConfig> {
    let mut config = match &cli.config {
        Some(path) => ConsoleConfig::from_file(path.clone())?,
        None => ConsoleConfig::default(),
    };
    config.merge_env();

    if let Some(api) = &cli.api {
        config.api.base_url = api.clone();
    }
    if let Some(token) = &cli.token {
        config.api.token = Some(token.clone());
    }

    config.validate()?;
    Ok(config)
}

fn pipeline_config(config: &ConsoleConfig, session: &str, rate: Option<f64>) -> anyhow::Result<PipelineConfig> {
    let mut pipeline = PipelineConfig::from_console(config, session)?;
    if let Some(rate) = rate {
        pipeline.sampling_rate = SamplingRate::new(rate)?;
    }
    Ok(pipeline)
}

fn detector(config: &ConsoleConfig, tokens: TokenStore, session: &str) -> anyhow::Result<Arc<dyn Detector>> {
    Ok(Arc::new(DetectionClient::new(&config.api, session, tokens)?))
}

/// File mode: sample the whole video, one request at a time
async fn analyze(
    config: &ConsoleConfig,
    tokens: TokenStore,
    video: PathBuf,
    session: &str,
    rate: Option<f64>,
    max_duration: Option<f64>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = pipeline_config(config, session, rate)?.with_max_duration(max_duration);
    pipeline.validate()?;
    let capture = Arc::new(config.capture.clone());
    let source = VideoFileSource::new(&video, capture);
    let mut analysis = FrameAnalysis::new(pipeline, source, detector(config, tokens, session)?)?;

    println!("🎬 Loading {}...", video.display());
    let metadata = analysis.prepare().await?;
    println!(
        "   Duration:   {:.1}s ({}x{})",
        metadata.duration_secs.unwrap_or_default(),
        metadata.width,
        metadata.height
    );
    println!("   Rate:       {}", analysis.config().sampling_rate.label());
    println!("   Frames:     ~{}", analysis.estimated_frames().unwrap_or(0));
    println!();

    let handle = analysis.handle();
    let stopper = handle.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n🛑 Stopping after the current frame...");
            stopper.cancel();
        }
    });

    let mut progress = handle.watch_progress();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = *progress.borrow();
            print_progress(current);
        }
    });

    let outcome = analysis.run().await;
    ctrl_c.abort();
    printer.abort();
    println!();

    let report = match outcome {
        Ok(report) => report,
        Err(e @ PipelineError::DurationExceeded { .. }) => {
            println!("❌ {}", e);
            return Err(e.into());
        }
        Err(e) => return Err(e).context("Frame analysis failed"),
    };

    if report.is_cancelled() {
        println!(
            "⚠️  Analysis cancelled: {} of {} frames processed",
            report.results.len(),
            report.total_frames
        );
    } else {
        println!("✅ Analysis complete: {} frames processed", report.results.len());
    }
    if report.failed_frames() > 0 {
        println!("   {} frame(s) could not be analyzed", report.failed_frames());
    }
    println!();

    if json {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
        return Ok(());
    }

    for result in &report.results {
        print_result(result);
    }
    println!();
    print_summary(&report.summary);
    Ok(())
}

/// Live mode: detect on every tick until time runs out or Ctrl-C
async fn watch(
    config: &ConsoleConfig,
    tokens: TokenStore,
    session: &str,
    rate: Option<f64>,
    seconds: Option<u64>,
    device: Option<String>,
) -> anyhow::Result<()> {
    let pipeline = pipeline_config(config, session, rate)?;
    let mut live = open_camera(config, tokens, session, pipeline, device).await?;

    println!("🔴 Continuous detection at {} (Ctrl-C to stop)", live.rate().label());
    live.start_continuous()?;

    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut refresh = tokio::time::interval(Duration::from_millis(250));
    let mut last_shown = None;
    let mut last_error = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => break,
            _ = refresh.tick() => {
                if let Some(snapshot) = live.latest() {
                    if last_shown != Some(snapshot.captured_at) {
                        last_shown = Some(snapshot.captured_at);
                        print_snapshot(&snapshot);
                    }
                }
                let error = live.last_error();
                if error.is_some() && error != last_error {
                    println!("❌ {}", error.as_deref().unwrap_or_default());
                }
                last_error = error;
            }
        }
    }

    live.stop_continuous()?;
    let stats = live.stats();
    live.shutdown().await;

    println!(
        "🛑 Stopped: {} ticks, {} detections, {} skipped while a request was in flight",
        stats.ticks, stats.completed, stats.skipped_ticks
    );
    Ok(())
}

/// One capture, one detection
async fn snapshot(
    config: &ConsoleConfig,
    tokens: TokenStore,
    session: &str,
    device: Option<String>,
) -> anyhow::Result<()> {
    let pipeline = pipeline_config(config, session, None)?;
    let mut live = open_camera(config, tokens, session, pipeline, device).await?;

    let outcome = live.capture_and_detect().await;
    live.shutdown().await;

    let snapshot = outcome.context("Detection failed")?;
    print_snapshot(&snapshot);
    Ok(())
}

async fn open_camera(
    config: &ConsoleConfig,
    tokens: TokenStore,
    session: &str,
    pipeline: PipelineConfig,
    device: Option<String>,
) -> anyhow::Result<LiveDetection<CameraSource>> {
    let device = device.unwrap_or_else(|| config.capture.camera_device.clone());
    let source = CameraSource::new(device.clone(), Arc::new(config.capture.clone()));
    let mut live = LiveDetection::new(pipeline, source, detector(config, tokens, session)?)?;

    println!("📷 Opening camera {}...", device);
    if let Err(e) = live.start_camera().await {
        println!("❌ Camera access denied or unavailable: {}", e);
        println!("   Check device permissions and run the command again to retry");
        return Err(e.into());
    }
    info!("Camera {} ready", device);
    Ok(live)
}

async fn handle_session_command(
    config: &ConsoleConfig,
    tokens: TokenStore,
    cmd: SessionCommands,
) -> anyhow::Result<()> {
    let client = SessionClient::new(&config.api, tokens)?;

    let status = match cmd {
        SessionCommands::Status { class_id } => client.status(&class_id).await?,
        SessionCommands::Toggle { class_id } => client.toggle(&class_id).await?,
    };

    match status.active {
        Some(true) => println!("✅ Session active"),
        Some(false) => println!("⚪ No active session"),
        None => println!("⚠️  Session state unknown"),
    }
    if !status.message.is_empty() {
        println!("   {}", status.message);
    }
    if let Some(id) = status.session_id {
        println!("   Session ID: {}", id);
    }
    Ok(())
}

fn print_progress(progress: Progress) {
    print!(
        "\r⏳ Processing frame {}/{} ({}%)",
        progress.current_frame, progress.total_frames, progress.percent
    );
    if let Err(e) = io::stdout().flush() {
        debug!("stdout flush failed: {}", e);
    }
}

fn print_result(result: &DetectionResult) {
    print!("[{:>6.1}s] ", result.timestamp_secs);
    if let Some(error) = &result.error {
        println!("no detections ({})", error);
        return;
    }
    if result.detections.is_empty() {
        println!("no detections");
        return;
    }
    let labels: Vec<String> = result
        .detections
        .iter()
        .map(|d| format!("{} {:.1}%", d.class_name, d.confidence_percent()))
        .collect();
    println!("{}", labels.join(", "));
}

fn print_snapshot(snapshot: &LiveSnapshot) {
    println!(
        "\n🕒 {} ({} detections{})",
        snapshot.captured_at.format("%H:%M:%S"),
        snapshot.detection_count,
        snapshot
            .processing_time
            .map(|t| format!(", {:.2}s", t))
            .unwrap_or_default()
    );
    for detection in &snapshot.detections {
        println!("   {:<20} {:>5.1}%", detection.class_name, detection.confidence_percent());
    }
    if let Some(url) = &snapshot.visualization_url {
        println!("   Visualization: {}", url);
    }
}

fn print_summary(summary: &BehaviorSummary) {
    println!("📊 Behavior Summary");
    println!("   Frames processed: {}", summary.frames_processed);
    println!("   Detections found: {}", summary.detections_found);
    if summary.is_empty() {
        println!("   No behaviors detected");
        return;
    }
    for (class_name, count) in summary.ranked() {
        println!("   {:<20} {}", class_name, count);
    }
}
