//! facecam: camera pipeline with face detection, snapshots and recording

use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use flume::Sender;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use facecam::capture::{FrameSource, TestPatternSource};
use facecam::detect::{HaarCascadeDetector, RegionDetector};
use facecam::display::{DisplaySink, HeadlessDisplay};
use facecam::encode::FrameEncoder;
use facecam::{Command, Config, DisplayKind, Pipeline, PipelineEvent, SourceKind};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("facecam=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("facecam launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    std::fs::create_dir_all(&config.pipeline.output_dir)?;

    let (tx, rx) = flume::unbounded::<Command>();

    let source = open_source(&config).await?;

    let mut detector = HaarCascadeDetector::new(&config.detector);
    if !detector.load_model(&config.detector.model_path) {
        warn!("Face detection unavailable for this session");
    }

    #[cfg(feature = "gstreamer-pipeline")]
    let encoder: Box<dyn FrameEncoder> = Box::new(facecam::encode::GstAviWriter::new(
        config.pipeline.jpeg_quality,
    ));
    #[cfg(not(feature = "gstreamer-pipeline"))]
    let encoder: Box<dyn FrameEncoder> = Box::new(facecam::encode::AviMjpegWriter::new(
        config.pipeline.jpeg_quality,
    ));

    #[cfg(feature = "sdl2-display")]
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;

    let display: Box<dyn DisplaySink> = match config.display.kind {
        DisplayKind::Headless => Box::new(HeadlessDisplay::new()),
        #[cfg(feature = "sdl2-display")]
        DisplayKind::Sdl2 => Box::new(facecam::display::Sdl2Display::new(
            &sdl_context,
            config.display.width,
            config.display.height,
            tx.clone(),
        )?),
        #[cfg(not(feature = "sdl2-display"))]
        DisplayKind::Sdl2 => {
            warn!("Built without sdl2-display, running headless");
            Box::new(HeadlessDisplay::new())
        }
    };

    let mut pipeline = Pipeline::new(
        &config.pipeline,
        source,
        Box::new(detector),
        encoder,
        display,
    );

    let events = pipeline.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            match event {
                PipelineEvent::StateChanged(state) => info!("State: {:?}", state),
                PipelineEvent::SnapshotSaved(path) => info!("Snapshot: {}", path.display()),
                PipelineEvent::RecordingFinished { path, frames } => {
                    info!("Recording {} closed with {} frames", path.display(), frames)
                }
                other => info!("{:?}", other),
            }
        }
    });

    spawn_stdin_commands(tx.clone());
    spawn_ctrl_c(tx.clone());

    if config.pipeline.autostart {
        tx.send(Command::StartCamera)?;
    }
    drop(tx);

    pipeline.run(rx).await;

    info!("facecam shutting down");
    Ok(())
}

async fn open_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    let capture = &config.capture;
    match capture.source {
        SourceKind::TestPattern => Ok(Box::new(TestPatternSource::new(
            capture.width,
            capture.height,
        ))),
        #[cfg(feature = "v4l2-capture")]
        SourceKind::V4l2 => {
            // Auto-detect capture device if needed
            let mut capture = capture.clone();
            if capture.device.path.is_empty() {
                capture.device = facecam::utils::auto_detect_device().await?;
            }
            info!("Using capture device: {:?}", capture.device);
            Ok(Box::new(facecam::capture::V4l2Source::new(capture)))
        }
        #[cfg(not(feature = "v4l2-capture"))]
        SourceKind::V4l2 => Err(eyre!(
            "built without v4l2-capture; set capture.source = \"test-pattern\""
        )),
    }
}

/// Reads one command per line from stdin.
fn spawn_stdin_commands(tx: Sender<Command>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if tx.send_async(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }
    });
}

fn spawn_ctrl_c(tx: Sender<Command>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            let _ = tx.send_async(Command::Quit).await;
        }
    });
}
