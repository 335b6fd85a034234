pub mod capture;
pub mod detect;
pub mod display;
pub mod encode;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameSource};
pub use error::{PipelineError, Result};
pub use pipeline::{Command, Pipeline, PipelineEvent, SessionState};

use crate::utils::FoundDevice;

/// Environment variables with this prefix override file settings, e.g.
/// `FACECAM__PIPELINE__AUTOSTART=true`.
pub const ENV_PREFIX: &str = "FACECAM";

/// Configuration file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_NAME: &str = "facecam";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub detector: DetectorConfig,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    V4l2,
    TestPattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    /// Pyramid step between detection scales.
    pub scale_factor: f64,
    /// Overlapping hits needed to keep a region.
    pub min_neighbors: u32,
    /// Smallest window edge in pixels, 0 for the model's native size.
    pub min_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tick_period_ms: u64,
    pub recording_fps: f64,
    pub jpeg_quality: u8,
    /// Directory receiving snapshots and recordings.
    pub output_dir: PathBuf,
    /// Start capturing without waiting for a command.
    pub autostart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayKind {
    Headless,
    Sdl2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub kind: DisplayKind,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceKind {
    /// The camera when the build can drive one, the synthetic pattern otherwise.
    fn default() -> Self {
        if cfg!(feature = "v4l2-capture") {
            SourceKind::V4l2
        } else {
            SourceKind::TestPattern
        }
    }
}

impl Default for DisplayKind {
    fn default() -> Self {
        if cfg!(feature = "sdl2-display") {
            DisplayKind::Sdl2
        } else {
            DisplayKind::Headless
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            device: FoundDevice::new("/dev/video0".into(), PixelFormat::Mjpeg),
            width: 640,
            height: 480,
            fps: 30,
            buffer_count: 4,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("haarcascade_frontalface_default.xml"),
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: 0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 30,
            recording_fps: pipeline::RECORDING_FPS,
            jpeg_quality: encode::avi::DEFAULT_QUALITY,
            output_dir: PathBuf::from("."),
            autostart: false,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            kind: DisplayKind::default(),
            width: 800,
            height: 600,
        }
    }
}

impl Config {
    /// Layers defaults, the config file and `FACECAM__*` environment variables.
    ///
    /// An explicit `path` must exist; otherwise `facecam.toml` is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Counters collected by the pipeline driver
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub frames_shown: u64,
    pub dropped_frames: u64,
    pub last_tick: Duration,
    pub max_tick: Duration,
}

impl PipelineStats {
    pub fn record_tick(&mut self, elapsed: Duration) {
        self.frames_shown += 1;
        self.last_tick = elapsed;
        self.max_tick = self.max_tick.max(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_cadence() {
        let config = Config::default();
        assert_eq!(config.pipeline.tick_period_ms, 30);
        assert_eq!(config.pipeline.recording_fps, 30.0);
        assert_eq!(config.detector.min_neighbors, 3);
    }

    #[test]
    fn default_backends_are_compiled_in() {
        let config = Config::default();
        assert_eq!(
            config.capture.source == SourceKind::V4l2,
            cfg!(feature = "v4l2-capture")
        );
        assert_eq!(
            config.display.kind == DisplayKind::Sdl2,
            cfg!(feature = "sdl2-display")
        );
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facecam.toml");
        std::fs::write(
            &path,
            "[pipeline]\nautostart = true\noutput_dir = \"/tmp/out\"\n\n[capture]\nsource = \"test-pattern\"\nwidth = 320\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(config.pipeline.autostart);
        assert_eq!(config.pipeline.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.capture.source, SourceKind::TestPattern);
        assert_eq!(config.capture.width, 320);
        // untouched keys keep their defaults
        assert_eq!(config.capture.height, 480);
        assert_eq!(config.pipeline.tick_period_ms, 30);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/facecam.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
