//! Error types shared across the pipeline.
//!
//! Every failure here is local and recoverable; none of them terminates the process.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::capture::PixelFormat;

/// Failures surfaced by pipeline commands.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The camera could not be opened.
    #[error("camera device is unavailable")]
    DeviceUnavailable,

    /// The detector model is missing or corrupt. Detection degrades to a no-op.
    #[error("failed to load detector model {path}: {source}")]
    ModelLoadFailed {
        path: PathBuf,
        #[source]
        source: CascadeError,
    },

    /// Recording could not start because the encoder did not open.
    #[error("failed to open encoder for {path}: {source}")]
    EncoderOpenFailed {
        path: PathBuf,
        #[source]
        source: EncoderError,
    },

    /// The source produced nothing this tick.
    #[error("frame source yielded an empty frame")]
    EmptyFrame,

    /// A snapshot was requested before any frame was processed.
    #[error("no processed frame is available to save")]
    NoFrameToSave,

    #[error("frame conversion failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Failures of the file encoder.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("unsupported codec {0}")]
    UnsupportedCodec(String),

    #[error("invalid encoder parameters: {0}")]
    InvalidParameters(String),

    #[error("encoder is not open")]
    NotOpen,

    #[error("frame is {got_width}x{got_height}, encoder expects {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    #[error("recording reached the {limit} byte container limit")]
    FileSizeLimit { limit: u64 },

    #[error("media pipeline failed: {0}")]
    Pipeline(String),

    #[error("frame format {0:?} is not accepted by the encoder")]
    UnsupportedFormat(PixelFormat),

    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures converting raw camera data into the canonical layout.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("buffer holds {got} bytes, {expected} expected for {width}x{height} {format:?}")]
    ShortBuffer {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },

    #[error("JPEG decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),

    #[error("JPEG stream has no image info")]
    MissingJpegInfo,

    #[error("cannot convert into {0:?}")]
    UnsupportedTarget(PixelFormat),

    #[error("unsupported JPEG pixel format {0:?}")]
    UnsupportedJpeg(jpeg_decoder::PixelFormat),
}

/// Failures loading a cascade model artifact.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("missing element <{0}>")]
    MissingElement(&'static str),

    #[error("invalid value in <{element}>: {value:?}")]
    InvalidValue { element: &'static str, value: String },

    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
