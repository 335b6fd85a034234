//! Video file encoders.

pub mod avi;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst;

use std::fmt;
use std::path::Path;

use crate::capture::{Frame, PixelFormat};
use crate::error::EncoderError;

pub use avi::AviMjpegWriter;
#[cfg(feature = "gstreamer-pipeline")]
pub use gst::GstAviWriter;

/// Four-character codec code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const MJPG: FourCc = FourCc(*b"MJPG");

    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Open/write/release sink producing a video file on disk.
pub trait FrameEncoder {
    fn open(
        &mut self,
        path: &Path,
        fourcc: FourCc,
        fps: f64,
        size: (u32, u32),
    ) -> Result<(), EncoderError>;

    fn is_opened(&self) -> bool;

    /// Channel order the encoder expects from [`write`](Self::write).
    fn input_format(&self) -> PixelFormat;

    fn write(&mut self, frame: &Frame) -> Result<(), EncoderError>;

    /// Finalises the file. Releasing a closed encoder is a no-op.
    fn release(&mut self) -> Result<(), EncoderError>;
}
