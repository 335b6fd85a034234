use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Frame data, immutable once produced.
///
/// Cloning a `Frame` shares the underlying buffer. Use [`Frame::deep_copy`] when the frame has to
/// outlive the tick that produced it.
#[derive(Clone)]
pub struct Frame {
    /// Pixel data, `meta.stride` bytes per row.
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Canonical pipeline layout.
    Rgb24,
    Bgr24,
    Gray8,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for compressed ones.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

impl Frame {
    /// Wraps a tightly packed buffer.
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width * format.bytes_per_pixel().unwrap_or(0);
        Self::with_sequence(data, width, height, stride, format, 0)
    }

    pub fn with_sequence(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self {
            data: data.into(),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride,
                format,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Number of interleaved channels, 0 for compressed data.
    pub fn channels(&self) -> u32 {
        match self.meta.format {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Gray8 => 1,
            PixelFormat::Yuyv4 | PixelFormat::Mjpeg => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.meta.width == 0 || self.meta.height == 0
    }

    /// Copies the pixel data into a fresh buffer that aliases nothing.
    pub fn deep_copy(&self) -> Self {
        Self {
            data: Bytes::copy_from_slice(&self.data),
            meta: Arc::new(FrameMetadata::clone(&self.meta)),
            timestamp: self.timestamp,
        }
    }

    /// Returns the rows without stride padding.
    pub fn packed_rows(&self) -> Vec<u8> {
        let row_len = match self.meta.format.bytes_per_pixel() {
            Some(bpp) => (self.meta.width * bpp) as usize,
            None => return self.data.to_vec(),
        };
        let stride = self.meta.stride as usize;
        if stride == row_len {
            return self.data.to_vec();
        }
        self.data
            .chunks(stride)
            .take(self.meta.height as usize)
            .flat_map(|row| &row[..row_len.min(row.len())])
            .copied()
            .collect()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .finish()
    }
}
