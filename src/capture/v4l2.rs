//! V4L2 camera source with memory-mapped buffers

use std::time::Duration;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
    capture::frame::{Frame, PixelFormat},
    capture::source::FrameSource,
    CaptureConfig,
};

/// Upper bound on a single dequeue so a stalled device only costs one tick.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// V4L2 capture device
pub struct V4l2Source {
    config: CaptureConfig,
    device: Option<Box<Device>>,
    stream: Option<MmapStream<'static>>,
    format: PixelFormat,
    resolution: (u32, u32),
    sequence: u64,
}

impl V4l2Source {
    pub fn new(config: CaptureConfig) -> Self {
        let resolution = (config.width, config.height);
        Self {
            config,
            device: None,
            stream: None,
            format: PixelFormat::Mjpeg,
            resolution,
            sequence: 0,
        }
    }

    fn try_open(&mut self) -> Result<()> {
        info!("Opening V4L2 device {}", self.config.device.path);

        let device = Device::with_path(&self.config.device.path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = match self.config.device.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            other => return Err(eyre!("Unsupported pixel format {:?}", other)),
        };

        // The driver may pick a different size than requested
        let actual = device.set_format(&fmt)?;
        self.format = if actual.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv4
        } else {
            PixelFormat::Mjpeg
        };
        self.resolution = (actual.width, actual.height);

        match device.set_params(&frame_rate_params(self.config.fps)) {
            Ok(params) => debug!(
                "Frame interval {}/{}",
                params.interval.numerator, params.interval.denominator
            ),
            Err(e) => warn!("Device kept its own frame rate: {}", e),
        }

        let mut stream =
            MmapStream::with_buffers(&device, Type::VideoCapture, self.config.buffer_count)?;
        stream.set_timeout(READ_TIMEOUT);

        info!(
            "Capture stream started at {}x{} {:?} with {} buffers",
            actual.width, actual.height, self.format, self.config.buffer_count
        );

        self.device = Some(Box::new(device));
        self.stream = Some(stream);
        Ok(())
    }
}

/// Streaming parameters requesting `fps` frames per second.
fn frame_rate_params(fps: u32) -> Parameters {
    Parameters::with_fps(fps.max(1))
}

impl FrameSource for V4l2Source {
    fn open(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        match self.try_open() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to open {}: {}", self.config.device.path, e);
                self.release();
                false
            }
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    #[instrument(skip(self))]
    fn read(&mut self) -> Option<Frame> {
        let stream = self.stream.as_mut()?;

        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                debug!("Dequeue failed: {}", e);
                return None;
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return None;
        }
        let data = Bytes::copy_from_slice(&buf[..used]);

        self.sequence += 1;
        let (width, height) = self.resolution;
        let stride = width * self.format.bytes_per_pixel().unwrap_or(0);

        Some(Frame::with_sequence(
            data,
            width,
            height,
            stride,
            self.format,
            self.sequence,
        ))
    }

    fn release(&mut self) {
        // Stream must go before the device it maps
        if self.stream.take().is_some() {
            info!("Released {}", self.config.device.path);
        }
        self.device = None;
    }

    fn reported_resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_rate_becomes_frame_interval() {
        let params = frame_rate_params(15);
        assert_eq!(
            (params.interval.numerator, params.interval.denominator),
            (1, 15)
        );
        // zero would be an invalid interval
        assert_eq!(frame_rate_params(0).interval.denominator, 1);
    }
}
