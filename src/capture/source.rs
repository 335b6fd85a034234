//! Camera source contract and a synthetic implementation.

use tracing::{debug, info};

use super::frame::{Frame, PixelFormat};

/// A camera handle yielding raw frames.
///
/// `read` never blocks indefinitely and never fails loudly: a device that yields nothing returns
/// `None` and the caller skips the tick.
pub trait FrameSource {
    /// Opens the device if needed. Idempotent; returns whether the source is open afterwards.
    fn open(&mut self) -> bool;

    fn is_open(&self) -> bool;

    /// Reads one raw frame, `None` if the device produced nothing.
    fn read(&mut self) -> Option<Frame>;

    /// Releases the device. Safe to call when already closed.
    fn release(&mut self);

    /// Capture resolution negotiated with the device.
    fn reported_resolution(&self) -> (u32, u32);
}

/// Synthetic camera producing a moving BGR test pattern.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    available: bool,
    open: bool,
    sequence: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            available: true,
            open: false,
            sequence: 0,
        }
    }

    /// A source whose device never opens.
    pub fn unavailable(width: u32, height: u32) -> Self {
        Self {
            available: false,
            ..Self::new(width, height)
        }
    }

    fn render(&self) -> Vec<u8> {
        let (width, height) = (u64::from(self.width.max(1)), u64::from(self.height.max(1)));
        // Both ramps are periodic in the shift, so only its phase matters
        let shift = self.sequence.wrapping_mul(4) % (width * 32);
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..u64::from(self.height) {
            for x in 0..u64::from(self.width) {
                let b = ((x + shift) % width * 255 / width) as u8;
                let g = (y * 255 / height) as u8;
                let r = ((x + y + shift) / 16 % 2 * 160) as u8;
                data.extend_from_slice(&[b, g, r]);
            }
        }
        data
    }
}

impl FrameSource for TestPatternSource {
    fn open(&mut self) -> bool {
        if !self.open && self.available {
            info!(
                "Test pattern source opened at {}x{}",
                self.width, self.height
            );
            self.open = true;
        }
        self.open
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self) -> Option<Frame> {
        if !self.open {
            return None;
        }
        self.sequence += 1;
        Some(Frame::with_sequence(
            self.render(),
            self.width,
            self.height,
            self.width * 3,
            PixelFormat::Bgr24,
            self.sequence,
        ))
    }

    fn release(&mut self) {
        if self.open {
            debug!("Test pattern source released");
        }
        self.open = false;
    }

    fn reported_resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
