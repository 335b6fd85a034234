#[cfg(feature = "sdl2-display")]
pub mod display;

use tracing::{info, trace};

use crate::capture::Frame;

#[cfg(feature = "sdl2-display")]
pub use display::Sdl2Display;

/// Passive presentation target for rendered frames.
///
/// Fire-and-forget: nothing the sink does feeds back into processing.
pub trait DisplaySink {
    fn show(&mut self, frame: &Frame);

    /// Clears the picture and shows a status line instead.
    fn show_status(&mut self, message: &str);

    /// Services the sink's own event loop. Called once per driver period, capturing or not.
    fn poll(&mut self) {}
}

/// Sink for runs without a window; logs instead of drawing.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    shown: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown
    }
}

impl DisplaySink for HeadlessDisplay {
    fn show(&mut self, frame: &Frame) {
        self.shown += 1;
        trace!(
            "frame #{} {}x{}",
            frame.meta.sequence,
            frame.width(),
            frame.height()
        );
    }

    fn show_status(&mut self, message: &str) {
        info!("Status: {}", message);
    }
}
