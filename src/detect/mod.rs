//! Region detection.
//!
//! Detectors operate on single-channel frames that the caller has already derived; they never do
//! color conversion themselves.

pub mod group;
pub mod haar;

use std::path::Path;

use image::GrayImage;

pub use haar::HaarCascadeDetector;

/// An axis-aligned area of interest in frame coordinates.
///
/// Produced fresh every tick and dropped once overlays are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }
}

/// A trainable detector backed by a model artifact.
pub trait RegionDetector {
    /// Loads the model. On failure detection stays disabled and [`detect`](Self::detect) returns
    /// no regions for the rest of the session.
    fn load_model(&mut self, path: &Path) -> bool;

    fn is_loaded(&self) -> bool;

    fn detect(&mut self, gray: &GrayImage) -> Vec<Region>;
}
