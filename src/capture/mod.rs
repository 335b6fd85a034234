pub mod decode;
pub mod frame;
pub mod source;
#[cfg(feature = "v4l2-capture")]
pub mod v4l2;

pub use frame::Frame;
pub use frame::PixelFormat;
pub use source::{FrameSource, TestPatternSource};
#[cfg(feature = "v4l2-capture")]
pub use v4l2::V4l2Source;
