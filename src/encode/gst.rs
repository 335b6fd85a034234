//! GStreamer-backed Motion-JPEG AVI writer
//!
//! Frames are pushed into `appsrc ! videoconvert ! jpegenc ! avimux ! filesink`. `avimux`
//! switches to OpenDML indexes on its own, so recordings are not capped at 4 GiB.

use std::path::{Path, PathBuf};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use super::{FourCc, FrameEncoder};
use crate::capture::{Frame, PixelFormat};
use crate::error::EncoderError;

/// How long `release` waits for the muxer to flush after EOS.
const EOS_TIMEOUT_SECS: u64 = 5;

struct Recording {
    path: PathBuf,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    width: u32,
    height: u32,
    frame_ns: u64,
    frames: u64,
}

/// Encoder that hands frames to a GStreamer muxing pipeline.
pub struct GstAviWriter {
    quality: u8,
    recording: Option<Recording>,
}

impl GstAviWriter {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            recording: None,
        }
    }

    fn build_pipeline(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<(gst::Pipeline, gst_app::AppSrc), EncoderError> {
        gst::init().map_err(|e| pipeline_error("Failed to initialize GStreamer", e))?;

        let pipeline = gst::Pipeline::new();

        let appsrc = gst::ElementFactory::make("appsrc")
            .name("facecam_src")
            .build()
            .map_err(|e| pipeline_error("Failed to create appsrc", e))?;
        let convert = make("videoconvert")?;
        let jpegenc = make("jpegenc")?;
        jpegenc.set_property("quality", i32::from(self.quality));
        let avimux = make("avimux")?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .build()
            .map_err(|e| pipeline_error("Failed to create filesink", e))?;

        let appsrc = appsrc
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| EncoderError::Pipeline("Failed to downcast to AppSrc".into()))?;

        let (num, den) = fps_fraction(fps);
        let caps = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
            .fps(gst::Fraction::new(num, den))
            .build()
            .map_err(|e| pipeline_error("Invalid video info", e))?
            .to_caps()
            .map_err(|e| pipeline_error("Invalid caps", e))?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(false);

        let elements = [
            appsrc.upcast_ref::<gst::Element>(),
            &convert,
            &jpegenc,
            &avimux,
            &filesink,
        ];
        pipeline
            .add_many(elements)
            .map_err(|e| pipeline_error("Failed to add elements", e))?;
        gst::Element::link_many(elements)
            .map_err(|e| pipeline_error("Failed to link elements", e))?;

        Ok((pipeline, appsrc))
    }

    /// Sends EOS and waits until the muxer has written its trailer.
    fn finish(recording: Recording) -> Result<(), EncoderError> {
        let Recording {
            path,
            pipeline,
            appsrc,
            frames,
            ..
        } = recording;

        let flushed = match appsrc.end_of_stream() {
            Ok(_) => wait_for_eos(&pipeline),
            Err(e) => Err(EncoderError::Pipeline(format!("Failed to send EOS: {:?}", e))),
        };
        pipeline
            .set_state(gst::State::Null)
            .map_err(|e| pipeline_error("Failed to stop pipeline", e))?;
        flushed?;

        debug!("Finalised {} with {} frames", path.display(), frames);
        Ok(())
    }
}

impl Default for GstAviWriter {
    fn default() -> Self {
        Self::new(super::avi::DEFAULT_QUALITY)
    }
}

impl FrameEncoder for GstAviWriter {
    fn open(
        &mut self,
        path: &Path,
        fourcc: FourCc,
        fps: f64,
        (width, height): (u32, u32),
    ) -> Result<(), EncoderError> {
        self.release()?;

        if fourcc != FourCc::MJPG {
            return Err(EncoderError::UnsupportedCodec(fourcc.to_string()));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(EncoderError::InvalidParameters(format!("fps {fps}")));
        }
        if width == 0 || height == 0 {
            return Err(EncoderError::InvalidParameters(format!(
                "frame size {width}x{height}"
            )));
        }

        let (pipeline, appsrc) = self.build_pipeline(path, fps, width, height)?;
        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(pipeline_error("Failed to start pipeline", e));
        }
        check_bus(&pipeline)?;

        info!(
            "Opened {} ({}x{} @ {} fps, {}) through GStreamer",
            path.display(),
            width,
            height,
            fps,
            fourcc
        );
        self.recording = Some(Recording {
            path: path.to_path_buf(),
            pipeline,
            appsrc,
            width,
            height,
            frame_ns: (1_000_000_000.0 / fps).round() as u64,
            frames: 0,
        });
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.recording.is_some()
    }

    fn input_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    fn write(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        let recording = self.recording.as_mut().ok_or(EncoderError::NotOpen)?;
        if frame.format() != PixelFormat::Rgb24 {
            return Err(EncoderError::UnsupportedFormat(frame.format()));
        }
        if (frame.width(), frame.height()) != (recording.width, recording.height) {
            return Err(EncoderError::SizeMismatch {
                width: recording.width,
                height: recording.height,
                got_width: frame.width(),
                got_height: frame.height(),
            });
        }

        let mut buffer = gst::Buffer::from_mut_slice(frame.packed_rows());
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| EncoderError::Pipeline("Buffer is not writable".into()))?;
            let pts = recording.frames.saturating_mul(recording.frame_ns);
            buffer.set_pts(gst::ClockTime::from_nseconds(pts));
            buffer.set_duration(gst::ClockTime::from_nseconds(recording.frame_ns));
        }

        recording
            .appsrc
            .push_buffer(buffer)
            .map_err(|e| EncoderError::Pipeline(format!("Failed to push frame: {:?}", e)))?;
        recording.frames += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<(), EncoderError> {
        match self.recording.take() {
            Some(recording) => Self::finish(recording),
            None => Ok(()),
        }
    }
}

impl Drop for GstAviWriter {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to finalise recording: {}", e);
        }
    }
}

fn make(factory: &str) -> Result<gst::Element, EncoderError> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|e| EncoderError::Pipeline(format!("Failed to create {factory}: {e}")))
}

fn pipeline_error(context: &str, e: impl std::fmt::Display) -> EncoderError {
    EncoderError::Pipeline(format!("{context}: {e}"))
}

/// Frame rate as a fraction with millisecond precision, e.g. 29.97 → 29970/1000.
fn fps_fraction(fps: f64) -> (i32, i32) {
    let millis = (fps * 1000.0).round().clamp(1.0, f64::from(i32::MAX)) as i32;
    if millis % 1000 == 0 {
        (millis / 1000, 1)
    } else {
        (millis, 1000)
    }
}

/// Surfaces errors raised while the pipeline was starting, e.g. an unwritable location.
fn check_bus(pipeline: &gst::Pipeline) -> Result<(), EncoderError> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| EncoderError::Pipeline("No bus available".into()))?;
    if let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
        if let gst::MessageView::Error(err) = msg.view() {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(EncoderError::Pipeline(format!(
                "Error from {:?}: {}",
                err.src().map(|s| s.path_string()),
                err.error()
            )));
        }
    }
    Ok(())
}

fn wait_for_eos(pipeline: &gst::Pipeline) -> Result<(), EncoderError> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| EncoderError::Pipeline("No bus available".into()))?;
    let msg = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
    );
    match msg.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Eos(..)) => Ok(()),
        Some(gst::MessageView::Error(err)) => Err(EncoderError::Pipeline(format!(
            "Error from {:?}: {} ({:?})",
            err.src().map(|s| s.path_string()),
            err.error(),
            err.debug()
        ))),
        _ => Err(EncoderError::Pipeline(format!(
            "No EOS within {EOS_TIMEOUT_SECS}s"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elements_available() -> bool {
        gst::init().is_ok()
            && ["appsrc", "videoconvert", "jpegenc", "avimux", "filesink"]
                .iter()
                .all(|name| gst::ElementFactory::find(name).is_some())
    }

    #[test]
    fn fractional_rates_keep_precision() {
        assert_eq!(fps_fraction(30.0), (30, 1));
        assert_eq!(fps_fraction(29.97), (29970, 1000));
    }

    #[test]
    fn writes_playable_avi() {
        if !elements_available() {
            eprintln!("GStreamer plugins missing, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        let mut writer = GstAviWriter::default();
        writer.open(&path, FourCc::MJPG, 30.0, (64, 48)).unwrap();
        for _ in 0..3 {
            let frame = Frame::new(vec![128u8; 64 * 48 * 3], 64, 48, PixelFormat::Rgb24);
            writer.write(&frame).unwrap();
        }
        writer.release().unwrap();
        assert!(!writer.is_opened());

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        assert!(bytes.windows(4).any(|w| w == b"00dc"));
    }

    #[test]
    fn rejects_other_codecs_and_sizes() {
        let mut writer = GstAviWriter::default();
        let path = Path::new("unused.avi");
        assert!(matches!(
            writer.open(path, FourCc::new(b"XVID"), 30.0, (32, 16)),
            Err(EncoderError::UnsupportedCodec(_))
        ));
        assert!(matches!(
            writer.open(path, FourCc::MJPG, 30.0, (0, 16)),
            Err(EncoderError::InvalidParameters(_))
        ));
        assert!(matches!(
            writer.write(&Frame::new(vec![0u8; 3], 1, 1, PixelFormat::Rgb24)),
            Err(EncoderError::NotOpen)
        ));
    }
}
