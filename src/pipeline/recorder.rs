//! Recording state machine around a file encoder.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::capture::{decode, Frame};
use crate::encode::{FourCc, FrameEncoder};
use crate::error::{PipelineError, Result};
use crate::utils::{file_timestamp, unused_path};

/// Frame rate written into recordings, independent of the achieved tick rate.
pub const RECORDING_FPS: f64 = 30.0;

struct ActiveRecording {
    path: PathBuf,
    frames: u64,
}

/// Outcome of a finished recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
}

/// Idle/Active recorder. The encoder is open exactly while a recording is active.
pub struct Recorder {
    encoder: Box<dyn FrameEncoder>,
    output_dir: PathBuf,
    active: Option<ActiveRecording>,
}

impl Recorder {
    pub fn new(encoder: Box<dyn FrameEncoder>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            encoder,
            output_dir: output_dir.into(),
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Frames written to the current recording.
    pub fn frames_written(&self) -> u64 {
        self.active.as_ref().map_or(0, |a| a.frames)
    }

    /// Opens `record_<YYYYMMDD_HHMMSS>.avi` in the output directory.
    ///
    /// Starting while already active keeps the current file. If the encoder fails to open the
    /// recorder stays idle.
    pub fn start(&mut self, size: (u32, u32), fps: f64) -> Result<PathBuf> {
        self.start_at(size, fps, Local::now())
    }

    /// Starts a recording named after `now`. An existing file with that name gets a numeric
    /// suffix instead of being overwritten.
    pub fn start_at(&mut self, size: (u32, u32), fps: f64, now: DateTime<Local>) -> Result<PathBuf> {
        if let Some(active) = &self.active {
            debug!("Already recording to {}", active.path.display());
            return Ok(active.path.clone());
        }

        let path = unused_path(
            &self.output_dir,
            &format!("record_{}", file_timestamp(&now)),
            "avi",
        );

        match self.encoder.open(&path, FourCc::MJPG, fps, size) {
            Ok(()) => {
                info!(
                    "Recording started: {} ({}x{} @ {} fps)",
                    path.display(),
                    size.0,
                    size.1,
                    fps
                );
                self.active = Some(ActiveRecording {
                    path: path.clone(),
                    frames: 0,
                });
                Ok(path)
            }
            Err(source) => {
                if let Err(e) = self.encoder.release() {
                    debug!("Release after failed open: {}", e);
                }
                warn!("Could not start recording {}: {}", path.display(), source);
                Err(PipelineError::EncoderOpenFailed { path, source })
            }
        }
    }

    /// Forwards one processed frame to the encoder. Ignored while idle.
    ///
    /// The frame is converted to the encoder's channel order first. Failures are logged and do
    /// not end the recording.
    pub fn write(&mut self, frame: &Frame) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let converted = match decode::convert(frame, self.encoder.input_format()) {
            Ok(converted) => converted,
            Err(e) => {
                warn!("Cannot convert frame for recording: {}", e);
                return;
            }
        };
        match self.encoder.write(&converted) {
            Ok(()) => {
                active.frames += 1;
                metrics::counter!("facecam_frames_recorded").increment(1);
            }
            Err(e) => warn!("Failed to write frame to {}: {}", active.path.display(), e),
        }
    }

    /// Releases the encoder and returns to idle. `None` if nothing was recording.
    pub fn stop(&mut self) -> Option<RecordingSummary> {
        let active = self.active.take()?;
        if let Err(e) = self.encoder.release() {
            warn!("Failed to finalise {}: {}", active.path.display(), e);
        }
        info!(
            "Recording stopped: {} ({} frames)",
            active.path.display(),
            active.frames
        );
        Some(RecordingSummary {
            path: active.path,
            frames: active.frames,
        })
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::capture::PixelFormat;
    use crate::error::EncoderError;

    #[derive(Default)]
    struct Log {
        opened: bool,
        opens: u32,
        releases: u32,
        writes: Vec<PixelFormat>,
    }

    /// Encoder double that records calls and can refuse to open.
    struct FakeEncoder {
        log: Rc<RefCell<Log>>,
        fail_open: bool,
    }

    impl FrameEncoder for FakeEncoder {
        fn open(&mut self, _: &Path, _: FourCc, _: f64, _: (u32, u32)) -> Result<(), EncoderError> {
            let mut log = self.log.borrow_mut();
            log.opens += 1;
            if self.fail_open {
                return Err(EncoderError::NotOpen);
            }
            log.opened = true;
            Ok(())
        }

        fn is_opened(&self) -> bool {
            self.log.borrow().opened
        }

        fn input_format(&self) -> PixelFormat {
            PixelFormat::Bgr24
        }

        fn write(&mut self, frame: &Frame) -> Result<(), EncoderError> {
            self.log.borrow_mut().writes.push(frame.format());
            Ok(())
        }

        fn release(&mut self) -> Result<(), EncoderError> {
            let mut log = self.log.borrow_mut();
            log.releases += 1;
            log.opened = false;
            Ok(())
        }
    }

    fn recorder(fail_open: bool) -> (Recorder, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let encoder = FakeEncoder {
            log: log.clone(),
            fail_open,
        };
        (Recorder::new(Box::new(encoder), "."), log)
    }

    fn frame() -> Frame {
        Frame::new(vec![1u8, 2, 3], 1, 1, PixelFormat::Rgb24)
    }

    #[test]
    fn idle_recorder_never_writes() {
        let (mut recorder, log) = recorder(false);
        recorder.write(&frame());
        assert!(log.borrow().writes.is_empty());
        assert!(recorder.stop().is_none());
    }

    #[test]
    fn frames_are_converted_to_encoder_order() {
        let (mut recorder, log) = recorder(false);
        recorder.start((1, 1), RECORDING_FPS).unwrap();
        recorder.write(&frame());
        assert_eq!(log.borrow().writes, vec![PixelFormat::Bgr24]);
        assert_eq!(recorder.frames_written(), 1);
    }

    #[test]
    fn second_start_reuses_open_encoder() {
        let (mut recorder, log) = recorder(false);
        let first = recorder.start((1, 1), RECORDING_FPS).unwrap();
        let second = recorder.start((1, 1), RECORDING_FPS).unwrap();
        assert_eq!(first, second);
        assert_eq!(log.borrow().opens, 1);

        recorder.write(&frame());
        assert_eq!(log.borrow().writes.len(), 1);
    }

    #[test]
    fn failed_open_stays_idle() {
        let (mut recorder, log) = recorder(true);
        let err = recorder.start((1, 1), RECORDING_FPS).unwrap_err();
        assert!(matches!(err, PipelineError::EncoderOpenFailed { .. }));
        assert!(!recorder.is_active());
        assert!(!log.borrow().opened);
    }

    #[test]
    fn restart_within_the_same_second_keeps_earlier_file() {
        use crate::encode::AviMjpegWriter;
        use chrono::TimeZone;

        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(Box::new(AviMjpegWriter::default()), dir.path());
        let now = Local.with_ymd_and_hms(2024, 5, 17, 13, 45, 10).unwrap();
        let rgb = Frame::new(vec![90u8; 8 * 8 * 3], 8, 8, PixelFormat::Rgb24);

        let first = recorder.start_at((8, 8), RECORDING_FPS, now).unwrap();
        for _ in 0..5 {
            recorder.write(&rgb);
        }
        assert_eq!(recorder.stop().unwrap().frames, 5);
        let first_len = std::fs::metadata(&first).unwrap().len();

        let second = recorder.start_at((8, 8), RECORDING_FPS, now).unwrap();
        recorder.stop().unwrap();

        assert_ne!(first, second);
        assert_eq!(
            second.file_name().unwrap().to_str().unwrap(),
            "record_20240517_134510_1.avi"
        );
        assert_eq!(std::fs::metadata(&first).unwrap().len(), first_len);
        let bytes = std::fs::read(&first).unwrap();
        assert_eq!(u32::from_le_bytes(bytes[48..52].try_into().unwrap()), 5);
    }

    #[test]
    fn stop_releases_even_without_frames() {
        let (mut recorder, log) = recorder(false);
        recorder.start((1, 1), RECORDING_FPS).unwrap();
        let summary = recorder.stop().unwrap();
        assert_eq!(summary.frames, 0);
        assert!(!recorder.is_active());
        assert!(!log.borrow().opened);
        assert_eq!(log.borrow().releases, 1);
    }
}
