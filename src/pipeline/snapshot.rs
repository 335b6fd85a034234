//! Still-image capture of the last processed frame.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use image::ImageFormat;
use tracing::info;

use crate::capture::{decode, Frame};
use crate::error::{PipelineError, Result};
use crate::utils::{file_timestamp, unused_path};

pub struct SnapshotWriter {
    output_dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Writes `capture_<YYYYMMDD_HHMMSS>.png`, suffixed when that name is taken. Without a
    /// frame nothing touches the disk.
    pub fn save(&self, frame: Option<&Frame>) -> Result<PathBuf> {
        self.save_at(frame, Local::now())
    }

    pub fn save_at(&self, frame: Option<&Frame>, now: DateTime<Local>) -> Result<PathBuf> {
        let frame = frame.ok_or(PipelineError::NoFrameToSave)?;
        let path = unused_path(
            &self.output_dir,
            &format!("capture_{}", file_timestamp(&now)),
            "png",
        );

        // PNG encoding consumes RGB
        let image = decode::decode_frame(frame)?;
        image.save_with_format(&path, ImageFormat::Png)?;

        info!("Image saved: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;

    #[test]
    fn nothing_to_save_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());
        assert!(matches!(
            writer.save(None),
            Err(PipelineError::NoFrameToSave)
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn saves_png_with_original_colors() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());
        let frame = Frame::new(vec![200u8, 10, 20, 200, 10, 20], 2, 1, PixelFormat::Rgb24);

        let path = writer.save(Some(&frame)).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("capture_") && name.ends_with(".png"));
        assert_eq!(name.len(), "capture_20240101_000000.png".len());

        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.get_pixel(1, 0).0, [200, 10, 20]);
    }

    #[test]
    fn same_second_snapshots_do_not_overwrite() {
        use chrono::TimeZone;

        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());
        let now = Local.with_ymd_and_hms(2024, 5, 17, 13, 45, 10).unwrap();
        let frame = Frame::new(vec![0u8; 3], 1, 1, PixelFormat::Rgb24);

        let first = writer.save_at(Some(&frame), now).unwrap();
        let second = writer.save_at(Some(&frame), now).unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn write_failure_is_reported() {
        let writer = SnapshotWriter::new("/nonexistent/dir");
        let frame = Frame::new(vec![0u8; 3], 1, 1, PixelFormat::Rgb24);
        assert!(matches!(
            writer.save(Some(&frame)),
            Err(PipelineError::Image(_))
        ));
    }
}
