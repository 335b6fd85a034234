//! Motion-JPEG in an AVI (RIFF) container.
//!
//! Every frame is an independent JPEG key frame stored as a `00dc` chunk. Headers are written with
//! placeholder counts on open and patched on release together with the `idx1` index.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, info, warn};

use super::{FourCc, FrameEncoder};
use crate::capture::{Frame, PixelFormat};
use crate::error::EncoderError;

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;

// Byte offsets of the fields patched on release
const RIFF_SIZE_OFFSET: u64 = 4;
const MAX_BYTES_PER_SEC_OFFSET: u64 = 36;
const TOTAL_FRAMES_OFFSET: u64 = 48;
const AVIH_BUFFER_SIZE_OFFSET: u64 = 60;
const STREAM_LENGTH_OFFSET: u64 = 140;
const STRH_BUFFER_SIZE_OFFSET: u64 = 144;
const MOVI_SIZE_OFFSET: u64 = 216;
/// Position of the `movi` fourcc; index offsets are relative to it.
const MOVI_OFFSET: u64 = 220;

/// Default JPEG quality for recorded frames.
pub const DEFAULT_QUALITY: u8 = 90;

/// Largest file a plain RIFF AVI can describe; every size and offset field is 32-bit.
pub const MAX_FILE_SIZE: u64 = u32::MAX as u64;

struct IndexEntry {
    offset: u32,
    size: u32,
}

struct OpenFile {
    path: PathBuf,
    out: BufWriter<File>,
    width: u32,
    height: u32,
    fps: f64,
    position: u64,
    index: Vec<IndexEntry>,
    max_chunk: u32,
}

/// File encoder writing `MJPG` AVI files.
pub struct AviMjpegWriter {
    quality: u8,
    max_file_size: u64,
    file: Option<OpenFile>,
    jpeg: Vec<u8>,
    frames_written: u64,
}

impl AviMjpegWriter {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            max_file_size: MAX_FILE_SIZE,
            file: None,
            jpeg: Vec::new(),
            frames_written: 0,
        }
    }

    /// Caps the finished file size below [`MAX_FILE_SIZE`]. Frames that would cross it are
    /// refused with [`EncoderError::FileSizeLimit`].
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes.min(MAX_FILE_SIZE);
        self
    }

    /// Frames written since the last successful open.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn write_headers(out: &mut impl Write, width: u32, height: u32, fps: f64) -> std::io::Result<()> {
        let us_per_frame = (1_000_000.0 / fps).round() as u32;
        let rate = (fps * 1000.0).round() as u32;

        out.write_all(b"RIFF")?;
        put_u32(out, 0)?;
        out.write_all(b"AVI ")?;

        out.write_all(b"LIST")?;
        put_u32(out, 192)?;
        out.write_all(b"hdrl")?;

        out.write_all(b"avih")?;
        put_u32(out, 56)?;
        put_u32(out, us_per_frame)?;
        put_u32(out, 0)?; // max bytes per sec
        put_u32(out, 0)?; // padding granularity
        put_u32(out, AVIF_HASINDEX)?;
        put_u32(out, 0)?; // total frames
        put_u32(out, 0)?; // initial frames
        put_u32(out, 1)?; // streams
        put_u32(out, 0)?; // suggested buffer size
        put_u32(out, width)?;
        put_u32(out, height)?;
        out.write_all(&[0u8; 16])?;

        out.write_all(b"LIST")?;
        put_u32(out, 116)?;
        out.write_all(b"strl")?;

        out.write_all(b"strh")?;
        put_u32(out, 56)?;
        out.write_all(b"vids")?;
        out.write_all(&FourCc::MJPG.0)?;
        put_u32(out, 0)?; // flags
        put_u32(out, 0)?; // priority + language
        put_u32(out, 0)?; // initial frames
        put_u32(out, 1000)?; // scale
        put_u32(out, rate)?;
        put_u32(out, 0)?; // start
        put_u32(out, 0)?; // length
        put_u32(out, 0)?; // suggested buffer size
        put_u32(out, u32::MAX)?; // quality
        put_u32(out, 0)?; // sample size
        for v in [0u16, 0, width as u16, height as u16] {
            out.write_all(&v.to_le_bytes())?;
        }

        out.write_all(b"strf")?;
        put_u32(out, 40)?;
        put_u32(out, 40)?;
        put_u32(out, width)?;
        put_u32(out, height)?;
        out.write_all(&1u16.to_le_bytes())?; // planes
        out.write_all(&24u16.to_le_bytes())?; // bit count
        out.write_all(&FourCc::MJPG.0)?;
        put_u32(out, frame_bytes(width, height))?;
        out.write_all(&[0u8; 16])?;

        out.write_all(b"LIST")?;
        put_u32(out, 0)?;
        out.write_all(b"movi")?;
        Ok(())
    }

    fn finish(mut file: OpenFile) -> std::io::Result<PathBuf> {
        let movi_end = file.position;
        let frames = file.index.len() as u32;

        file.out.write_all(b"idx1")?;
        put_u32(&mut file.out, frames * 16)?;
        for entry in &file.index {
            file.out.write_all(b"00dc")?;
            put_u32(&mut file.out, AVIIF_KEYFRAME)?;
            put_u32(&mut file.out, entry.offset)?;
            put_u32(&mut file.out, entry.size)?;
        }
        let file_end = movi_end + 8 + u64::from(frames) * 16;
        let bytes_per_sec = (f64::from(file.max_chunk) * file.fps).round() as u32;

        let patches = [
            (RIFF_SIZE_OFFSET, (file_end - 8) as u32),
            (MAX_BYTES_PER_SEC_OFFSET, bytes_per_sec),
            (TOTAL_FRAMES_OFFSET, frames),
            (AVIH_BUFFER_SIZE_OFFSET, file.max_chunk),
            (STREAM_LENGTH_OFFSET, frames),
            (STRH_BUFFER_SIZE_OFFSET, file.max_chunk),
            (MOVI_SIZE_OFFSET, (movi_end - MOVI_OFFSET) as u32),
        ];
        for (offset, value) in patches {
            file.out.seek(SeekFrom::Start(offset))?;
            put_u32(&mut file.out, value)?;
        }
        file.out.flush()?;
        Ok(file.path)
    }
}

impl Default for AviMjpegWriter {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

/// Uncompressed frame size for `biSizeImage`, saturated to the field width.
fn frame_bytes(width: u32, height: u32) -> u32 {
    (u64::from(width) * u64::from(height) * 3).min(u64::from(u32::MAX)) as u32
}

fn put_u32(out: &mut impl Write, v: u32) -> std::io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

impl FrameEncoder for AviMjpegWriter {
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
        if width == 0 || height == 0 || width > u32::from(u16::MAX) || height > u32::from(u16::MAX) {
            return Err(EncoderError::InvalidParameters(format!(
                "frame size {width}x{height}"
            )));
        }

        // Never clobber an earlier recording
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let mut out = BufWriter::new(file);
        Self::write_headers(&mut out, width, height, fps)?;

        info!(
            "Opened {} ({}x{} @ {} fps, {})",
            path.display(),
            width,
            height,
            fps,
            fourcc
        );
        self.frames_written = 0;
        self.file = Some(OpenFile {
            path: path.to_path_buf(),
            out,
            width,
            height,
            fps,
            position: MOVI_OFFSET + 4,
            index: Vec::new(),
            max_chunk: 0,
        });
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.file.is_some()
    }

    fn input_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    fn write(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        let file = self.file.as_mut().ok_or(EncoderError::NotOpen)?;
        if frame.format() != PixelFormat::Rgb24 {
            return Err(EncoderError::UnsupportedFormat(frame.format()));
        }
        if (frame.width(), frame.height()) != (file.width, file.height) {
            return Err(EncoderError::SizeMismatch {
                width: file.width,
                height: file.height,
                got_width: frame.width(),
                got_height: frame.height(),
            });
        }

        self.jpeg.clear();
        JpegEncoder::new_with_quality(&mut self.jpeg, self.quality).encode(
            &frame.packed_rows(),
            file.width,
            file.height,
            ExtendedColorType::Rgb8,
        )?;

        // Chunk, its index entry and the idx1 header must all still fit
        let padded = self.jpeg.len() as u64 + self.jpeg.len() as u64 % 2;
        let finished = file.position + 8 + padded + 8 + (file.index.len() as u64 + 1) * 16;
        if finished > self.max_file_size {
            return Err(EncoderError::FileSizeLimit {
                limit: self.max_file_size,
            });
        }

        let size = self.jpeg.len() as u32;
        file.out.write_all(b"00dc")?;
        put_u32(&mut file.out, size)?;
        file.out.write_all(&self.jpeg)?;
        if size % 2 == 1 {
            file.out.write_all(&[0])?;
        }

        file.index.push(IndexEntry {
            offset: (file.position - MOVI_OFFSET) as u32,
            size,
        });
        file.position += 8 + u64::from(size + size % 2);
        file.max_chunk = file.max_chunk.max(size);
        self.frames_written += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<(), EncoderError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let frames = file.index.len();
        let path = Self::finish(file)?;
        debug!("Finalised {} with {} frames", path.display(), frames);
        Ok(())
    }
}

impl Drop for AviMjpegWriter {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to finalise recording: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn solid(width: u32, height: u32) -> Frame {
        Frame::new(vec![128u8; (width * height * 3) as usize], width, height, PixelFormat::Rgb24)
    }

    #[test]
    fn writes_consistent_riff_structure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        let mut writer = AviMjpegWriter::default();
        writer.open(&path, FourCc::MJPG, 30.0, (32, 16)).unwrap();
        for _ in 0..3 {
            writer.write(&solid(32, 16)).unwrap();
        }
        writer.release().unwrap();
        assert!(!writer.is_opened());

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(read_u32(&bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(&bytes[8..12], b"AVI ");
        assert_eq!(read_u32(&bytes, TOTAL_FRAMES_OFFSET as usize), 3);
        assert_eq!(read_u32(&bytes, STREAM_LENGTH_OFFSET as usize), 3);
        assert_eq!(read_u32(&bytes, 64), 32);
        assert_eq!(read_u32(&bytes, 68), 16);
        assert_eq!(&bytes[MOVI_OFFSET as usize..MOVI_OFFSET as usize + 4], b"movi");

        // first chunk is a JPEG
        let first = MOVI_OFFSET as usize + 4;
        assert_eq!(&bytes[first..first + 4], b"00dc");
        assert_eq!(&bytes[first + 8..first + 10], &[0xFF, 0xD8]);

        let movi_end = MOVI_OFFSET as usize + read_u32(&bytes, MOVI_SIZE_OFFSET as usize) as usize;
        assert_eq!(&bytes[movi_end..movi_end + 4], b"idx1");
        assert_eq!(read_u32(&bytes, movi_end + 4), 3 * 16);
        assert_eq!(read_u32(&bytes, movi_end + 16), 4);
    }

    #[test]
    fn rejects_other_codecs_and_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        let mut writer = AviMjpegWriter::default();
        assert!(matches!(
            writer.open(&path, FourCc::new(b"XVID"), 30.0, (32, 16)),
            Err(EncoderError::UnsupportedCodec(_))
        ));
        assert!(!writer.is_opened());

        writer.open(&path, FourCc::MJPG, 30.0, (32, 16)).unwrap();
        assert!(matches!(
            writer.write(&solid(16, 16)),
            Err(EncoderError::SizeMismatch { .. })
        ));
        assert_eq!(writer.frames_written(), 0);
    }

    #[test]
    fn open_fails_for_missing_directory() {
        let mut writer = AviMjpegWriter::default();
        let err = writer
            .open(Path::new("/nonexistent/dir/clip.avi"), FourCc::MJPG, 30.0, (32, 16))
            .unwrap_err();
        assert!(matches!(err, EncoderError::Io(_)));
        assert!(!writer.is_opened());
    }

    #[test]
    fn frames_past_the_size_limit_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        let mut writer = AviMjpegWriter::default().with_max_file_size(2048);
        writer.open(&path, FourCc::MJPG, 30.0, (32, 16)).unwrap();

        let mut refused = None;
        for _ in 0..100 {
            if let Err(e) = writer.write(&solid(32, 16)) {
                refused = Some(e);
                break;
            }
        }
        assert!(matches!(refused, Some(EncoderError::FileSizeLimit { limit: 2048 })));
        let written = writer.frames_written();
        assert!(written > 0);
        writer.release().unwrap();

        // the file stays a consistent, finalised AVI
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.len() as u64 <= 2048);
        assert_eq!(read_u32(&bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(u64::from(read_u32(&bytes, TOTAL_FRAMES_OFFSET as usize)), written);
    }

    #[test]
    fn largest_accepted_size_does_not_overflow_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.avi");
        let mut writer = AviMjpegWriter::default();
        let side = u32::from(u16::MAX);
        writer.open(&path, FourCc::MJPG, 30.0, (side, side)).unwrap();
        writer.release().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // biSizeImage in strf
        assert_eq!(read_u32(&bytes, 192), u32::MAX);
    }

    #[test]
    fn existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        std::fs::write(&path, b"keep").unwrap();

        let mut writer = AviMjpegWriter::default();
        let err = writer.open(&path, FourCc::MJPG, 30.0, (32, 16)).unwrap_err();
        assert!(matches!(err, EncoderError::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep");
    }

    #[test]
    fn write_without_open_fails() {
        let mut writer = AviMjpegWriter::default();
        assert!(matches!(writer.write(&solid(4, 4)), Err(EncoderError::NotOpen)));
        assert!(writer.release().is_ok());
    }
}
