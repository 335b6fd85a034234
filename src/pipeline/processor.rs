//! Per-tick frame processing: color normalisation, detection, overlays.

use chrono::{DateTime, Local};
use tracing::{instrument, trace, warn};

use super::overlay;
use super::recorder::Recorder;
use super::state::ProcessingState;
use crate::capture::decode::{decode_frame, frame_from_rgb, gray_to_rgb, rgb_to_gray};
use crate::capture::Frame;
use crate::detect::RegionDetector;
use crate::utils::overlay_timestamp;

/// Turns raw frames into display frames and keeps a private copy of the latest one.
pub struct FrameProcessor {
    detector: Box<dyn RegionDetector>,
    last_frame: Option<Frame>,
}

impl FrameProcessor {
    pub fn new(detector: Box<dyn RegionDetector>) -> Self {
        Self {
            detector,
            last_frame: None,
        }
    }

    /// Most recent fully processed frame, without the recording label.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    pub fn detector(&self) -> &dyn RegionDetector {
        self.detector.as_ref()
    }

    pub fn process(
        &mut self,
        raw: Option<Frame>,
        state: ProcessingState,
        recorder: &mut Recorder,
    ) -> Option<Frame> {
        self.process_at(raw, state, recorder, Local::now())
    }

    /// Processes one tick as of `now`.
    ///
    /// An empty input short-circuits: no overlays, no last-frame update and no recorder write.
    #[instrument(skip_all, fields(seq = tracing::field::Empty))]
    pub fn process_at(
        &mut self,
        raw: Option<Frame>,
        state: ProcessingState,
        recorder: &mut Recorder,
        now: DateTime<Local>,
    ) -> Option<Frame> {
        let raw = raw.filter(|f| !f.is_empty())?;
        let sequence = raw.meta.sequence;
        tracing::Span::current().record("seq", sequence);

        let mut image = match decode_frame(&raw) {
            Ok(image) => image,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                return None;
            }
        };
        drop(raw);

        if state.gray_mode {
            image = gray_to_rgb(&rgb_to_gray(&image));
        }

        if state.detection {
            // Derived independently of the display conversion above
            let gray = rgb_to_gray(&image);
            let regions = self.detector.detect(&gray);
            trace!("{} regions", regions.len());
            overlay::draw_regions(&mut image, &regions);
        }

        overlay::draw_timestamp(&mut image, &overlay_timestamp(&now));

        let retained = frame_from_rgb(image.clone(), sequence);
        recorder.write(&retained);
        self.last_frame = Some(retained);

        if recorder.is_active() {
            overlay::draw_recording_label(&mut image);
        }

        Some(frame_from_rgb(image, sequence))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::TimeZone;
    use image::GrayImage;

    use super::*;
    use crate::capture::PixelFormat;
    use crate::detect::Region;
    use crate::encode::AviMjpegWriter;

    /// Detector returning a fixed region.
    struct FixedDetector {
        region: Region,
    }

    impl RegionDetector for FixedDetector {
        fn load_model(&mut self, _: &Path) -> bool {
            true
        }

        fn is_loaded(&self) -> bool {
            true
        }

        fn detect(&mut self, gray: &GrayImage) -> Vec<Region> {
            assert!(gray.width() > 0);
            vec![self.region]
        }
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 13, 45, 10).unwrap()
    }

    fn gray_bgr(width: u32, height: u32, v: u8) -> Frame {
        Frame::new(
            vec![v; (width * height * 3) as usize],
            width,
            height,
            PixelFormat::Bgr24,
        )
    }

    fn processor() -> FrameProcessor {
        FrameProcessor::new(Box::new(FixedDetector {
            region: Region::new(60, 60, 40, 40),
        }))
    }

    fn idle_recorder() -> Recorder {
        Recorder::new(Box::new(AviMjpegWriter::default()), ".")
    }

    #[test]
    fn empty_input_changes_nothing() {
        let mut processor = processor();
        let mut recorder = idle_recorder();
        for gray_mode in [false, true] {
            for detection in [false, true] {
                let state = ProcessingState {
                    gray_mode,
                    detection,
                };
                assert!(processor.process_at(None, state, &mut recorder, at()).is_none());
                let empty = Frame::new(Vec::new(), 0, 0, PixelFormat::Bgr24);
                assert!(processor
                    .process_at(Some(empty), state, &mut recorder, at())
                    .is_none());
            }
        }
        assert!(processor.last_frame().is_none());
    }

    #[test]
    fn color_frames_are_reordered_to_rgb() {
        let mut processor = processor();
        let mut recorder = idle_recorder();
        let raw = Frame::new(
            [10u8, 20, 30].repeat(200 * 100),
            200,
            100,
            PixelFormat::Bgr24,
        );
        let out = processor
            .process_at(Some(raw), ProcessingState::default(), &mut recorder, at())
            .unwrap();
        assert_eq!(out.format(), PixelFormat::Rgb24);
        // bottom-right corner is free of overlays
        let i = ((99 * 200 + 199) * 3) as usize;
        assert_eq!(&out.data[i..i + 3], &[30, 20, 10]);
    }

    #[test]
    fn gray_toggle_only_changes_conversion() {
        // neutral input: both conversions agree, so outputs must match byte for byte
        let mut processor = processor();
        let mut recorder = idle_recorder();
        let mut outputs = Vec::new();
        for gray_mode in [false, true] {
            let state = ProcessingState {
                gray_mode,
                detection: true,
            };
            let out = processor
                .process_at(Some(gray_bgr(160, 120, 90)), state, &mut recorder, at())
                .unwrap();
            outputs.push(out.data.clone());
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn gray_mode_keeps_three_channels() {
        let mut processor = processor();
        let mut recorder = idle_recorder();
        let raw = Frame::new([0u8, 0, 255].repeat(64 * 64), 64, 64, PixelFormat::Bgr24);
        let state = ProcessingState {
            gray_mode: true,
            detection: false,
        };
        let out = processor.process_at(Some(raw), state, &mut recorder, at()).unwrap();
        assert_eq!(out.channels(), 3);
        let px = &out.data[out.data.len() - 3..];
        assert!(px[0] == px[1] && px[1] == px[2]);
    }

    #[test]
    fn detection_draws_region_outline() {
        let mut processor = processor();
        let mut recorder = idle_recorder();
        let state = ProcessingState {
            gray_mode: false,
            detection: true,
        };
        let out = processor
            .process_at(Some(gray_bgr(160, 120, 90)), state, &mut recorder, at())
            .unwrap();
        // left edge of the region at (60, 80)
        let i = ((80 * 160 + 60) * 3) as usize;
        assert_eq!(&out.data[i..i + 3], &[255, 0, 0]);
    }

    #[test]
    fn last_frame_is_an_independent_copy() {
        let mut processor = processor();
        let mut recorder = idle_recorder();
        let out = processor
            .process_at(
                Some(gray_bgr(64, 48, 40)),
                ProcessingState::default(),
                &mut recorder,
                at(),
            )
            .unwrap();
        let last = processor.last_frame().unwrap();
        assert_eq!(last.data, out.data);
        assert_ne!(last.data.as_ptr(), out.data.as_ptr());
    }
}
