//! Periodic driver tying source, processor, display and recorder together.
//!
//! Ticks and commands run on one task: `run` selects over the tick interval and the command
//! channel, so a command always completes before the next tick starts. `Pipeline` is not `Sync`
//! and owns all shared state, which keeps that invariant without locks.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::processor::FrameProcessor;
use super::recorder::{Recorder, RecordingSummary};
use super::snapshot::SnapshotWriter;
use super::state::{Command, PipelineEvent, ProcessingState, SessionState};
use crate::capture::FrameSource;
use crate::detect::RegionDetector;
use crate::display::DisplaySink;
use crate::encode::FrameEncoder;
use crate::error::{PipelineError, Result};
use crate::{PipelineConfig, PipelineStats};

pub const DEVICE_UNAVAILABLE_STATUS: &str = "Camera cannot be opened.";
pub const STOPPED_STATUS: &str = "Camera stopped";

pub struct Pipeline {
    source: Box<dyn FrameSource>,
    processor: FrameProcessor,
    recorder: Recorder,
    snapshots: SnapshotWriter,
    display: Box<dyn DisplaySink>,
    processing: ProcessingState,
    capturing: bool,
    session: SessionState,
    period: Duration,
    recording_fps: f64,
    events: Option<Sender<PipelineEvent>>,
    stats: PipelineStats,
}

impl Pipeline {
    /// Builds the pipeline and opens the camera. Ticking starts with [`Command::StartCamera`].
    pub fn new(
        config: &PipelineConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn RegionDetector>,
        encoder: Box<dyn FrameEncoder>,
        display: Box<dyn DisplaySink>,
    ) -> Self {
        let mut pipeline = Self {
            source,
            processor: FrameProcessor::new(detector),
            recorder: Recorder::new(encoder, &config.output_dir),
            snapshots: SnapshotWriter::new(&config.output_dir),
            display,
            processing: ProcessingState::default(),
            capturing: false,
            session: SessionState::Idle,
            period: Duration::from_millis(config.tick_period_ms.max(1)),
            recording_fps: config.recording_fps,
            events: None,
            stats: PipelineStats::default(),
        };

        if !pipeline.source.open() {
            warn!("Camera unavailable at startup");
            pipeline.display.show_status(DEVICE_UNAVAILABLE_STATUS);
        }
        pipeline
    }

    /// Returns a channel of state notifications. A later call replaces the earlier subscriber.
    pub fn subscribe(&mut self) -> Receiver<PipelineEvent> {
        let (tx, rx) = flume::unbounded();
        self.events = Some(tx);
        rx
    }

    pub fn session_state(&self) -> SessionState {
        self.session
    }

    pub fn processing_state(&self) -> ProcessingState {
        self.processing
    }

    pub fn processor(&self) -> &FrameProcessor {
        &self.processor
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn source(&self) -> &dyn FrameSource {
        self.source.as_ref()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Applies a user command. `Quit` is handled by [`run`](Self::run) and is a no-op here.
    pub fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::StartCamera => self.start_camera(),
            Command::StopCamera => {
                self.stop_camera();
                Ok(())
            }
            Command::ToggleGray => {
                self.processing.gray_mode = !self.processing.gray_mode;
                self.processing_changed();
                Ok(())
            }
            Command::ToggleDetect => {
                self.processing.detection = !self.processing.detection;
                self.processing_changed();
                Ok(())
            }
            Command::SaveSnapshot => self.save_snapshot().map(drop),
            Command::StartRecording => self.start_recording().map(drop),
            Command::StopRecording => {
                self.stop_recording();
                Ok(())
            }
            Command::Quit => Ok(()),
        }
    }

    /// Starts ticking. Only succeeds once the source is confirmed open; repeated starts are no-ops.
    pub fn start_camera(&mut self) -> Result<()> {
        if self.capturing {
            return Ok(());
        }
        if !self.source.open() {
            warn!("Camera cannot be opened");
            self.display.show_status(DEVICE_UNAVAILABLE_STATUS);
            self.emit(PipelineEvent::Status(DEVICE_UNAVAILABLE_STATUS.to_string()));
            return Err(PipelineError::DeviceUnavailable);
        }
        let (width, height) = self.source.reported_resolution();
        info!("Camera started at {}x{}", width, height);
        self.capturing = true;
        self.update_session();
        Ok(())
    }

    /// Halts ticking, then finalises any recording and releases the camera.
    pub fn stop_camera(&mut self) {
        // No tick may observe the released handle
        self.capturing = false;
        self.stop_recording();
        self.source.release();

        if self.processing.gray_mode {
            self.processing.gray_mode = false;
            self.processing_changed();
        }
        self.display.show_status(STOPPED_STATUS);
        self.emit(PipelineEvent::Status(STOPPED_STATUS.to_string()));
        self.update_session();
        info!("Camera stopped");
    }

    /// Opens a recording at the camera's reported resolution.
    pub fn start_recording(&mut self) -> Result<PathBuf> {
        if !self.capturing || !self.source.is_open() {
            warn!("Cannot record while the camera is stopped");
            return Err(PipelineError::DeviceUnavailable);
        }
        let was_active = self.recorder.is_active();
        let size = self.source.reported_resolution();
        let path = self.recorder.start(size, self.recording_fps)?;
        if !was_active {
            self.emit(PipelineEvent::RecordingStarted(path.clone()));
        }
        self.update_session();
        Ok(path)
    }

    pub fn stop_recording(&mut self) -> Option<RecordingSummary> {
        let summary = self.recorder.stop()?;
        self.emit(PipelineEvent::RecordingFinished {
            path: summary.path.clone(),
            frames: summary.frames,
        });
        self.update_session();
        Some(summary)
    }

    pub fn save_snapshot(&mut self) -> Result<PathBuf> {
        match self.snapshots.save(self.processor.last_frame()) {
            Ok(path) => {
                self.emit(PipelineEvent::SnapshotSaved(path.clone()));
                Ok(path)
            }
            Err(e) => {
                warn!("Snapshot failed: {}", e);
                Err(e)
            }
        }
    }

    /// Runs one cycle: read, process, show. Returns whether a frame was shown.
    pub fn tick(&mut self) -> bool {
        if !self.capturing {
            return false;
        }
        debug_assert!(self.source.is_open(), "tick on a released source");

        let start = Instant::now();
        let raw = self.source.read();
        let Some(frame) = self
            .processor
            .process(raw, self.processing, &mut self.recorder)
        else {
            self.stats.dropped_frames += 1;
            metrics::counter!("facecam_dropped_frames").increment(1);
            debug!("Skipping tick: {}", PipelineError::EmptyFrame);
            return false;
        };

        self.display.show(&frame);

        let elapsed = start.elapsed();
        self.stats.record_tick(elapsed);
        metrics::histogram!("facecam_tick_us").record(elapsed.as_micros() as f64);
        true
    }

    /// Drives ticks and commands until `Quit` arrives or every command sender is gone.
    pub async fn run(&mut self, commands: Receiver<Command>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Pipeline running with a {:?} period", self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.display.poll();
                    self.tick();
                }
                command = commands.recv_async() => match command {
                    Ok(Command::Quit) | Err(_) => break,
                    Ok(command) => {
                        debug!("Command {:?}", command);
                        if let Err(e) = self.handle(command) {
                            warn!("{:?} failed: {}", command, e);
                        }
                    }
                },
            }
        }

        self.shutdown();
        info!(
            "Pipeline finished: {} frames shown, {} dropped",
            self.stats.frames_shown, self.stats.dropped_frames
        );
    }

    /// Stops everything without touching the display.
    fn shutdown(&mut self) {
        self.capturing = false;
        self.stop_recording();
        self.source.release();
        self.update_session();
    }

    fn processing_changed(&mut self) {
        info!(
            "Gray mode {}, detection {}",
            on_off(self.processing.gray_mode),
            on_off(self.processing.detection)
        );
        if self.processing.detection && !self.processor.detector().is_loaded() {
            warn!("Detection enabled but no model is loaded; no regions will be reported");
        }
        self.emit(PipelineEvent::ProcessingChanged(self.processing));
    }

    fn update_session(&mut self) {
        let next = match (self.capturing, self.recorder.is_active()) {
            (false, _) => SessionState::Idle,
            (true, false) => SessionState::Capturing,
            (true, true) => SessionState::Recording,
        };
        if next != self.session {
            debug!("Session {:?} -> {:?}", self.session, next);
            self.session = next;
            self.emit(PipelineEvent::StateChanged(next));
        }
    }

    fn emit(&mut self, event: PipelineEvent) {
        let disconnected = match &self.events {
            Some(tx) => tx.send(event).is_err(),
            None => false,
        };
        if disconnected {
            self.events = None;
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}
