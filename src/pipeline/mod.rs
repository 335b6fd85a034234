pub mod driver;
pub mod overlay;
pub mod processor;
pub mod recorder;
pub mod snapshot;
pub mod state;

pub use driver::Pipeline;
pub use processor::FrameProcessor;
pub use recorder::{Recorder, RecordingSummary, RECORDING_FPS};
pub use snapshot::SnapshotWriter;
pub use state::{Command, PipelineEvent, ProcessingState, SessionState};
