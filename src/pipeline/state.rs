use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Per-frame processing toggles, read once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingState {
    pub gray_mode: bool,
    pub detection: bool,
}

/// Lifecycle of a capture session.
///
/// `Idle` → `Capturing` on a successful camera start, `Capturing` ⇄ `Recording` while the encoder
/// is open, and back to `Idle` when the camera stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Recording,
}

/// Notifications for passive observers such as a UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged(SessionState),
    ProcessingChanged(ProcessingState),
    Status(String),
    SnapshotSaved(PathBuf),
    RecordingStarted(PathBuf),
    RecordingFinished { path: PathBuf, frames: u64 },
}

/// User commands. They only mutate state; processing happens on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartCamera,
    StopCamera,
    ToggleGray,
    ToggleDetect,
    SaveSnapshot,
    StartRecording,
    StopRecording,
    Quit,
}

#[derive(Debug, Error)]
#[error("unknown command {0:?} (expected start, stop, gray, detect, snap, rec, stoprec or quit)")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::StartCamera),
            "stop" => Ok(Command::StopCamera),
            "gray" | "grey" => Ok(Command::ToggleGray),
            "detect" => Ok(Command::ToggleDetect),
            "snap" | "snapshot" => Ok(Command::SaveSnapshot),
            "rec" | "record" => Ok(Command::StartRecording),
            "stoprec" => Ok(Command::StopRecording),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!(" Start ".parse::<Command>().unwrap(), Command::StartCamera);
        assert_eq!("GRAY".parse::<Command>().unwrap(), Command::ToggleGray);
        assert_eq!("stoprec".parse::<Command>().unwrap(), Command::StopRecording);
        assert!("launch".parse::<Command>().is_err());
    }
}
