//! Pipeline lifecycle states and terminal outcomes.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Exit code reported by the OS; `None` when the process died from a signal.
pub type ExitCode = Option<i32>;

/// Exit code the playback stage must report for the encoder to run.
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// One of the two external stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Playback Dolphin renders the replay to dump files
    Playback,
    /// FFmpeg muxes the dump files into the output
    Encoder,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Playback => "playback",
            Stage::Encoder => "encoder",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value carried by the pipeline's single "done" event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum Termination {
    /// The last stage that ran exited with this code
    Exited(ExitCode),
    /// Killed or timed out; no determinate exit code
    Aborted,
}

impl Termination {
    pub fn is_success(&self) -> bool {
        matches!(self, Termination::Exited(Some(SUCCESS_EXIT_CODE)))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Termination::Aborted)
    }

    /// Exit code of the last stage, if it exited normally.
    pub fn code(&self) -> ExitCode {
        match self {
            Termination::Exited(code) => *code,
            Termination::Aborted => None,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(Some(code)) => write!(f, "exited with code {}", code),
            Termination::Exited(None) => f.write_str("terminated by signal"),
            Termination::Aborted => f.write_str("aborted"),
        }
    }
}

/// Pipeline state machine.
///
/// `Idle → PlaybackRunning → EncodingRunning → Done`, or
/// `Idle → PlaybackRunning → Failed`, or any non-terminal state `→ Killed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "state", content = "code", rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    PlaybackRunning,
    EncodingRunning,
    /// Encoder exited (with any code)
    Done(ExitCode),
    /// Playback exited with a non-success code
    Failed(ExitCode),
    Killed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::PlaybackRunning => "playback_running",
            PipelineState::EncodingRunning => "encoding_running",
            PipelineState::Done(_) => "done",
            PipelineState::Failed(_) => "failed",
            PipelineState::Killed => "killed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Done(_) | PipelineState::Failed(_) | PipelineState::Killed
        )
    }

    /// Outcome reported by the "done" event, for terminal states.
    pub fn termination(&self) -> Option<Termination> {
        match self {
            PipelineState::Done(code) | PipelineState::Failed(code) => {
                Some(Termination::Exited(*code))
            }
            PipelineState::Killed => Some(Termination::Aborted),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!PipelineState::Idle.is_terminal());
        assert!(!PipelineState::PlaybackRunning.is_terminal());
        assert!(!PipelineState::EncodingRunning.is_terminal());
        assert!(PipelineState::Done(Some(0)).is_terminal());
        assert!(PipelineState::Failed(Some(1)).is_terminal());
        assert!(PipelineState::Killed.is_terminal());
    }

    #[test]
    fn test_termination_from_state() {
        assert_eq!(
            PipelineState::Failed(Some(1)).termination(),
            Some(Termination::Exited(Some(1)))
        );
        assert_eq!(PipelineState::Killed.termination(), Some(Termination::Aborted));
        assert_eq!(PipelineState::EncodingRunning.termination(), None);
    }

    #[test]
    fn test_aborted_is_distinct_from_exit_codes() {
        assert!(Termination::Exited(Some(0)).is_success());
        assert!(!Termination::Exited(Some(1)).is_success());
        assert!(!Termination::Exited(None).is_success());
        assert!(!Termination::Aborted.is_success());
        assert_ne!(Termination::Aborted, Termination::Exited(None));
        assert_eq!(Termination::Aborted.to_string(), "aborted");
    }

    #[test]
    fn test_termination_serialization() {
        let json = serde_json::to_string(&Termination::Exited(Some(1))).unwrap();
        assert_eq!(json, r#"{"kind":"exited","code":1}"#);
        let json = serde_json::to_string(&Termination::Aborted).unwrap();
        assert_eq!(json, r#"{"kind":"aborted"}"#);
    }
}
