//! Stage progress windows.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Progress of one pipeline stage.
///
/// Units depend on the stage: replay frames for playback, milliseconds of
/// output for the encoder. `end` stays `None` until the stage learns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressWindow {
    pub start: i64,
    pub current: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl ProgressWindow {
    pub fn new(start: i64, current: i64, end: Option<i64>) -> Self {
        Self {
            start,
            current: current.max(start),
            end,
        }
    }

    /// Units done since `start`.
    pub fn completed(&self) -> i64 {
        self.current - self.start
    }

    /// Units between `start` and `end`, once known.
    pub fn total(&self) -> Option<i64> {
        self.end.map(|end| end - self.start)
    }

    /// Completion fraction in `0.0..=1.0`; `None` while `end` is unknown.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total()?;
        if total <= 0 {
            return None;
        }
        Some((self.completed() as f64 / total as f64).clamp(0.0, 1.0))
    }

    /// Completion percentage; `None` while `end` is unknown.
    pub fn percent(&self) -> Option<f64> {
        self.fraction().map(|f| f * 100.0)
    }
}
