//! FFmpeg progress parsing.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use slpvid_models::ProgressWindow;

use crate::process::{OutputScraper, OutputStream, ScrapeAction};

/// Progress information from FFmpeg's `-progress` stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncoderProgress {
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

/// What one `-progress` line changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Output time advanced
    OutTime,
    /// `progress=end` was reported
    Finished,
}

/// Parse a line from FFmpeg's `-progress` output into `current`.
pub fn parse_progress_line(line: &str, current: &mut EncoderProgress) -> Option<ProgressUpdate> {
    let (key, value) = line.trim().split_once('=')?;

    match key {
        "out_time_us" => {
            // microseconds; out_time_ms carries the same value on current builds
            let us: i64 = value.trim().parse().ok()?;
            current.out_time_ms = us / 1000;
            Some(ProgressUpdate::OutTime)
        }
        "speed" => {
            // Format: "1.5x" or "N/A"
            if let Some(speed) = value.trim().strip_suffix('x').and_then(|s| s.parse().ok()) {
                current.speed = speed;
            }
            None
        }
        "progress" if value.trim() == "end" => {
            current.is_complete = true;
            Some(ProgressUpdate::Finished)
        }
        _ => None,
    }
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Duration:\s*(?:(?:(\d+):)?(\d+):)?(\d+(?:\.\d+)?)").expect("valid regex")
    })
}

/// Parse the input duration from an FFmpeg log line, in milliseconds.
///
/// Matches `Duration: [[HH:]MM:]SS[.ff]`; lines such as `Duration: N/A`
/// yield `None`.
pub fn parse_duration_marker(line: &str) -> Option<i64> {
    let caps = duration_regex().captures(line)?;

    let hours: f64 = caps.get(1).map_or(Ok(0.0), |m| m.as_str().parse()).ok()?;
    let minutes: f64 = caps.get(2).map_or(Ok(0.0), |m| m.as_str().parse()).ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;

    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    Some((total * 1000.0).round() as i64)
}

/// Turns FFmpeg output into encoder progress windows (milliseconds of output).
///
/// `end` is first estimated from the longest input duration minus the start
/// cutoff, then fixed to the final output time once `progress=end` is seen.
#[derive(Debug, Default)]
pub struct EncoderScraper {
    cutoff_ms: i64,
    progress: EncoderProgress,
    discovered_end: Option<i64>,
    final_end: Option<i64>,
}

impl EncoderScraper {
    pub fn new(cutoff_secs: f64) -> Self {
        Self {
            cutoff_ms: (cutoff_secs.max(0.0) * 1000.0).round() as i64,
            ..Default::default()
        }
    }

    /// Best known end of the output, in milliseconds.
    pub fn end(&self) -> Option<i64> {
        self.final_end.or(self.discovered_end)
    }

    pub fn progress(&self) -> &EncoderProgress {
        &self.progress
    }

    fn window(&self) -> ProgressWindow {
        ProgressWindow::new(0, self.progress.out_time_ms, self.end())
    }

    fn scrape_log(&mut self, line: &str) -> Option<ScrapeAction> {
        if self.final_end.is_some() {
            return None;
        }

        let duration = (parse_duration_marker(line)? - self.cutoff_ms).max(0);
        if self.discovered_end.is_some_and(|end| end >= duration) {
            return None;
        }

        self.discovered_end = Some(duration);
        Some(ScrapeAction::Progress(self.window()))
    }

    fn scrape_progress(&mut self, line: &str) -> Option<ScrapeAction> {
        match parse_progress_line(line, &mut self.progress)? {
            ProgressUpdate::OutTime => {}
            ProgressUpdate::Finished => {
                self.final_end = Some(self.progress.out_time_ms.max(0));
            }
        }
        Some(ScrapeAction::Progress(self.window()))
    }
}

impl OutputScraper for EncoderScraper {
    fn scrape(&mut self, stream: OutputStream, line: &str) -> Option<ScrapeAction> {
        match stream {
            OutputStream::Stdout => self.scrape_progress(line),
            OutputStream::Stderr => self.scrape_log(line),
        }
    }
}
