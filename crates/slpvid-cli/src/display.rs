//! Terminal progress for the playback and encoding stages.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use slpvid_media::{ConversionPipeline, OutputSink, OutputStream};
use slpvid_models::{ms_to_timestamp, ExitCode, ProgressWindow, Termination};

const BAR_TEMPLATE: &str =
    "{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {prefix} [{elapsed_precise}] {msg}";
const TICK: Duration = Duration::from_millis(120);

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(SPINNER_TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn stage_bar(prefix: &'static str) -> ProgressBar {
    let bar = ProgressBar::hidden();
    bar.set_style(spinner_style());
    bar.set_prefix(prefix);
    bar
}

/// Size the bar once the stage knows where it ends.
fn update_bar(bar: &ProgressBar, window: ProgressWindow, message: String) {
    let position = window.completed().max(0) as u64;
    if let Some(total) = window.total() {
        let total = total.max(0) as u64;
        if bar.length() != Some(total) {
            bar.set_style(bar_style());
            bar.set_length(total);
        }
    }
    bar.set_position(position);
    bar.set_message(message);
}

fn frame_message(window: ProgressWindow) -> String {
    match window.total() {
        Some(total) => format!("frame {}/{}", window.completed(), total),
        None => format!("frame {}/?", window.completed()),
    }
}

fn encoder_message(window: ProgressWindow) -> String {
    let current = ms_to_timestamp(window.current.max(0) as u64);
    match window.end {
        Some(end) => format!("{} / {}", current, ms_to_timestamp(end.max(0) as u64)),
        None => current,
    }
}

/// Progress bars for both stages, plus the per-stage exit messages.
///
/// With bars disabled (verbose mode prints raw stage output instead) only the
/// exit messages are shown.
pub struct ProgressDisplay {
    multi: MultiProgress,
    playback: ProgressBar,
    encoder: ProgressBar,
}

impl ProgressDisplay {
    pub fn new(show_bars: bool) -> Self {
        let target = if show_bars {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let multi = MultiProgress::with_draw_target(target);

        let playback = multi.add(stage_bar("rendering frames"));
        playback.set_message("opening playback dolphin");
        playback.enable_steady_tick(TICK);

        Self {
            multi,
            playback,
            encoder: stage_bar("rendering output"),
        }
    }

    /// Register the display's listeners on a pipeline that has not started.
    pub fn attach(&self, pipeline: &ConversionPipeline) {
        let bar = self.playback.clone();
        pipeline.on_playback_progress(move |window: ProgressWindow| {
            update_bar(&bar, window, frame_message(window));
        });

        let bar = self.playback.clone();
        let encoder = self.encoder.clone();
        let multi = self.multi.clone();
        pipeline.on_playback_exit(move |code: ExitCode| {
            if code == Some(0) {
                bar.finish_with_message("dolphin process finished");
                let encoder = multi.add(encoder.clone());
                encoder.set_message("starting ffmpeg");
                encoder.enable_steady_tick(TICK);
            } else {
                bar.abandon_with_message(exit_summary(code));
                multi.suspend(|| {
                    eprintln!(
                        "dolphin exited abnormally. This may be due to an invalid SLP or ISO file"
                    )
                });
            }
        });

        let bar = self.encoder.clone();
        pipeline.on_encoder_progress(move |window: ProgressWindow| {
            update_bar(&bar, window, encoder_message(window));
        });

        let bar = self.encoder.clone();
        let multi = self.multi.clone();
        pipeline.on_encoder_exit(move |code: ExitCode| {
            if code == Some(0) {
                bar.finish_with_message("done!");
            } else {
                bar.abandon_with_message(exit_summary(code));
                multi.suspend(|| eprintln!("ffmpeg exited abnormally"));
            }
        });
    }

    /// Settle any bar still running and report an aborted run.
    pub fn finish(&self, termination: Termination) {
        for bar in [&self.playback, &self.encoder] {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
        if termination.is_aborted() {
            self.multi.suspend(|| eprintln!("aborted"));
        }
    }
}

fn exit_summary(code: ExitCode) -> String {
    match code {
        Some(code) => format!("exited with code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Echo raw stage output to the matching standard stream.
pub fn raw_output_sink() -> OutputSink {
    Arc::new(|stream: OutputStream, line: &str| match stream {
        OutputStream::Stdout => println!("{}", line),
        OutputStream::Stderr => eprintln!("{}", line),
    })
}
