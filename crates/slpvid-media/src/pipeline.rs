//! Playback → encode pipeline orchestration.
//!
//! A [`ConversionPipeline`] runs one replay conversion: it spawns playback,
//! waits for it to exit, spawns the encoder if playback succeeded, and
//! reports a single terminal outcome. All sequencing decisions are made by
//! one actor task consuming a control channel, so a kill racing a stage
//! exit is resolved by arrival order and never spawns a stage on a killed
//! pipeline.

use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use slpvid_models::{
    ExitCode, PipelineState, ProgressWindow, RunConfig, RunId, Stage, Termination,
    SUCCESS_EXIT_CODE,
};

use crate::encoder::EncoderLauncher;
use crate::error::{MediaError, MediaResult};
use crate::events::{lock, Listeners, OnceListeners};
use crate::locate::BinaryLocator;
use crate::metadata::{ReplayMetadataReader, SlpMetadataReader};
use crate::metrics;
use crate::playback::PlaybackLauncher;
use crate::process::{ExternalProcess, KillSignal, OutputSink, ProcessEvents, StageLauncher};

/// Optional collaborators of a pipeline.
#[derive(Clone)]
pub struct PipelineOptions {
    /// Receives every raw output line of both stages
    pub output_sink: Option<OutputSink>,
    /// Source of the replay's last frame when no end frame is configured
    pub metadata_reader: Arc<dyn ReplayMetadataReader>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            output_sink: None,
            metadata_reader: Arc::new(SlpMetadataReader::new()),
        }
    }
}

#[derive(Default)]
struct PipelineEvents {
    playback_progress: Listeners<ProgressWindow>,
    playback_exit: OnceListeners<ExitCode>,
    encoder_progress: Listeners<ProgressWindow>,
    encoder_exit: OnceListeners<ExitCode>,
    done: OnceListeners<Termination>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    PlaybackExited(ExitCode),
    EncoderExited(ExitCode),
    Kill,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Nothing,
    SpawnEncoder,
    /// Reached a terminal state on a stage exit
    Finish,
    /// Reached `Killed`; running stages must be stopped
    Abort,
}

/// Pure pipeline state machine.
#[derive(Debug, Default)]
struct Sequencer {
    state: PipelineState,
}

impl Sequencer {
    fn playback_started(&mut self) {
        if self.state == PipelineState::Idle {
            self.state = PipelineState::PlaybackRunning;
        }
    }

    fn playback_exited(&mut self, code: ExitCode) -> Step {
        if self.state != PipelineState::PlaybackRunning {
            return Step::Nothing;
        }

        if code == Some(SUCCESS_EXIT_CODE) {
            self.state = PipelineState::EncodingRunning;
            Step::SpawnEncoder
        } else {
            self.state = PipelineState::Failed(code);
            Step::Finish
        }
    }

    fn encoder_exited(&mut self, code: ExitCode) -> Step {
        if self.state != PipelineState::EncodingRunning {
            return Step::Nothing;
        }
        self.state = PipelineState::Done(code);
        Step::Finish
    }

    fn kill(&mut self) -> Step {
        if self.state.is_terminal() {
            return Step::Nothing;
        }
        self.state = PipelineState::Killed;
        Step::Abort
    }
}

/// One replay → video conversion.
///
/// Register observers, call [`start`](Self::start), then
/// [`wait`](Self::wait) for the outcome. [`kill`](Self::kill) may be called
/// at any time and any number of times.
pub struct ConversionPipeline {
    run_id: RunId,
    timeout: Option<Duration>,
    playback: Arc<dyn StageLauncher>,
    encoder: Arc<dyn StageLauncher>,
    events: Arc<PipelineEvents>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
    state_tx: Arc<watch::Sender<PipelineState>>,
    state_rx: watch::Receiver<PipelineState>,
}

impl ConversionPipeline {
    /// Build a pipeline for `config`, resolving binaries through `locator`.
    pub fn new(config: RunConfig, locator: &dyn BinaryLocator) -> MediaResult<Self> {
        Self::with_options(config, locator, PipelineOptions::default())
    }

    /// Build a pipeline with explicit collaborators.
    ///
    /// Fails if a binary cannot be found, or if the replay or game image
    /// cannot be opened.
    pub fn with_options(
        config: RunConfig,
        locator: &dyn BinaryLocator,
        options: PipelineOptions,
    ) -> MediaResult<Self> {
        config.validate()?;

        let dolphin_path = match &config.dolphin_path {
            Some(path) if path.exists() => path.clone(),
            Some(_) => return Err(MediaError::PlaybackNotFound),
            None => locator.playback_binary().ok_or(MediaError::PlaybackNotFound)?,
        };
        let ffmpeg_path = match &config.ffmpeg_path {
            Some(path) if path.exists() => path.clone(),
            Some(_) => return Err(MediaError::FfmpegNotFound),
            None => locator.encoder_binary().ok_or(MediaError::FfmpegNotFound)?,
        };

        for path in [&config.input_file, &config.melee_iso] {
            File::open(path).map_err(|_| MediaError::FileNotFound(path.clone()))?;
        }

        let run_id = RunId::new();
        let padded = config.padded_start();
        info!(
            run_id = %run_id,
            dolphin = %dolphin_path.display(),
            ffmpeg = %ffmpeg_path.display(),
            start_frame = ?padded.map(|p| p.start_frame),
            cutoff_secs = ?padded.map(|p| p.cutoff_secs),
            "Configured conversion"
        );

        let playback =
            PlaybackLauncher::from_config(dolphin_path, &config, options.metadata_reader.as_ref())
                .with_output_sink(options.output_sink.clone());

        let encoder = EncoderLauncher::new(
            ffmpeg_path,
            playback.video_dump_path(),
            playback.audio_dump_path(),
            &config.output_file,
        )
        .with_volume(config.volume)
        .with_start_cutoff(padded.map_or(0.0, |p| p.cutoff_secs))
        .with_timeout(config.ffmpeg_timeout)
        .with_output_sink(options.output_sink);

        Ok(Self::with_launchers(
            run_id,
            Arc::new(playback),
            Arc::new(encoder),
            config.timeout,
        ))
    }

    /// Build a pipeline over arbitrary stage launchers.
    pub fn with_launchers(
        run_id: RunId,
        playback: Arc<dyn StageLauncher>,
        encoder: Arc<dyn StageLauncher>,
        timeout: Option<Duration>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);

        Self {
            run_id,
            timeout,
            playback,
            encoder,
            events: Arc::new(PipelineEvents::default()),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            state_tx: Arc::new(state_tx),
            state_rx,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn on_playback_progress(&self, callback: impl Fn(ProgressWindow) + Send + Sync + 'static) {
        self.events.playback_progress.add(Arc::new(callback));
    }

    pub fn on_playback_exit(&self, callback: impl Fn(ExitCode) + Send + Sync + 'static) {
        self.events.playback_exit.add(Arc::new(callback));
    }

    pub fn on_encoder_progress(&self, callback: impl Fn(ProgressWindow) + Send + Sync + 'static) {
        self.events.encoder_progress.add(Arc::new(callback));
    }

    pub fn on_encoder_exit(&self, callback: impl Fn(ExitCode) + Send + Sync + 'static) {
        self.events.encoder_exit.add(Arc::new(callback));
    }

    /// Register for the terminal outcome. Fires exactly once; registering
    /// after the pipeline finished invokes `callback` immediately.
    pub fn on_done(&self, callback: impl Fn(Termination) + Send + Sync + 'static) {
        self.events.done.add(Arc::new(callback));
    }

    /// Spawn playback and hand sequencing to a background task.
    ///
    /// Must be called from within a tokio runtime, at most once.
    pub fn start(&self) -> MediaResult<()> {
        let mut control_rx = lock(&self.control_rx)
            .take()
            .ok_or(MediaError::AlreadyStarted)?;

        let span = info_span!("pipeline", run_id = %self.run_id);
        let entered = span.enter();
        let started_at = Instant::now();

        let mut sequencer = Sequencer::default();

        while let Ok(control) = control_rx.try_recv() {
            if control == Control::Kill {
                sequencer.kill();
                info!("Killed before start");
                finish(&self.events, &self.state_tx, sequencer.state, started_at);
                return Ok(());
            }
        }

        let playback_events = Arc::new(ProcessEvents::new());
        relay(
            &playback_events,
            Stage::Playback,
            &self.events,
            &self.control_tx,
        );

        let playback = match self.playback.launch(playback_events) {
            Ok(process) => process,
            Err(e) => {
                metrics::record_launch_failure(Stage::Playback);
                error!("Failed to start playback: {}", e);
                return Err(e);
            }
        };

        sequencer.playback_started();
        self.state_tx.send_replace(sequencer.state);

        let actor = Actor {
            control_rx,
            control_tx: self.control_tx.clone(),
            sequencer,
            playback,
            encoder: None,
            encoder_launcher: Arc::clone(&self.encoder),
            events: Arc::clone(&self.events),
            state_tx: Arc::clone(&self.state_tx),
            deadline: self.timeout.map(|t| started_at + t),
            started_at,
        };

        drop(entered);
        tokio::spawn(actor.run().instrument(span));
        Ok(())
    }

    /// Abort the pipeline. Safe to call any number of times, before or
    /// after [`start`](Self::start); only the first call has an effect.
    pub fn kill(&self) {
        // The actor is gone once the pipeline finished.
        let _ = self.control_tx.send(Control::Kill);
    }

    pub fn state(&self) -> PipelineState {
        *self.state_rx.borrow()
    }

    /// Wait for the terminal outcome.
    ///
    /// Only resolves for a pipeline whose [`start`](Self::start) succeeded.
    pub async fn wait(&self) -> Termination {
        let mut state_rx = self.state_rx.clone();
        loop {
            let termination = state_rx.borrow_and_update().termination();
            if let Some(termination) = termination {
                return termination;
            }
            if state_rx.changed().await.is_err() {
                return self.events.done.value().unwrap_or(Termination::Aborted);
            }
        }
    }
}

/// Forward a stage's events to the pipeline observers and the actor.
///
/// Called before the stage launches so no early event is missed.
fn relay(
    stage_events: &ProcessEvents,
    stage: Stage,
    events: &Arc<PipelineEvents>,
    control_tx: &mpsc::UnboundedSender<Control>,
) {
    let progress_events = Arc::clone(events);
    stage_events.on_progress(Arc::new(move |window: ProgressWindow| match stage {
        Stage::Playback => progress_events.playback_progress.emit(window),
        Stage::Encoder => progress_events.encoder_progress.emit(window),
    }));

    let exit_events = Arc::clone(events);
    let control_tx = control_tx.clone();
    stage_events.on_exit(Arc::new(move |code: ExitCode| {
        metrics::record_stage_exit(stage, code);
        let control = match stage {
            Stage::Playback => {
                exit_events.playback_exit.fire(code);
                Control::PlaybackExited(code)
            }
            Stage::Encoder => {
                exit_events.encoder_exit.fire(code);
                Control::EncoderExited(code)
            }
        };
        let _ = control_tx.send(control);
    }));
}

/// Fire "done" and publish the terminal state, in that order.
fn finish(
    events: &PipelineEvents,
    state_tx: &watch::Sender<PipelineState>,
    state: PipelineState,
    started_at: Instant,
) {
    let Some(termination) = state.termination() else {
        return;
    };

    let elapsed = started_at.elapsed();
    match termination {
        Termination::Exited(Some(SUCCESS_EXIT_CODE)) => {
            info!(elapsed_ms = elapsed.as_millis() as u64, "Conversion finished")
        }
        _ => warn!(
            state = state.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Conversion {}",
            termination
        ),
    }

    events.done.fire(termination);
    state_tx.send_replace(state);
    metrics::record_pipeline(state, elapsed);
}

struct Actor {
    control_rx: mpsc::UnboundedReceiver<Control>,
    control_tx: mpsc::UnboundedSender<Control>,
    sequencer: Sequencer,
    playback: Arc<dyn ExternalProcess>,
    encoder: Option<Arc<dyn ExternalProcess>>,
    encoder_launcher: Arc<dyn StageLauncher>,
    events: Arc<PipelineEvents>,
    state_tx: Arc<watch::Sender<PipelineState>>,
    deadline: Option<Instant>,
    started_at: Instant,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let control = tokio::select! {
                control = self.control_rx.recv() => match control {
                    Some(control) => control,
                    None => break,
                },
                _ = sleep_until_opt(self.deadline), if self.deadline.is_some() => {
                    self.deadline = None;
                    Control::TimedOut
                }
            };

            debug!(?control, state = self.sequencer.state.as_str(), "Pipeline event");

            let step = match control {
                Control::PlaybackExited(code) => self.sequencer.playback_exited(code),
                Control::EncoderExited(code) => self.sequencer.encoder_exited(code),
                Control::Kill => self.sequencer.kill(),
                Control::TimedOut => {
                    warn!("Pipeline timed out");
                    self.sequencer.kill()
                }
            };

            match step {
                Step::Nothing => {}
                Step::SpawnEncoder => self.spawn_encoder(),
                Step::Finish => {
                    finish(&self.events, &self.state_tx, self.sequencer.state, self.started_at);
                    break;
                }
                Step::Abort => {
                    self.playback.kill(KillSignal::Terminate);
                    if let Some(encoder) = &self.encoder {
                        encoder.kill(KillSignal::Terminate);
                    }
                    finish(&self.events, &self.state_tx, self.sequencer.state, self.started_at);
                    break;
                }
            }
        }
    }

    fn spawn_encoder(&mut self) {
        let encoder_events = Arc::new(ProcessEvents::new());
        relay(&encoder_events, Stage::Encoder, &self.events, &self.control_tx);

        match self.encoder_launcher.launch(encoder_events) {
            Ok(encoder) => {
                self.state_tx.send_replace(self.sequencer.state);
                self.encoder = Some(encoder);
            }
            Err(e) => {
                metrics::record_launch_failure(Stage::Encoder);
                error!("Failed to start encoder: {}", e);
                // Report as an encoder that exited without a code.
                self.events.encoder_exit.fire(None);
                let _ = self.control_tx.send(Control::EncoderExited(None));
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
