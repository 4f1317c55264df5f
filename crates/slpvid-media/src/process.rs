//! External process handle.
//!
//! Both pipeline stages are opaque child processes whose only IPC is their
//! text output and exit code. [`ProcessHandle::spawn`] hands the child to a
//! supervisor task that reports through a caller-supplied [`ProcessEvents`],
//! so listeners registered before the spawn see the very first line. The
//! supervisor:
//! - reads stdout/stderr line by line and feeds each line to an
//!   [`OutputScraper`], which turns recognised lines into progress events
//!   or a termination request
//! - forwards kill requests to the child
//! - enforces the per-stage timeout as a hard deadline
//! - reports the exit code exactly once

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use slpvid_models::{ExitCode, ProgressWindow, Stage};

use crate::error::{MediaError, MediaResult};
use crate::events::{Callback, Listeners, OnceListeners};

/// Time allowed for output to drain once the child has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Time a timed-out child gets to honour SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Callback for progress updates.
pub type ProgressCallback = Callback<ProgressWindow>;

/// Callback for process exit.
pub type ExitCallback = Callback<ExitCode>;

/// Receives every raw output line of a child process.
pub type OutputSink = Arc<dyn Fn(OutputStream, &str) + Send + Sync>;

/// Output stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// How to terminate a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KillSignal {
    /// Ask the process to shut down (SIGTERM on unix)
    #[default]
    Terminate,
    /// Kill the process outright
    Kill,
}

/// What a scraped output line asks the supervisor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeAction {
    Progress(ProgressWindow),
    /// The process is finished but will not exit on its own
    Terminate,
}

/// Turns lines of child output into structured actions.
///
/// Lines that match nothing return `None`; unrecognised output is normal.
pub trait OutputScraper: Send + 'static {
    fn scrape(&mut self, stream: OutputStream, line: &str) -> Option<ScrapeAction>;
}

/// Uniform contract over a running external stage.
pub trait ExternalProcess: Send + Sync {
    /// Register an exit listener; it is invoked exactly once.
    fn on_exit(&self, callback: ExitCallback);

    /// Register a progress listener.
    fn on_progress(&self, callback: ProgressCallback);

    /// Request termination. No-op once the process has exited.
    fn kill(&self, signal: KillSignal);

    fn has_exited(&self) -> bool;
}

/// Prepares and spawns one pipeline stage.
pub trait StageLauncher: Send + Sync {
    fn stage(&self) -> Stage;

    /// Spawn the stage, reporting through `events`.
    ///
    /// Errors are pre-flight failures (e.g. spawn errors); a stage that runs
    /// and fails reports it through its exit code.
    fn launch(&self, events: Arc<ProcessEvents>) -> MediaResult<Arc<dyn ExternalProcess>>;
}

/// Event fan-out shared by every [`ExternalProcess`] implementation.
///
/// Created before the process is launched so listeners can be attached first.
#[derive(Default)]
pub struct ProcessEvents {
    progress: Listeners<ProgressWindow>,
    exit: OnceListeners<ExitCode>,
}

impl ProcessEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(&self, callback: ProgressCallback) {
        self.progress.add(callback);
    }

    pub fn on_exit(&self, callback: ExitCallback) {
        self.exit.add(callback);
    }

    pub fn emit_progress(&self, window: ProgressWindow) {
        self.progress.emit(window);
    }

    /// Report the exit code. Returns `false` if an exit was already reported.
    pub fn emit_exit(&self, code: ExitCode) -> bool {
        self.exit.fire(code)
    }

    pub fn has_exited(&self) -> bool {
        self.exit.has_fired()
    }

    pub fn exit_code(&self) -> Option<ExitCode> {
        self.exit.value()
    }
}

/// Spawn options shared by both stages.
#[derive(Clone, Default)]
pub struct SpawnOptions {
    /// Hard deadline for the process, measured from spawn
    pub timeout: Option<Duration>,
    /// Raw passthrough of every output line
    pub output_sink: Option<OutputSink>,
}

/// Handle to a supervised child process.
#[derive(Clone)]
pub struct ProcessHandle {
    stage: Stage,
    pid: Option<u32>,
    events: Arc<ProcessEvents>,
    kill_tx: mpsc::UnboundedSender<KillSignal>,
}

impl ProcessHandle {
    /// Spawn `command` and supervise it on a tokio task.
    ///
    /// Listeners already registered on `events` receive every event. Must be
    /// called from within a tokio runtime.
    pub fn spawn(
        stage: Stage,
        mut command: Command,
        scraper: impl OutputScraper,
        events: Arc<ProcessEvents>,
        options: SpawnOptions,
    ) -> MediaResult<Self> {
        let program = command.as_std().get_program().to_string_lossy().to_string();

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| MediaError::spawn_failed(&program, e))?;

        let pid = child.id();
        info!(stage = %stage, pid = ?pid, "Spawned {}", program);

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            stage,
            child,
            scraper: Box::new(scraper),
            events: Arc::clone(&events),
            kill_rx,
            options,
        };
        tokio::spawn(supervisor.run());

        Ok(Self {
            stage,
            pid,
            events,
            kill_tx,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit code, once the process has exited.
    pub fn exit_code(&self) -> Option<ExitCode> {
        self.events.exit_code()
    }
}

impl ExternalProcess for ProcessHandle {
    fn on_exit(&self, callback: ExitCallback) {
        self.events.on_exit(callback);
    }

    fn on_progress(&self, callback: ProgressCallback) {
        self.events.on_progress(callback);
    }

    fn kill(&self, signal: KillSignal) {
        if self.events.has_exited() {
            return;
        }
        // The supervisor drops its receiver once the child is gone.
        let _ = self.kill_tx.send(signal);
    }

    fn has_exited(&self) -> bool {
        self.events.has_exited()
    }
}

type LineReader<R> = Split<BufReader<R>>;

struct Supervisor {
    stage: Stage,
    child: Child,
    scraper: Box<dyn OutputScraper>,
    events: Arc<ProcessEvents>,
    kill_rx: mpsc::UnboundedReceiver<KillSignal>,
    options: SpawnOptions,
}

impl Supervisor {
    async fn run(mut self) {
        let mut stdout = self.child.stdout.take().map(|s| BufReader::new(s).split(b'\n'));
        let mut stderr = self.child.stderr.take().map(|s| BufReader::new(s).split(b'\n'));

        let mut deadline = self.options.timeout.map(|t| Instant::now() + t);
        let mut timed_out = false;
        let mut status: Option<ExitStatus> = None;
        let mut exited = false;
        let mut drain_deadline: Option<Instant> = None;

        loop {
            if exited && stdout.is_none() && stderr.is_none() {
                break;
            }

            tokio::select! {
                result = self.child.wait(), if !exited => {
                    exited = true;
                    drain_deadline = Some(Instant::now() + OUTPUT_DRAIN_GRACE);
                    match result {
                        Ok(s) => status = Some(s),
                        Err(e) => warn!(stage = %self.stage, "Failed to wait for process: {}", e),
                    }
                }
                line = next_line(&mut stdout), if stdout.is_some() => match line {
                    Some(line) => self.handle_line(OutputStream::Stdout, &line),
                    None => stdout = None,
                },
                line = next_line(&mut stderr), if stderr.is_some() => match line {
                    Some(line) => self.handle_line(OutputStream::Stderr, &line),
                    None => stderr = None,
                },
                Some(signal) = self.kill_rx.recv(), if !exited => {
                    debug!(stage = %self.stage, ?signal, "Kill requested");
                    self.signal(signal);
                }
                _ = sleep_until_opt(deadline), if deadline.is_some() && !exited => {
                    if timed_out {
                        warn!(stage = %self.stage, "Process ignored SIGTERM, killing");
                        self.signal(KillSignal::Kill);
                        deadline = None;
                    } else {
                        timed_out = true;
                        warn!(
                            stage = %self.stage,
                            timeout_ms = self.options.timeout.map(|t| t.as_millis() as u64),
                            "Process timed out, terminating"
                        );
                        self.signal(KillSignal::Terminate);
                        deadline = Some(Instant::now() + TERMINATE_GRACE);
                    }
                }
                _ = sleep_until_opt(drain_deadline), if drain_deadline.is_some() => {
                    debug!(stage = %self.stage, "Output still open after exit, closing");
                    break;
                }
            }
        }

        self.kill_rx.close();

        let code = status.and_then(|s| s.code());
        match code {
            Some(0) => info!(stage = %self.stage, "Process exited successfully"),
            Some(code) => warn!(stage = %self.stage, code, "Process exited with non-zero code"),
            None => warn!(stage = %self.stage, "Process terminated without an exit code"),
        }

        self.events.emit_exit(code);
    }

    fn handle_line(&mut self, stream: OutputStream, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches(['\r', '\n']);

        if let Some(sink) = &self.options.output_sink {
            sink(stream, line);
        }
        trace!(stage = %self.stage, ?stream, "{}", line);

        match self.scraper.scrape(stream, line) {
            Some(ScrapeAction::Progress(window)) => self.events.emit_progress(window),
            Some(ScrapeAction::Terminate) => {
                debug!(stage = %self.stage, "Process reported completion, terminating");
                self.signal(KillSignal::Terminate);
            }
            None => {}
        }
    }

    fn signal(&mut self, signal: KillSignal) {
        #[cfg(unix)]
        {
            if signal == KillSignal::Terminate {
                if let Some(pid) = self.child.id() {
                    use nix::sys::signal::{kill, Signal};
                    use nix::unistd::Pid;

                    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                        warn!(stage = %self.stage, "Failed to send SIGTERM: {}", e);
                    }
                    return;
                }
            }
        }

        if let Err(e) = self.child.start_kill() {
            debug!(stage = %self.stage, "Failed to kill process: {}", e);
        }
    }
}

async fn next_line<R>(reader: &mut Option<LineReader<R>>) -> Option<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.next_segment().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FrameScraper;

    impl OutputScraper for FrameScraper {
        fn scrape(&mut self, stream: OutputStream, line: &str) -> Option<ScrapeAction> {
            if stream != OutputStream::Stdout {
                return None;
            }
            if line == "finished" {
                return Some(ScrapeAction::Terminate);
            }
            let current = line.strip_prefix("frame ")?.parse().ok()?;
            Some(ScrapeAction::Progress(ProgressWindow::new(0, current, Some(3))))
        }
    }

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    async fn wait_exit(handle: &ProcessHandle) -> ExitCode {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.on_exit(Arc::new(move |code: ExitCode| {
            let _ = tx.send(code);
        }));
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("process did not exit in time")
            .expect("exit channel closed")
    }

    #[test]
    fn test_process_events_exit_once() {
        let events = ProcessEvents::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        events.on_exit(Arc::new(move |_: ExitCode| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(events.emit_exit(Some(0)));
        assert!(!events.emit_exit(Some(1)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(events.exit_code(), Some(Some(0)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_and_exit_code_forwarded() {
        let events = Arc::new(ProcessEvents::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.on_progress(Arc::new(move |window: ProgressWindow| {
            sink.lock().unwrap().push(window.current);
        }));

        let handle = ProcessHandle::spawn(
            Stage::Playback,
            shell("echo 'frame 1'; echo noise; echo 'frame 2'; exit 3"),
            FrameScraper,
            events,
            SpawnOptions::default(),
        )
        .unwrap();

        assert_eq!(wait_exit(&handle).await, Some(3));
        assert!(handle.has_exited());
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_line_reaches_listener_registered_before_spawn() {
        for _ in 0..20 {
            let events = Arc::new(ProcessEvents::new());
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            events.on_progress(Arc::new(move |window: ProgressWindow| {
                sink.lock().unwrap().push(window.current);
            }));

            let handle = ProcessHandle::spawn(
                Stage::Encoder,
                shell("echo 'frame 1'"),
                FrameScraper,
                events,
                SpawnOptions::default(),
            )
            .unwrap();

            assert_eq!(wait_exit(&handle).await, Some(0));
            assert_eq!(*seen.lock().unwrap(), vec![1]);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_action_stops_process() {
        let handle = ProcessHandle::spawn(
            Stage::Playback,
            shell("echo finished; exec sleep 30"),
            FrameScraper,
            Arc::default(),
            SpawnOptions::default(),
        )
        .unwrap();

        // killed by SIGTERM: no exit code
        assert_eq!(wait_exit(&handle).await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_terminates_process() {
        let handle = ProcessHandle::spawn(
            Stage::Encoder,
            shell("exec sleep 30"),
            FrameScraper,
            Arc::default(),
            SpawnOptions {
                timeout: Some(Duration::from_millis(100)),
                output_sink: None,
            },
        )
        .unwrap();

        let started = std::time::Instant::now();
        assert_eq!(wait_exit(&handle).await, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let handle = ProcessHandle::spawn(
            Stage::Encoder,
            shell("exec sleep 30"),
            FrameScraper,
            Arc::default(),
            SpawnOptions::default(),
        )
        .unwrap();

        handle.kill(KillSignal::Kill);
        handle.kill(KillSignal::Terminate);
        assert_eq!(wait_exit(&handle).await, None);

        // after exit, further kills are no-ops
        handle.kill(KillSignal::Kill);
        handle.kill(KillSignal::Terminate);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_sink_receives_both_streams() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let collected = Arc::clone(&lines);
        let sink: OutputSink = Arc::new(move |stream: OutputStream, line: &str| {
            collected.lock().unwrap().push((stream, line.to_string()));
        });

        let handle = ProcessHandle::spawn(
            Stage::Encoder,
            shell("echo out; echo err 1>&2"),
            FrameScraper,
            Arc::default(),
            SpawnOptions {
                timeout: None,
                output_sink: Some(sink),
            },
        )
        .unwrap();

        assert_eq!(wait_exit(&handle).await, Some(0));
        let lines = lines.lock().unwrap();
        assert!(lines.contains(&(OutputStream::Stdout, "out".to_string())));
        assert!(lines.contains(&(OutputStream::Stderr, "err".to_string())));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let result = ProcessHandle::spawn(
            Stage::Playback,
            Command::new("/definitely/not/a/real/binary"),
            FrameScraper,
            Arc::default(),
            SpawnOptions::default(),
        );
        assert!(matches!(result, Err(MediaError::SpawnFailed { .. })));
    }
}
