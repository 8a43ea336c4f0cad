//! Logger
//!
//! Owns the capture source and the writer thread, and manages the logging
//! lifecycle. All public operations take `&self` and may be called from
//! any thread while capture is running.

use super::encoder::EncodeError;
use super::events::{event_channel, EventReceiver, EventSender, LoggerEvent};
use super::pipeline::{run_writer, WriterContext, WriterOutcome, STALL_TIMEOUT};
use super::segment::{SegmentTotals, SegmentWriter};
use super::state::{ConfigError, LoggerConfig, LoggerStatus, SessionSummary, StopReason};
use crate::capture::{AudioSource, CaptureError, SampleSink, CAPTURE_QUEUE_BLOCKS};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Logger errors
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("already logging")]
    AlreadyLogging,

    #[error("not logging")]
    NotLogging,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("output folder {path:?} is not accessible: {source}")]
    OutputFolder {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("encoder error: {0}")]
    Encoder(#[from] EncodeError),

    #[error("failed to start writer thread: {0}")]
    Thread(std::io::Error),
}

pub type LoggerResult<T> = Result<T, LoggerError>;

/// State shared with the writer thread
pub(crate) struct Shared {
    status: RwLock<LoggerStatus>,
    pub(crate) events: EventSender,
}

impl Shared {
    /// Move to `to`, firing the status event. No-op when already there,
    /// so racing stop/failure paths produce a single event.
    pub(crate) fn transition(&self, to: LoggerStatus, reason: Option<StopReason>) -> bool {
        let mut status = self.status.write();
        if *status == to {
            return false;
        }
        *status = to;
        // Sent under the lock so event order always matches status order
        self.events.send(LoggerEvent::StatusChanged { status: to, reason });
        true
    }
}

struct ActiveSession {
    id: Uuid,
    config: LoggerConfig,
    started_at: DateTime<Local>,
    stop: Arc<AtomicBool>,
    writer: JoinHandle<WriterOutcome>,
}

impl ActiveSession {
    /// Wait for the writer to exit and summarize the session
    fn join(self, shared: &Shared) -> SessionSummary {
        let outcome = self.writer.join().unwrap_or_else(|_| {
            let message = "writer thread panicked".to_string();
            shared.transition(
                LoggerStatus::NotLogging,
                Some(StopReason::Failed(message.clone())),
            );
            WriterOutcome {
                totals: SegmentTotals::default(),
                failure: Some(message),
                dropped_blocks: 0,
            }
        });

        let dropped_blocks = outcome.dropped_blocks;
        if dropped_blocks > 0 {
            tracing::warn!(
                "Session {} dropped {} capture block(s) while the writer was behind",
                self.id,
                dropped_blocks
            );
        }

        SessionSummary {
            id: self.id,
            started_at: self.started_at,
            ended_at: Local::now(),
            segments: outcome.totals.segments,
            frames_written: outcome.totals.frames_written,
            dropped_blocks,
            reason: match outcome.failure {
                Some(message) => StopReason::Failed(message),
                None => StopReason::UserRequested,
            },
        }
    }
}

struct Control {
    source: Box<dyn AudioSource>,
    session: Option<ActiveSession>,
}

/// Continuous audio logger
pub struct Logger {
    shared: Arc<Shared>,
    control: Mutex<Control>,
    stall_timeout: Duration,
}

impl Logger {
    /// Create a logger capturing from `source`.
    ///
    /// The returned receiver is the only listener for the logger's events.
    pub fn new(source: Box<dyn AudioSource>) -> (Self, EventReceiver) {
        let (events, receiver) = event_channel();
        let logger = Self {
            shared: Arc::new(Shared {
                status: RwLock::new(LoggerStatus::NotLogging),
                events,
            }),
            control: Mutex::new(Control {
                source,
                session: None,
            }),
            stall_timeout: STALL_TIMEOUT,
        };
        (logger, receiver)
    }

    #[cfg(test)]
    pub(crate) fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Get the current status
    pub fn current_status(&self) -> LoggerStatus {
        *self.shared.status.read()
    }

    pub fn is_logging(&self) -> bool {
        self.current_status().is_logging()
    }

    /// Configuration of the running session
    pub fn active_config(&self) -> Option<LoggerConfig> {
        if !self.is_logging() {
            return None;
        }
        self.control.lock().session.as_ref().map(|s| s.config.clone())
    }

    /// Identifier of the running session
    pub fn session_id(&self) -> Option<Uuid> {
        if !self.is_logging() {
            return None;
        }
        self.control.lock().session.as_ref().map(|s| s.id)
    }

    /// Name of the capture source
    pub fn source_name(&self) -> String {
        self.control.lock().source.name().to_string()
    }

    /// Start logging with a snapshot of `config`
    pub fn start(&self, config: LoggerConfig) -> LoggerResult<()> {
        let mut control = self.control.lock();
        if self.is_logging() {
            return Err(LoggerError::AlreadyLogging);
        }
        self.reap(&mut control);

        config.validate()?;
        ensure_writable(&config.folder)?;

        let (sink, samples) = SampleSink::channel(CAPTURE_QUEUE_BLOCKS);
        let stream = control.source.start(sink)?;

        let started_at = Local::now();
        let writer = match SegmentWriter::open(&config, stream, started_at) {
            Ok(writer) => writer,
            Err(e) => {
                control.source.stop();
                return Err(e.into());
            }
        };
        let first_segment = writer.current_path().map(Path::to_path_buf);

        let id = Uuid::new_v4();
        let stop = Arc::new(AtomicBool::new(false));

        // Status first: nothing from this session may precede it
        self.shared.transition(LoggerStatus::Logging, None);
        if let Some(path) = first_segment {
            self.shared.events.send(LoggerEvent::SegmentStarted(path));
        }

        let ctx = WriterContext {
            config: config.clone(),
            stream,
            samples,
            stop: stop.clone(),
            stall_timeout: self.stall_timeout,
            writer,
            shared: self.shared.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("shocklog-writer".to_string())
            .spawn(move || run_writer(ctx));

        let writer = match handle {
            Ok(handle) => handle,
            Err(e) => {
                control.source.stop();
                self.shared.transition(
                    LoggerStatus::NotLogging,
                    Some(StopReason::Failed(format!("failed to start writer thread: {}", e))),
                );
                return Err(LoggerError::Thread(e));
            }
        };

        tracing::info!(
            "Logging started: session {} from {} to {:?} ({} kbit/s {:?}, {}s segments)",
            id,
            control.source.name(),
            config.folder,
            config.bitrate,
            config.format,
            config.segment_length.as_secs()
        );

        control.session = Some(ActiveSession {
            id,
            config,
            started_at,
            stop,
            writer,
        });
        Ok(())
    }

    /// Stop logging, finalizing the open segment
    pub fn stop(&self) -> LoggerResult<SessionSummary> {
        let mut control = self.control.lock();
        if !self.is_logging() {
            self.reap(&mut control);
            return Err(LoggerError::NotLogging);
        }
        let session = control.session.take().ok_or(LoggerError::NotLogging)?;

        tracing::info!("Stopping logging session {}", session.id);

        // Flag first, so the writer reads the end of capture as a stop
        session.stop.store(true, Ordering::SeqCst);
        control.source.stop();
        let summary = session.join(&self.shared);

        self.shared
            .transition(LoggerStatus::NotLogging, Some(StopReason::UserRequested));

        tracing::info!(
            "Logging stopped: {} segment(s), {} frames",
            summary.segments.len(),
            summary.frames_written
        );
        Ok(summary)
    }

    /// Clean up a session that ended on its own
    fn reap(&self, control: &mut Control) {
        if let Some(session) = control.session.take() {
            control.source.stop();
            let summary = session.join(&self.shared);
            tracing::info!(
                "Collected ended session {}: {} segment(s), reason {:?}",
                summary.id,
                summary.segments.len(),
                summary.reason
            );
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if self.is_logging() {
            if let Err(e) = self.stop() {
                tracing::warn!("Failed to stop logger on shutdown: {}", e);
            }
        } else {
            let mut control = self.control.lock();
            self.reap(&mut control);
        }
    }
}

/// Create the output folder and check that files can be written to it
fn ensure_writable(folder: &Path) -> LoggerResult<()> {
    let to_err = |source| LoggerError::OutputFolder {
        path: folder.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(folder).map_err(to_err)?;
    let probe = folder.join(format!(".shocklog-{}", Uuid::new_v4()));
    std::fs::write(&probe, b"").map_err(to_err)?;
    std::fs::remove_file(&probe).map_err(to_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{ScriptHandle, ScriptedSource};
    use crate::recorder::encoder::OutputFormat;
    use crate::recorder::state::LevelSample;
    use std::time::{Duration, Instant};
    use tempfile::{tempdir, TempDir};

    const RATE: u32 = 8000;

    fn wav_config(folder: &Path) -> LoggerConfig {
        LoggerConfig {
            bitrate: 128,
            segment_length: Duration::from_secs(3600),
            folder: folder.to_path_buf(),
            organise_folder: false,
            delete_old: false,
            retention: Duration::ZERO,
            format: OutputFormat::Wav,
            align_segments: false,
        }
    }

    fn setup() -> (Logger, EventReceiver, ScriptHandle, TempDir) {
        let (source, handle) = ScriptedSource::new(RATE, 2);
        let (logger, events) = Logger::new(Box::new(source));
        (logger, events, handle, tempdir().unwrap())
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn status_events(events: &[LoggerEvent]) -> Vec<(LoggerStatus, Option<StopReason>)> {
        events
            .iter()
            .filter_map(|e| match e {
                LoggerEvent::StatusChanged { status, reason } => Some((*status, reason.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_stop_cycles_track_status() {
        let (logger, mut events, handle, dir) = setup();
        assert_eq!(logger.current_status(), LoggerStatus::NotLogging);

        for cycle in 0..3 {
            logger.start(wav_config(dir.path())).unwrap();
            assert_eq!(logger.current_status(), LoggerStatus::Logging);
            assert!(handle.is_running());

            handle.push_frames(RATE as usize / 10, 0.5);
            let summary = logger.stop().unwrap();
            assert_eq!(logger.current_status(), LoggerStatus::NotLogging);
            assert!(!handle.is_running());
            assert_eq!(summary.reason, StopReason::UserRequested);
            assert_eq!(summary.segments.len(), 1);
            assert_eq!(summary.frames_written, RATE as u64 / 10);
            assert_eq!(handle.starts(), cycle + 1);
        }

        let statuses = status_events(&events.drain());
        assert_eq!(
            statuses,
            vec![
                (LoggerStatus::Logging, None),
                (LoggerStatus::NotLogging, Some(StopReason::UserRequested)),
                (LoggerStatus::Logging, None),
                (LoggerStatus::NotLogging, Some(StopReason::UserRequested)),
                (LoggerStatus::Logging, None),
                (LoggerStatus::NotLogging, Some(StopReason::UserRequested)),
            ]
        );
    }

    #[test]
    fn test_guards_reject_double_start_and_idle_stop() {
        let (logger, mut events, _handle, dir) = setup();
        assert!(matches!(logger.stop(), Err(LoggerError::NotLogging)));

        logger.start(wav_config(dir.path())).unwrap();
        assert!(matches!(
            logger.start(wav_config(dir.path())),
            Err(LoggerError::AlreadyLogging)
        ));
        assert_eq!(logger.current_status(), LoggerStatus::Logging);
        logger.stop().unwrap();

        // Rejected calls fire no events
        assert_eq!(status_events(&events.drain()).len(), 2);
    }

    #[test]
    fn test_levels_only_between_status_events() {
        let (logger, mut events, handle, dir) = setup();
        logger.start(wav_config(dir.path())).unwrap();
        // 0.5s of audio = 10 level windows
        for _ in 0..5 {
            handle.push_frames(RATE as usize / 10, 0.25);
        }
        logger.stop().unwrap();

        // Pushing after stop goes nowhere
        assert!(!handle.push_frames(100, 0.9));

        let all = events.drain();
        let first_status = all
            .iter()
            .position(|e| matches!(e, LoggerEvent::StatusChanged { .. }))
            .unwrap();
        let last_status = all
            .iter()
            .rposition(|e| matches!(e, LoggerEvent::StatusChanged { .. }))
            .unwrap();
        assert_eq!(first_status, 0);
        assert_eq!(last_status, all.len() - 1);

        let levels: Vec<LevelSample> = all
            .iter()
            .filter_map(|e| match e {
                LoggerEvent::Level(level) => Some(*level),
                _ => None,
            })
            .collect();
        assert!(!levels.is_empty());
        assert!(levels.iter().all(|l| l.left == 0.25 && l.right == 0.25));
    }

    #[test]
    fn test_segment_events_bracket_the_file() {
        let (logger, mut events, handle, dir) = setup();
        logger.start(wav_config(dir.path())).unwrap();
        handle.push_frames(800, 0.1);
        let summary = logger.stop().unwrap();

        let all = events.drain();
        let started: Vec<&PathBuf> = all
            .iter()
            .filter_map(|e| match e {
                LoggerEvent::SegmentStarted(p) => Some(p),
                _ => None,
            })
            .collect();
        let finished: Vec<&PathBuf> = all
            .iter()
            .filter_map(|e| match e {
                LoggerEvent::SegmentFinished(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(started, finished);
        assert_eq!(started[0], &summary.segments[0]);

        let reader = hound::WavReader::open(&summary.segments[0]).unwrap();
        assert_eq!(reader.duration(), 800);
    }

    #[test]
    fn test_capture_failure_forces_not_logging() {
        let (logger, mut events, handle, dir) = setup();
        logger.start(wav_config(dir.path())).unwrap();
        handle.push_frames(400, 0.3);
        handle.fail("device unplugged");

        wait_until("failure transition", || !logger.is_logging());

        let statuses = status_events(&events.drain());
        assert_eq!(
            statuses,
            vec![
                (LoggerStatus::Logging, None),
                (
                    LoggerStatus::NotLogging,
                    Some(StopReason::Failed("device unplugged".to_string()))
                ),
            ]
        );

        // The audio captured before the failure was kept
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);

        // Stop after a failure is rejected, and a fresh start works
        assert!(matches!(logger.stop(), Err(LoggerError::NotLogging)));
        assert!(!handle.is_running());
        logger.start(wav_config(dir.path())).unwrap();
        assert!(logger.is_logging());
        logger.stop().unwrap();
        assert_eq!(status_events(&events.drain()).len(), 2);
    }

    #[test]
    fn test_stop_racing_a_failure_fires_one_event() {
        let (logger, mut events, handle, dir) = setup();
        const CYCLES: usize = 20;

        for _ in 0..CYCLES {
            logger.start(wav_config(dir.path())).unwrap();
            handle.push_frames(80, 0.2);
            handle.fail("device unplugged");
            // Either the stop or the failure wins; both end the session
            match logger.stop() {
                Ok(_) | Err(LoggerError::NotLogging) => {}
                Err(e) => panic!("unexpected stop error: {}", e),
            }
            assert_eq!(logger.current_status(), LoggerStatus::NotLogging);
            assert!(!handle.is_running());
        }

        let statuses = status_events(&events.drain());
        assert_eq!(statuses.len(), CYCLES * 2);
        for pair in statuses.chunks(2) {
            assert_eq!(pair[0], (LoggerStatus::Logging, None));
            assert_eq!(pair[1].0, LoggerStatus::NotLogging);
            assert!(pair[1].1.is_some());
        }
    }

    #[test]
    fn test_silent_source_is_a_failure() {
        let (source, handle) = ScriptedSource::new(RATE, 2);
        let (logger, mut events) = Logger::new(Box::new(source));
        let logger = logger.with_stall_timeout(Duration::from_millis(200));
        let dir = tempdir().unwrap();

        logger.start(wav_config(dir.path())).unwrap();
        handle.push_frames(80, 0.2);
        wait_until("stall detection", || !logger.is_logging());

        let statuses = status_events(&events.drain());
        assert_eq!(statuses.len(), 2);
        match &statuses[1] {
            (LoggerStatus::NotLogging, Some(StopReason::Failed(message))) => {
                assert!(message.contains("no audio received"), "{}", message);
            }
            other => panic!("unexpected status event: {:?}", other),
        }
        assert!(matches!(logger.stop(), Err(LoggerError::NotLogging)));
        assert!(!handle.is_running());
    }

    #[test]
    fn test_start_failures_leave_status_untouched() {
        let (logger, mut events, handle, dir) = setup();

        // Output folder path is a file
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let err = logger.start(wav_config(&blocker.join("sub"))).unwrap_err();
        assert!(matches!(err, LoggerError::OutputFolder { .. }));

        // No input device
        handle.fail_next_start(CaptureError::NoDevice);
        let err = logger.start(wav_config(dir.path())).unwrap_err();
        assert!(matches!(err, LoggerError::Capture(CaptureError::NoDevice)));

        // Invalid configuration
        let mut cfg = wav_config(dir.path());
        cfg.segment_length = Duration::ZERO;
        assert!(matches!(logger.start(cfg), Err(LoggerError::Config(_))));

        assert_eq!(logger.current_status(), LoggerStatus::NotLogging);
        assert!(events.drain().is_empty());
        assert!(!handle.is_running());
    }

    #[test]
    fn test_config_is_a_start_time_snapshot() {
        let (logger, _events, handle, dir) = setup();
        let mut config = wav_config(dir.path());
        logger.start(config.clone()).unwrap();
        let original = config.clone();

        config.bitrate = 320;
        config.folder = dir.path().join("elsewhere");
        config.segment_length = Duration::from_secs(1);

        assert_eq!(logger.active_config(), Some(original));
        let id = logger.session_id().unwrap();
        handle.push_frames(100, 0.1);
        let summary = logger.stop().unwrap();
        assert_eq!(summary.id, id);
        assert_eq!(logger.session_id(), None);
        assert!(summary.segments[0].starts_with(dir.path()));
        assert!(!dir.path().join("elsewhere").exists());
        assert_eq!(logger.active_config(), None);
    }

    #[test]
    fn test_status_readable_from_other_threads() {
        let (logger, _events, _handle, dir) = setup();
        let logger = Arc::new(logger);
        logger.start(wav_config(dir.path())).unwrap();

        let reader = {
            let logger = logger.clone();
            std::thread::spawn(move || logger.current_status())
        };
        assert_eq!(reader.join().unwrap(), LoggerStatus::Logging);
        logger.stop().unwrap();
    }

    #[test]
    fn test_retention_runs_when_enabled() {
        let (logger, _events, _handle, dir) = setup();
        let old = dir.path().join("2000-01-01_00-00-00.wav");
        let file = std::fs::File::create(&old).unwrap();
        file.set_modified(std::time::SystemTime::now() - Duration::from_secs(3 * 86400))
            .unwrap();
        drop(file);

        let mut config = wav_config(dir.path());
        config.delete_old = true;
        config.retention = Duration::from_secs(86400);
        logger.start(config).unwrap();

        wait_until("retention sweep", || !old.exists());
        let summary = logger.stop().unwrap();
        assert!(summary.segments[0].exists());
    }
}
