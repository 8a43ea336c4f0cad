//! Writer thread
//!
//! Drains the capture queue, feeds the level meter and the segment writer,
//! and triggers retention sweeps. Any unrecoverable error ends the session:
//! the open segment is finalized where possible and the logger is forced
//! back to `NotLogging`.

use super::events::LoggerEvent;
use super::logger::Shared;
use super::meter::LevelMeter;
use super::retention::RetentionPolicy;
use super::segment::{SegmentEvent, SegmentTotals, SegmentWriter};
use super::state::{LoggerConfig, LoggerStatus, StopReason};
use crate::capture::{CaptureMessage, SampleQueue, StreamFormat};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// How often the writer wakes up when no audio arrives
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Silence from the capture thread longer than this ends the session
pub const STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// What the writer thread hands back when it exits
pub(crate) struct WriterOutcome {
    pub totals: SegmentTotals,
    pub failure: Option<String>,
    pub dropped_blocks: u64,
}

pub(crate) struct WriterContext {
    pub config: LoggerConfig,
    pub stream: StreamFormat,
    pub samples: SampleQueue,
    pub stop: Arc<AtomicBool>,
    /// Silence longer than this ends the session
    pub stall_timeout: Duration,
    pub writer: SegmentWriter,
    pub shared: Arc<Shared>,
}

/// Runs retention sweeps off the writer thread, one at a time
struct Sweeper {
    root: PathBuf,
    policy: Arc<RetentionPolicy>,
    busy: Arc<AtomicBool>,
}

impl Sweeper {
    fn new(config: &LoggerConfig) -> Option<Self> {
        config.delete_old.then(|| Self {
            root: config.folder.clone(),
            policy: Arc::new(RetentionPolicy::new(config.retention)),
            busy: Arc::new(AtomicBool::new(false)),
        })
    }

    fn trigger(&self, keep: Option<PathBuf>) {
        if self.busy.swap(true, Ordering::SeqCst) {
            tracing::debug!("Retention sweep already running");
            return;
        }
        let root = self.root.clone();
        let policy = self.policy.clone();
        let busy = self.busy.clone();
        let spawned = std::thread::Builder::new()
            .name("shocklog-retention".to_string())
            .spawn(move || {
                if let Err(e) = policy.sweep(&root, SystemTime::now(), keep.as_deref()) {
                    tracing::warn!("Retention sweep of {:?} failed: {}", root, e);
                }
                busy.store(false, Ordering::SeqCst);
            });
        if let Err(e) = spawned {
            tracing::warn!("Failed to start retention sweep: {}", e);
            self.busy.store(false, Ordering::SeqCst);
        }
    }
}

struct Writer {
    meter: LevelMeter,
    writer: SegmentWriter,
    shared: Arc<Shared>,
    sweeper: Option<Sweeper>,
}

impl Writer {
    fn process(&mut self, block: &[f32]) -> Result<(), String> {
        for level in self.meter.process(block) {
            self.shared.events.send_level(level);
        }

        let events = self
            .writer
            .write(block)
            .map_err(|e| format!("encoder error: {}", e))?;

        for event in events {
            match event {
                SegmentEvent::Finished(path) => {
                    self.shared.events.send(LoggerEvent::SegmentFinished(path));
                }
                SegmentEvent::Started(path) => {
                    if let Some(sweeper) = &self.sweeper {
                        sweeper.trigger(Some(path.clone()));
                    }
                    self.shared.events.send(LoggerEvent::SegmentStarted(path));
                }
            }
        }
        Ok(())
    }

    /// Finalize the open segment, reporting it to the listener
    fn finish(mut self) -> (SegmentTotals, Option<String>) {
        let error = match self.writer.close_segment() {
            Ok(Some(path)) => {
                self.shared.events.send(LoggerEvent::SegmentFinished(path));
                None
            }
            Ok(None) => None,
            Err(e) => Some(format!("failed to finalize segment: {}", e)),
        };
        (self.writer.into_totals(), error)
    }
}

/// Body of the writer thread
pub(crate) fn run_writer(ctx: WriterContext) -> WriterOutcome {
    let WriterContext {
        config,
        stream,
        samples,
        stop,
        stall_timeout,
        writer,
        shared,
    } = ctx;

    let sweeper = Sweeper::new(&config);
    if let Some(sweeper) = &sweeper {
        sweeper.trigger(writer.current_path().map(|p| p.to_path_buf()));
    }

    let mut state = Writer {
        meter: LevelMeter::new(stream),
        writer,
        shared: shared.clone(),
        sweeper,
    };

    let mut last_audio = Instant::now();
    let failure = loop {
        match samples.recv_timeout(POLL_INTERVAL) {
            Ok(CaptureMessage::Samples(block)) => {
                last_audio = Instant::now();
                if let Err(e) = state.process(&block) {
                    break Some(e);
                }
            }
            Ok(CaptureMessage::Failed(message)) => {
                if stop.load(Ordering::SeqCst) {
                    // Errors raised while the device is being torn down
                    break None;
                }
                break Some(message);
            }
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::SeqCst) {
                    break drain(&samples, &mut state).err();
                }
                // Failures that found the queue full surface once it drains
                if let Some(message) = samples.take_failure() {
                    break Some(message);
                }
                if last_audio.elapsed() > stall_timeout {
                    break Some(format!("no audio received for {:?}", stall_timeout));
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if stop.load(Ordering::SeqCst) {
                    break None;
                }
                break Some(
                    samples
                        .take_failure()
                        .unwrap_or_else(|| "capture stream ended unexpectedly".to_string()),
                );
            }
        }
    };

    let (totals, finish_error) = state.finish();
    let failure = failure.or(finish_error);

    if let Some(message) = &failure {
        tracing::error!("Logging failed: {}", message);
        shared.transition(
            LoggerStatus::NotLogging,
            Some(StopReason::Failed(message.clone())),
        );
    }

    WriterOutcome {
        totals,
        failure,
        dropped_blocks: samples.dropped_blocks(),
    }
}

/// Write whatever audio is still queued after a stop request
fn drain(samples: &SampleQueue, state: &mut Writer) -> Result<(), String> {
    while let Some(message) = samples.try_recv() {
        if let CaptureMessage::Samples(block) = message {
            state.process(&block)?;
        }
    }
    Ok(())
}
