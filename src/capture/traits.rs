//! Capture trait definitions
//!
//! Platform-agnostic types shared by every audio source, and the queue that
//! carries captured audio from the capture thread to the writer thread.

use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Number of sample blocks the capture queue holds before dropping.
pub const CAPTURE_QUEUE_BLOCKS: usize = 256;

/// Capture-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("No input device available")]
    NoDevice,

    #[error("Input device not found: {0}")]
    DeviceNotFound(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Capture already running")]
    AlreadyRunning,
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Information about an audio device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Device name, also used to select it
    pub name: String,

    /// Whether this is the default input device
    pub is_default: bool,

    /// Default sample rate in Hz (if the device reports one)
    pub sample_rate: Option<u32>,

    /// Default channel count (if the device reports one)
    pub channels: Option<u16>,
}

/// Shape of the interleaved f32 audio a source delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Message sent from the capture thread to the writer
#[derive(Debug)]
pub enum CaptureMessage {
    /// A block of interleaved f32 samples
    Samples(Vec<f32>),
    /// The source hit an unrecoverable error
    Failed(String),
}

/// Producer end of the capture queue.
///
/// Nothing here blocks: when the writer falls behind, blocks are dropped and
/// counted, and a failure that finds the queue full is parked in a slot the
/// writer polls. Once the writer goes away the sink reports itself closed so
/// the capture thread can wind down.
#[derive(Clone)]
pub struct SampleSink {
    tx: SyncSender<CaptureMessage>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
}

/// Consumer end of the capture queue, owned by the writer
pub struct SampleQueue {
    rx: Receiver<CaptureMessage>,
    dropped: Arc<AtomicU64>,
    failure: Arc<Mutex<Option<String>>>,
}

impl SampleSink {
    /// Create a sink and the receiving end for the writer
    pub fn channel(capacity: usize) -> (Self, SampleQueue) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let failure = Arc::new(Mutex::new(None));
        let sink = Self {
            tx,
            dropped: dropped.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            failure: failure.clone(),
        };
        let queue = SampleQueue {
            rx,
            dropped,
            failure,
        };
        (sink, queue)
    }

    /// Queue a block of interleaved samples
    pub fn push(&self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        match self.tx.try_send(CaptureMessage::Samples(samples)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.closed.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Report an unrecoverable source error to the writer
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("Capture failed: {}", message);
        match self.tx.try_send(CaptureMessage::Failed(message)) {
            Ok(()) => {}
            Err(TrySendError::Full(CaptureMessage::Failed(message))) => {
                // First failure wins
                self.failure.lock().get_or_insert(message);
            }
            Err(TrySendError::Full(CaptureMessage::Samples(_))) => {}
            Err(TrySendError::Disconnected(_)) => {
                self.closed.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Whether the writer has gone away
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SampleQueue {
    /// Wait up to `timeout` for the next message
    pub fn recv_timeout(&self, timeout: Duration) -> Result<CaptureMessage, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Take a queued message without waiting
    pub fn try_recv(&self) -> Option<CaptureMessage> {
        self.rx.try_recv().ok()
    }

    /// A failure that arrived while the queue was full
    pub fn take_failure(&self) -> Option<String> {
        self.failure.lock().take()
    }

    /// Blocks dropped so far because the queue was full
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A source of live audio.
///
/// Sources run their own capture thread: `start` returns once the stream is
/// live, and from then on audio flows into the sink until `stop`.
pub trait AudioSource: Send {
    /// Human readable source name
    fn name(&self) -> &str;

    /// Open the input and begin delivering audio into `sink`
    fn start(&mut self, sink: SampleSink) -> CaptureResult<StreamFormat>;

    /// Stop delivering audio and release the input. Safe to call twice.
    fn stop(&mut self);

    /// Whether the source is currently delivering audio
    fn is_running(&self) -> bool;
}
