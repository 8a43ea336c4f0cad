//! Logging engine
//!
//! This module implements the continuous logging pipeline:
//! - Logger to own the capture source and the session lifecycle
//! - Writer thread feeding the level meter and the segment writer
//! - Segment encoders for MP3 (FFmpeg) and WAV output
//! - Retention sweeps over the output folder

pub mod encoder;
pub mod events;
pub mod logger;
pub mod meter;
mod pipeline;
pub mod retention;
pub mod segment;
pub mod state;

pub use encoder::{EncodeError, OutputFormat};
pub use events::{event_channel, EventReceiver, EventSender, LoggerEvent, MAX_PENDING_LEVELS};
pub use logger::{Logger, LoggerError, LoggerResult};
pub use pipeline::STALL_TIMEOUT;
pub use retention::{RetentionPolicy, SweepReport};
pub use state::{ConfigError, LevelSample, LoggerConfig, LoggerStatus, SessionSummary, StopReason};
