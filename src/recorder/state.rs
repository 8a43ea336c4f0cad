//! Logger state management
//!
//! Defines the two-state status machine, level samples, the start-time
//! configuration snapshot and the summary of a finished session.

use super::encoder::OutputFormat;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Longest segment the scheduler accepts
pub const MAX_SEGMENT_LENGTH: Duration = Duration::from_secs(24 * 60 * 60);

/// Current state of the logger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoggerStatus {
    /// No capture in progress
    #[default]
    NotLogging,
    /// Capturing and writing segments
    Logging,
}

impl LoggerStatus {
    pub fn is_logging(self) -> bool {
        self == LoggerStatus::Logging
    }
}

/// Peak level per channel, normalized to 0.0-1.0
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LevelSample {
    pub left: f32,
    pub right: f32,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum StopReason {
    /// `stop` was called
    UserRequested,
    /// Capture or encoding failed and the session was torn down
    Failed(String),
}

/// Invalid configuration values, caught before anything is opened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("bitrate {0} kbit/s is outside 8-320")]
    Bitrate(u32),

    #[error("segment length must be non-zero and at most 24 hours")]
    SegmentLength,

    #[error("retention window must be greater than zero")]
    Retention,
}

/// Configuration snapshot taken when logging starts.
///
/// The logger owns its copy for the whole session; later edits to the
/// persisted settings only apply to the next session.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggerConfig {
    /// Encoder bitrate in kbit/s (ignored for WAV)
    pub bitrate: u32,

    /// Length of each output segment
    pub segment_length: Duration,

    /// Root folder for output segments
    pub folder: PathBuf,

    /// Write segments into YYYY/MM/DD sub-folders
    pub organise_folder: bool,

    /// Delete segments older than `retention`
    pub delete_old: bool,

    /// Age beyond which old segments are deleted
    pub retention: Duration,

    /// Output file format
    pub format: OutputFormat,

    /// Roll segments on clock multiples of the segment length
    pub align_segments: bool,
}

impl LoggerConfig {
    /// Check values that would otherwise only fail deep inside the pipeline
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.format == OutputFormat::Mp3 && !(8..=320).contains(&self.bitrate) {
            return Err(ConfigError::Bitrate(self.bitrate));
        }
        if self.segment_length.is_zero() || self.segment_length > MAX_SEGMENT_LENGTH {
            return Err(ConfigError::SegmentLength);
        }
        if self.delete_old && self.retention.is_zero() {
            return Err(ConfigError::Retention);
        }
        Ok(())
    }
}

/// Result of a completed logging session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session identifier
    pub id: Uuid,

    /// Wall time when logging started
    pub started_at: DateTime<Local>,

    /// Wall time when the session ended
    pub ended_at: DateTime<Local>,

    /// Segments that were finalized, in order
    pub segments: Vec<PathBuf>,

    /// Audio frames written across all segments
    pub frames_written: u64,

    /// Capture blocks dropped because the writer fell behind
    pub dropped_blocks: u64,

    /// Why the session ended
    pub reason: StopReason,
}
