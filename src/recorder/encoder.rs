//! Segment encoders
//!
//! MP3 segments are encoded by an FFmpeg child process fed raw f32le PCM
//! on stdin. WAV segments are written directly with hound.

use crate::capture::StreamFormat;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::str::FromStr;
use thiserror::Error;

/// Encoding errors
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

pub type EncodeResult<T> = Result<T, EncodeError>;

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp3,
    Wav,
}

impl OutputFormat {
    /// Every extension the logger writes; retention only touches these
    pub const ALL: [OutputFormat; 2] = [OutputFormat::Mp3, OutputFormat::Wav];

    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(OutputFormat::Mp3),
            "wav" => Ok(OutputFormat::Wav),
            other => Err(format!("unknown format '{}', expected mp3 or wav", other)),
        }
    }
}

/// Writes one segment file
pub trait SegmentEncoder: Send {
    /// Append interleaved f32 samples
    fn write(&mut self, samples: &[f32]) -> EncodeResult<()>;

    /// Flush and close the file, returning its path
    fn finish(self: Box<Self>) -> EncodeResult<PathBuf>;

    /// Path of the file being written
    fn path(&self) -> &Path;
}

/// Open an encoder for `path` in the given format
pub fn open_encoder(
    format: OutputFormat,
    path: &Path,
    stream: StreamFormat,
    bitrate: u32,
) -> EncodeResult<Box<dyn SegmentEncoder>> {
    match format {
        OutputFormat::Mp3 => Ok(Box::new(FfmpegEncoder::new(path, stream, bitrate)?)),
        OutputFormat::Wav => Ok(Box::new(WavEncoder::new(path, stream)?)),
    }
}

/// MP3 encoder using FFmpeg
pub struct FfmpegEncoder {
    process: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(path: &Path, stream: StreamFormat, bitrate: u32) -> EncodeResult<Self> {
        let args = ffmpeg_args(path, stream, bitrate);
        tracing::debug!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncodeError::Ffmpeg(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EncodeError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;

        Ok(Self {
            process,
            stdin: Some(stdin),
            path: path.to_path_buf(),
        })
    }
}

/// Build the FFmpeg command line for one MP3 segment
fn ffmpeg_args(path: &Path, stream: StreamFormat, bitrate: u32) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "f32le".to_string(),
        "-ar".to_string(),
        stream.sample_rate.to_string(),
        "-ac".to_string(),
        stream.channels.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:a".to_string(),
        "libmp3lame".to_string(),
        "-b:a".to_string(),
        format!("{}k", bitrate),
        path.to_string_lossy().to_string(),
    ]
}

impl SegmentEncoder for FfmpegEncoder {
    fn write(&mut self, samples: &[f32]) -> EncodeResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EncodeError::Ffmpeg("encoder already finished".to_string()))?;
        let bytes: Vec<u8> = samples
            .iter()
            .flat_map(|&sample| sample.to_le_bytes())
            .collect();
        stdin
            .write_all(&bytes)
            .map_err(|e| EncodeError::Ffmpeg(format!("Failed to write samples: {}", e)))
    }

    fn finish(self: Box<Self>) -> EncodeResult<PathBuf> {
        let FfmpegEncoder {
            process,
            stdin,
            path,
        } = *self;

        // Closing stdin signals EOF to FFmpeg
        drop(stdin);

        let output = process
            .wait_with_output()
            .map_err(|e| EncodeError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EncodeError::Ffmpeg(format!(
                "FFmpeg exited with error: {}",
                stderr.trim()
            )));
        }

        Ok(path)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// 16-bit PCM WAV encoder
pub struct WavEncoder {
    writer: hound::WavWriter<BufWriter<File>>,
    path: PathBuf,
}

impl WavEncoder {
    pub fn new(path: &Path, stream: StreamFormat) -> EncodeResult<Self> {
        let spec = hound::WavSpec {
            channels: stream.channels,
            sample_rate: stream.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }
}

impl SegmentEncoder for WavEncoder {
    fn write(&mut self, samples: &[f32]) -> EncodeResult<()> {
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            self.writer.write_sample(value)?;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> EncodeResult<PathBuf> {
        let WavEncoder { writer, path } = *self;
        writer.finalize()?;
        Ok(path)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
