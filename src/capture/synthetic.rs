//! Synthetic test-tone source
//!
//! Generates a stereo sine tone in real time. Used by `--test-tone` to
//! exercise the full pipeline on machines without an input device.

use super::traits::{AudioSource, CaptureError, CaptureResult, SampleSink, StreamFormat};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Length of one generated block
const BLOCK: Duration = Duration::from_millis(10);

pub struct ToneSource {
    format: StreamFormat,
    frequency: f32,
    amplitude: f32,
    is_running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ToneSource {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            format: StreamFormat {
                sample_rate: 48000,
                channels: 2,
            },
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            is_running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Default for ToneSource {
    fn default() -> Self {
        Self::new(440.0, 0.5)
    }
}

/// Generate `frames` interleaved frames starting at frame `offset`.
/// The right channel runs at half amplitude so the meters differ.
fn tone_block(format: StreamFormat, frequency: f32, amplitude: f32, offset: u64, frames: usize) -> Vec<f32> {
    let channels = format.channels as usize;
    let mut block = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let t = (offset + i as u64) as f32 / format.sample_rate as f32;
        let value = (TAU * frequency * t).sin() * amplitude;
        for ch in 0..channels {
            block.push(if ch == 1 { value * 0.5 } else { value });
        }
    }
    block
}

impl AudioSource for ToneSource {
    fn name(&self) -> &str {
        "test tone"
    }

    fn start(&mut self, sink: SampleSink) -> CaptureResult<StreamFormat> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        let format = self.format;
        let frequency = self.frequency;
        let amplitude = self.amplitude;
        let is_running = self.is_running.clone();
        let frames_per_block = (format.sample_rate as u128 * BLOCK.as_millis() / 1000) as usize;

        let handle = std::thread::Builder::new()
            .name("shocklog-tone".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut offset: u64 = 0;
                while is_running.load(Ordering::SeqCst) && !sink.is_closed() {
                    sink.push(tone_block(format, frequency, amplitude, offset, frames_per_block));
                    offset += frames_per_block as u64;

                    // Pace against the start time so the tone does not drift
                    let due = BLOCK * (offset / frames_per_block as u64) as u32;
                    if let Some(wait) = due.checked_sub(started.elapsed()) {
                        std::thread::sleep(wait);
                    }
                }
                is_running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.is_running.store(false, Ordering::SeqCst);
                CaptureError::Stream(e.to_string())
            })?;

        self.handle = Some(handle);
        tracing::info!("Generating {}Hz test tone", self.frequency);
        Ok(format)
    }

    fn stop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

impl Drop for ToneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::CaptureMessage;

    #[test]
    fn test_tone_block_shape() {
        let format = StreamFormat {
            sample_rate: 8000,
            channels: 2,
        };
        let block = tone_block(format, 1000.0, 0.8, 0, 16);
        assert_eq!(block.len(), 32);
        assert!(block.iter().all(|s| s.abs() <= 0.8));
        // Right channel is half the left
        assert!((block[5] - block[4] * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_tone_source_delivers_audio() {
        let (sink, queue) = SampleSink::channel(64);
        let mut source = ToneSource::default();
        let format = source.start(sink).unwrap();
        assert_eq!(format.channels, 2);
        assert!(source.is_running());

        let first = queue.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first, CaptureMessage::Samples(ref s) if !s.is_empty()));

        source.stop();
        assert!(!source.is_running());
    }

    #[test]
    fn test_double_start_is_rejected() {
        let (sink, _queue) = SampleSink::channel(64);
        let mut source = ToneSource::default();
        source.start(sink.clone()).unwrap();
        assert_eq!(source.start(sink), Err(CaptureError::AlreadyRunning));
        source.stop();
    }
}
