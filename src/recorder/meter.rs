//! Peak level metering
//!
//! Turns captured audio into `LevelSample`s at a steady rate measured in
//! audio time, so meter updates track the stream rather than the clock.

use super::state::LevelSample;
use crate::capture::StreamFormat;

/// Level updates per second of captured audio
pub const LEVEL_UPDATES_PER_SECOND: u32 = 20;

pub struct LevelMeter {
    channels: usize,
    frames_per_update: usize,
    frames: usize,
    peak_left: f32,
    peak_right: f32,
}

impl LevelMeter {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            channels: format.channels.max(1) as usize,
            frames_per_update: (format.sample_rate / LEVEL_UPDATES_PER_SECOND).max(1) as usize,
            frames: 0,
            peak_left: 0.0,
            peak_right: 0.0,
        }
    }

    /// Feed interleaved samples, returning one reading per completed window
    pub fn process(&mut self, samples: &[f32]) -> Vec<LevelSample> {
        let mut readings = Vec::new();
        for frame in samples.chunks_exact(self.channels) {
            let left = frame[0].abs();
            // Mono feeds both meters; extra channels beyond two are ignored
            let right = frame.get(1).map_or(left, |s| s.abs());
            self.peak_left = self.peak_left.max(left);
            self.peak_right = self.peak_right.max(right);
            self.frames += 1;

            if self.frames == self.frames_per_update {
                readings.push(LevelSample {
                    left: self.peak_left.min(1.0),
                    right: self.peak_right.min(1.0),
                });
                self.frames = 0;
                self.peak_left = 0.0;
                self.peak_right = 0.0;
            }
        }
        readings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(sample_rate: u32, channels: u16) -> StreamFormat {
        StreamFormat {
            sample_rate,
            channels,
        }
    }

    #[test]
    fn test_one_reading_per_window() {
        let mut meter = LevelMeter::new(format(8000, 2));
        // 8000 / 20 = 400 frames per reading
        let block = vec![0.25f32; 399 * 2];
        assert!(meter.process(&block).is_empty());
        let readings = meter.process(&[0.25, 0.25]);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0], LevelSample { left: 0.25, right: 0.25 });
    }

    #[test]
    fn test_peaks_are_per_channel_and_absolute() {
        let mut meter = LevelMeter::new(format(20, 2));
        let readings = meter.process(&[-0.8, 0.1]);
        assert_eq!(readings, vec![LevelSample { left: 0.8, right: 0.1 }]);
    }

    #[test]
    fn test_mono_feeds_both_meters() {
        let mut meter = LevelMeter::new(format(40, 1));
        let readings = meter.process(&[0.3, -0.6]);
        assert_eq!(readings, vec![LevelSample { left: 0.6, right: 0.6 }]);
    }

    #[test]
    fn test_levels_are_clamped() {
        let mut meter = LevelMeter::new(format(20, 2));
        let readings = meter.process(&[1.7, -2.0]);
        assert_eq!(readings, vec![LevelSample { left: 1.0, right: 1.0 }]);
    }

    #[test]
    fn test_extra_channels_ignored() {
        let mut meter = LevelMeter::new(format(20, 4));
        let readings = meter.process(&[0.1, 0.2, 0.9, 0.9]);
        assert_eq!(readings, vec![LevelSample { left: 0.1, right: 0.2 }]);
    }

    #[test]
    fn test_window_resets_between_readings() {
        let mut meter = LevelMeter::new(format(40, 1));
        let readings = meter.process(&[0.9, 0.0, 0.1, 0.2]);
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].left, 0.2);
    }
}
