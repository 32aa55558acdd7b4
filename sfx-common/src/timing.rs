//! Tick-based timing and sample format math
//!
//! The streaming pipeline works with three time representations:
//!
//! 1. **Ticks**: `u64` milliseconds of stream or device time. Packet spans,
//!    queue admission and virtual play timers all use ticks.
//! 2. **Samples**: `u64` frame counts at the sound's own sample rate. One
//!    sample covers every channel (a stereo 16-bit sample is 4 bytes).
//! 3. **Bytes**: raw offsets into packet data and device ring buffers.
//!
//! # Conversion Flow
//!
//! ```text
//! SourceStream bytes
//!     ↓ bytes_to_samples()
//! Sample count (packet length, voice cursor)
//!     ↓ samples_to_ticks()
//! Ticks (queue spans, TimeSource positions)
//! ```
//!
//! Tick conversions truncate. Code that accumulates durations over many
//! packets converts the running sample total rather than summing per-packet
//! tick values, so rounding never drifts.
//!
//! # Examples
//!
//! ```rust
//! use sfx_common::timing::SampleFormat;
//!
//! let format = SampleFormat::new(2, 16, 44100).unwrap();
//! assert_eq!(format.bytes_per_sample(), 4);
//! assert_eq!(format.samples_to_ticks(44100), 1000);
//! assert_eq!(format.ticks_to_samples(200), 8820);
//! assert_eq!(format.bytes_to_samples(4410 * 4), 4410);
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Ticks per second (ticks are milliseconds)
pub const TICKS_PER_SECOND: u64 = 1000;

/// Convert seconds to ticks, clamping negative values to zero
pub fn seconds_to_ticks(seconds: f32) -> u64 {
    if seconds <= 0.0 || !seconds.is_finite() {
        return 0;
    }
    (seconds as f64 * TICKS_PER_SECOND as f64) as u64
}

/// Convert ticks to seconds
pub fn ticks_to_seconds(ticks: u64) -> f32 {
    (ticks as f64 / TICKS_PER_SECOND as f64) as f32
}

/// Layout of interleaved PCM sample data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleFormat {
    /// Interleaved channel count (1-8)
    pub channels: u8,

    /// Bits per channel sample (8, 16, 24 or 32)
    pub bits_per_sample: u8,

    /// Samples (frames) per second
    pub sample_rate: u32,
}

impl SampleFormat {
    /// Create a validated sample format
    pub fn new(channels: u8, bits_per_sample: u8, sample_rate: u32) -> Result<Self> {
        if !(1..=8).contains(&channels) {
            return Err(Error::UnsupportedFormat(format!(
                "channel count {} out of range [1, 8]",
                channels
            )));
        }
        if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(Error::UnsupportedFormat(format!(
                "{} bits per sample",
                bits_per_sample
            )));
        }
        if !(1000..=384_000).contains(&sample_rate) {
            return Err(Error::UnsupportedFormat(format!(
                "sample rate {} Hz out of range [1000, 384000]",
                sample_rate
            )));
        }

        Ok(Self {
            channels,
            bits_per_sample,
            sample_rate,
        })
    }

    /// Stereo 16-bit at 44.1kHz
    pub fn cd_quality() -> Self {
        Self {
            channels: 2,
            bits_per_sample: 16,
            sample_rate: 44100,
        }
    }

    /// Bytes occupied by one sample across all channels
    pub fn bytes_per_sample(&self) -> u32 {
        self.channels as u32 * (self.bits_per_sample as u32 / 8)
    }

    /// Bytes of data per second of audio
    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_sample() as u64 * self.sample_rate as u64
    }

    /// Convert a sample count to a byte count
    pub fn samples_to_bytes(&self, samples: u64) -> u64 {
        samples * self.bytes_per_sample() as u64
    }

    /// Convert a byte count to whole samples (partial samples are dropped)
    pub fn bytes_to_samples(&self, bytes: u64) -> u64 {
        bytes / self.bytes_per_sample() as u64
    }

    /// Convert a sample count to ticks (truncating)
    pub fn samples_to_ticks(&self, samples: u64) -> u64 {
        ((samples as u128 * TICKS_PER_SECOND as u128) / self.sample_rate as u128) as u64
    }

    /// Convert ticks to a sample count (truncating)
    pub fn ticks_to_samples(&self, ticks: u64) -> u64 {
        ((ticks as u128 * self.sample_rate as u128) / TICKS_PER_SECOND as u128) as u64
    }

    /// Convert seconds to a sample count, clamping negative values to zero
    pub fn seconds_to_samples(&self, seconds: f32) -> u64 {
        if seconds <= 0.0 || !seconds.is_finite() {
            return 0;
        }
        (seconds as f64 * self.sample_rate as f64) as u64
    }

    /// Convert a sample count to seconds
    pub fn samples_to_seconds(&self, samples: u64) -> f32 {
        (samples as f64 / self.sample_rate as f64) as f32
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::cd_quality()
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}ch/{}bit/{}Hz",
            self.channels, self.bits_per_sample, self.sample_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_formats() {
        assert!(SampleFormat::new(0, 16, 44100).is_err());
        assert!(SampleFormat::new(9, 16, 44100).is_err());
        assert!(SampleFormat::new(2, 12, 44100).is_err());
        assert!(SampleFormat::new(2, 16, 10).is_err());
        assert!(SampleFormat::new(1, 8, 8000).is_ok());
    }

    #[test]
    fn test_bytes_per_sample() {
        assert_eq!(SampleFormat::new(1, 8, 8000).unwrap().bytes_per_sample(), 1);
        assert_eq!(SampleFormat::new(2, 24, 48000).unwrap().bytes_per_sample(), 6);
        assert_eq!(SampleFormat::cd_quality().bytes_per_second(), 176_400);
    }

    #[test]
    fn test_tick_conversions_truncate() {
        let format = SampleFormat::new(1, 16, 44100).unwrap();

        // 1000 samples = 22.67ms
        assert_eq!(format.samples_to_ticks(1000), 22);
        assert_eq!(format.ticks_to_samples(22), 970);
        assert_eq!(format.ticks_to_samples(1000), 44100);
    }

    #[test]
    fn test_running_total_does_not_drift() {
        let format = SampleFormat::new(1, 16, 44100).unwrap();

        // Summing per-packet ticks loses time; converting the running total does not
        let per_packet: u64 = (0..100).map(|_| format.samples_to_ticks(1000)).sum();
        assert_eq!(per_packet, 2200);
        assert_eq!(format.samples_to_ticks(100 * 1000), 2267);
    }

    #[test]
    fn test_seconds_helpers() {
        assert_eq!(seconds_to_ticks(1.5), 1500);
        assert_eq!(seconds_to_ticks(-1.0), 0);
        assert_eq!(seconds_to_ticks(f32::NAN), 0);
        assert!((ticks_to_seconds(250) - 0.25).abs() < f32::EPSILON);

        let format = SampleFormat::cd_quality();
        assert_eq!(format.seconds_to_samples(2.0), 88200);
        assert!((format.samples_to_seconds(22050) - 0.5).abs() < f32::EPSILON);
    }
}
