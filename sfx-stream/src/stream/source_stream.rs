//! Raw PCM sources
//!
//! A [`SourceStream`] is anything that can hand out interleaved PCM bytes in
//! a fixed [`SampleFormat`]. Streams are read from reader-pool threads, so
//! they must be `Send`; a stream is only ever read by one thread at a time.
//!
//! Two implementations ship with the crate:
//! - [`MemoryStream`]: PCM already in memory (shared, cheap to clone)
//! - [`ToneStream`]: synthesized sine tone, used by the CLI and tests

use crate::error::{Error, Result};
use sfx_common::SampleFormat;
use std::f32::consts::TAU;
use std::fmt;
use std::sync::Arc;

/// Readable source of PCM sample data
pub trait SourceStream: Send {
    /// Format of the bytes returned by [`read`](Self::read)
    fn format(&self) -> SampleFormat;

    /// Total samples (frames), when known up front
    fn sample_count(&self) -> Option<u64>;

    /// Fill `buf` from the current position
    ///
    /// Returns the number of bytes written. A return of 0 (or fewer bytes
    /// than requested, once repeated reads stop producing data) means the
    /// stream is exhausted; a failing stream behaves the same way.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Independent copy at the same position, if the stream supports it
    fn try_clone(&self) -> Option<Box<dyn SourceStream>>;

    /// Current position in samples, if the stream tracks one
    fn position(&self) -> Option<u64> {
        None
    }

    /// Move to `sample`; returns false when the stream cannot seek
    fn set_position(&mut self, _sample: u64) -> bool {
        false
    }
}

impl fmt::Debug for dyn SourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStream")
            .field("format", &self.format())
            .field("sample_count", &self.sample_count())
            .finish()
    }
}

/// Opens fresh streams for a sound resource
///
/// Buffers are created from a stream opened here; a resource that cannot be
/// opened simply yields `None`.
pub trait StreamProvider: Send + Sync {
    fn open(&self) -> Option<Box<dyn SourceStream>>;
}

impl<F> StreamProvider for F
where
    F: Fn() -> Option<Box<dyn SourceStream>> + Send + Sync,
{
    fn open(&self) -> Option<Box<dyn SourceStream>> {
        self()
    }
}

/// PCM held in memory
#[derive(Clone)]
pub struct MemoryStream {
    data: Arc<[u8]>,
    format: SampleFormat,
    pos: usize,
}

impl MemoryStream {
    /// Wrap `data`; any partial trailing sample is ignored
    pub fn new(format: SampleFormat, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            format,
            pos: 0,
        }
    }

    /// `samples` frames where every byte of frame `n` equals `n % 251`
    ///
    /// Handy for checking which part of a sound ended up where.
    pub fn counting(format: SampleFormat, samples: u64) -> Self {
        let bps = format.bytes_per_sample() as usize;
        let data: Vec<u8> = (0..samples as usize)
            .flat_map(|n| std::iter::repeat((n % 251) as u8).take(bps))
            .collect();
        Self::new(format, data)
    }

    /// Provider handing out independent readers over the same bytes
    pub fn provider(self) -> Arc<dyn StreamProvider> {
        Arc::new(move || Some(Box::new(self.clone()) as Box<dyn SourceStream>))
    }

    fn usable_len(&self) -> usize {
        let bps = self.format.bytes_per_sample() as usize;
        self.data.len() - self.data.len() % bps
    }
}

impl SourceStream for MemoryStream {
    fn format(&self) -> SampleFormat {
        self.format
    }

    fn sample_count(&self) -> Option<u64> {
        Some(self.format.bytes_to_samples(self.usable_len() as u64))
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let end = self.usable_len();
        let n = buf.len().min(end.saturating_sub(self.pos));
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn try_clone(&self) -> Option<Box<dyn SourceStream>> {
        Some(Box::new(self.clone()))
    }

    fn position(&self) -> Option<u64> {
        Some(self.format.bytes_to_samples(self.pos as u64))
    }

    fn set_position(&mut self, sample: u64) -> bool {
        let byte = self.format.samples_to_bytes(sample) as usize;
        self.pos = byte.min(self.usable_len());
        true
    }
}

/// Synthesized 16-bit sine tone
#[derive(Debug, Clone)]
pub struct ToneStream {
    format: SampleFormat,
    frequency: f32,
    amplitude: f32,
    total_samples: u64,
    pos: u64,
}

impl ToneStream {
    pub fn new(format: SampleFormat, frequency: f32, total_samples: u64) -> Result<Self> {
        if format.bits_per_sample != 16 {
            return Err(Error::Stream(format!(
                "tone synthesis needs 16-bit samples, got {}",
                format
            )));
        }
        Ok(Self {
            format,
            frequency,
            amplitude: 0.5,
            total_samples,
            pos: 0,
        })
    }

    /// Tone lasting `seconds`
    pub fn with_duration(format: SampleFormat, frequency: f32, seconds: f32) -> Result<Self> {
        Self::new(format, frequency, format.seconds_to_samples(seconds))
    }

    fn sample_value(&self, sample: u64) -> i16 {
        let t = sample as f32 / self.format.sample_rate as f32;
        let v = (TAU * self.frequency * t).sin() * self.amplitude;
        (v * i16::MAX as f32) as i16
    }
}

impl SourceStream for ToneStream {
    fn format(&self) -> SampleFormat {
        self.format
    }

    fn sample_count(&self) -> Option<u64> {
        Some(self.total_samples)
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let bps = self.format.bytes_per_sample() as usize;
        let wanted = (buf.len() / bps) as u64;
        let count = wanted.min(self.total_samples - self.pos);

        for (i, frame) in buf.chunks_exact_mut(bps).take(count as usize).enumerate() {
            let bytes = self.sample_value(self.pos + i as u64).to_le_bytes();
            for channel in frame.chunks_exact_mut(2) {
                channel.copy_from_slice(&bytes);
            }
        }

        self.pos += count;
        count as usize * bps
    }

    fn try_clone(&self) -> Option<Box<dyn SourceStream>> {
        Some(Box::new(self.clone()))
    }

    fn position(&self) -> Option<u64> {
        Some(self.pos)
    }

    fn set_position(&mut self, sample: u64) -> bool {
        self.pos = sample.min(self.total_samples);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono16() -> SampleFormat {
        SampleFormat::new(1, 16, 8000).unwrap()
    }

    #[test]
    fn test_memory_stream_reads_then_exhausts() {
        let mut stream = MemoryStream::new(mono16(), vec![1u8, 2, 3, 4, 5]);
        assert_eq!(stream.sample_count(), Some(2));

        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(stream.read(&mut buf), 1);
        assert_eq!(buf[0], 4);
        assert_eq!(stream.read(&mut buf), 0);
    }

    #[test]
    fn test_memory_stream_clone_is_independent() {
        let mut stream = MemoryStream::counting(mono16(), 10);
        let mut buf = [0u8; 4];
        stream.read(&mut buf);

        let mut copy = stream.try_clone().unwrap();
        assert_eq!(copy.position(), Some(2));

        assert!(copy.set_position(7));
        copy.read(&mut buf);
        assert_eq!(buf, [7, 7, 8, 8]);
        assert_eq!(stream.position(), Some(2));
    }

    #[test]
    fn test_set_position_clamps() {
        let mut stream = MemoryStream::counting(mono16(), 4);
        stream.set_position(100);
        assert_eq!(stream.position(), Some(4));
        assert_eq!(stream.read(&mut [0u8; 8]), 0);
    }

    #[test]
    fn test_tone_stream_length_and_channels() {
        let stereo = SampleFormat::new(2, 16, 8000).unwrap();
        let mut tone = ToneStream::new(stereo, 440.0, 5).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(tone.read(&mut buf), 20);
        assert_eq!(tone.read(&mut buf), 0);

        // Both channels carry the same value
        assert_eq!(buf[4..6], buf[6..8]);
    }

    #[test]
    fn test_tone_stream_rejects_8_bit() {
        let pcm8 = SampleFormat::new(1, 8, 8000).unwrap();
        assert!(ToneStream::new(pcm8, 440.0, 10).is_err());
    }

    #[test]
    fn test_provider_opens_fresh_readers() {
        let provider = MemoryStream::counting(mono16(), 3).provider();
        let mut a = provider.open().unwrap();
        a.read(&mut [0u8; 6]);
        let b = provider.open().unwrap();
        assert_eq!(b.position(), Some(0));
    }
}
