//! Sample-data packets
//!
//! A packet is one chunk of raw PCM read from a source stream. Reader threads
//! produce them; the owning buffer consumes them in order and hands them to
//! the device.

use sfx_common::SampleFormat;

/// One chunk of PCM data
#[derive(Debug, Clone)]
pub struct Packet {
    data: Vec<u8>,
    format: SampleFormat,

    /// Final packet of the stream (or of the current loop iteration)
    pub is_last: bool,

    /// Trailing silence appended after the final packet; not part of the
    /// sound's duration
    pub is_padding: bool,

    /// Position of this packet in its stream's read order
    pub sequence: u64,
}

impl Packet {
    /// Wrap `data`, trimming any partial trailing sample
    pub fn new(mut data: Vec<u8>, format: SampleFormat, is_last: bool, sequence: u64) -> Self {
        let bps = format.bytes_per_sample() as usize;
        let whole = data.len() - data.len() % bps;
        data.truncate(whole);
        Self {
            data,
            format,
            is_last,
            is_padding: false,
            sequence,
        }
    }

    /// Packet of digital silence
    ///
    /// 8-bit PCM is unsigned, so its silence is the midpoint 0x80.
    pub fn silence(format: SampleFormat, samples: u64, sequence: u64) -> Self {
        let fill = if format.bits_per_sample == 8 { 0x80 } else { 0 };
        let len = format.samples_to_bytes(samples) as usize;
        Self {
            data: vec![fill; len],
            format,
            is_last: false,
            is_padding: true,
            sequence,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Whole samples (frames) carried
    pub fn samples(&self) -> u64 {
        self.format.bytes_to_samples(self.data.len() as u64)
    }
}
