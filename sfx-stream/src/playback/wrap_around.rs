//! Wrap-around buffer position tracking
//!
//! A streaming device buffer is a fixed ring of `buffer_size` bytes written
//! cyclically. The ring itself lives in the device; this type tracks the
//! absolute number of bytes ever written (`write_offset`) so a device voice
//! can turn its physical read cursor back into an absolute stream position.
//!
//! ```text
//!   ring:  [.....R=====W.........]      R = physical read cursor
//!                 └unplayed┘            W = write_offset % buffer_size
//!
//!   sample_pos(R) = (write_offset - unplayed_bytes(R)) / bytes_per_sample
//! ```
//!
//! The write side runs on the update thread and the read side on whatever
//! thread queries the device voice, so `write_offset` is an atomic with
//! Release stores and Acquire loads.

use sfx_common::SampleFormat;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct WrapAroundBuffer {
    format: SampleFormat,
    buffer_size: u64,
    write_offset: AtomicU64,
}

impl WrapAroundBuffer {
    /// Track a ring of `buffer_size` bytes (rounded down to whole samples)
    pub fn new(format: SampleFormat, buffer_size: u64) -> Self {
        let bps = u64::from(format.bytes_per_sample());
        let buffer_size = (buffer_size - buffer_size % bps).max(bps);
        Self {
            format,
            buffer_size,
            write_offset: AtomicU64::new(0),
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    /// Absolute bytes written since creation or the last flush
    pub fn write_offset(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    /// Physical ring offset the next write lands at
    pub fn physical_write_pos(&self) -> u64 {
        self.write_offset() % self.buffer_size
    }

    /// Copy `bytes` into `ring` at the write position, wrapping at the end
    ///
    /// `ring` must be the `buffer_size`-byte storage this tracker describes.
    /// Data longer than the ring keeps only its last `buffer_size` bytes.
    pub fn write_into(&self, ring: &mut [u8], bytes: &[u8]) {
        debug_assert_eq!(ring.len() as u64, self.buffer_size);

        let size = self.buffer_size as usize;
        let skipped = bytes.len().saturating_sub(size);
        let tail = &bytes[skipped..];

        let mut pos = ((self.write_offset() + skipped as u64) % self.buffer_size) as usize;
        let mut remaining = tail;
        while !remaining.is_empty() {
            let n = remaining.len().min(size - pos);
            ring[pos..pos + n].copy_from_slice(&remaining[..n]);
            remaining = &remaining[n..];
            pos = (pos + n) % size;
        }

        self.write_offset
            .fetch_add(bytes.len() as u64, Ordering::Release);
    }

    /// Bytes written but not yet reached by a reader at `physical_offset`
    ///
    /// Equal positions mean nothing is unplayed: the ring is never filled
    /// completely, so a full ring cannot be mistaken for an empty one.
    pub fn unplayed_bytes(&self, physical_offset: u64) -> u64 {
        let write_pos = self.physical_write_pos();
        let physical = physical_offset % self.buffer_size;
        if physical <= write_pos {
            write_pos - physical
        } else {
            write_pos + self.buffer_size - physical
        }
    }

    /// Absolute stream sample at a reader's physical ring offset
    pub fn sample_pos(&self, physical_offset: u64) -> u64 {
        let written = self.write_offset();
        let unplayed = self.unplayed_bytes(physical_offset).min(written);
        self.format.bytes_to_samples(written - unplayed)
    }

    /// Forget everything written (after a seek)
    pub fn flush(&self) {
        self.write_offset.store(0, Ordering::Release);
    }
}
