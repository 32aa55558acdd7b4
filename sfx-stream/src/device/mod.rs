//! Audio device abstraction
//!
//! The streaming core talks to hardware through three traits:
//! - [`Device`]: creates buffers and voices, receives listener updates
//! - [`DeviceBuffer`]: sample storage that packets are written into
//! - [`DeviceVoice`]: a playback cursor over one device buffer
//!
//! Device voices are shared (`Arc`) between the owning voice and the packet
//! queue that measures time against them, so their methods take `&self` and
//! must be callable from any thread.

pub mod null;

pub use null::NullDevice;

use crate::error::Result;
use crate::playback::packet_queue::PacketConsumer;
use sfx_common::SampleFormat;
use std::any::Any;
use std::sync::Arc;

/// Shape of the storage behind a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLayout {
    /// Whole sound resident; `samples` is a capacity hint
    SingleShot { samples: u64 },

    /// Fixed ring reused cyclically while streaming
    Ring { bytes: u64 },
}

/// Device-reported voice state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceVoiceStatus {
    Playing,
    Paused,
    Stopped,
}

/// Listener placement for 3D voices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub forward: [f32; 3],
    pub up: [f32; 3],
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            velocity: [0.0; 3],
            forward: [0.0, 0.0, 1.0],
            up: [0.0, 1.0, 0.0],
        }
    }
}

/// Device-side sample storage
pub trait DeviceBuffer: PacketConsumer + Send {
    fn format(&self) -> SampleFormat;

    fn layout(&self) -> BufferLayout;

    /// Discard written data (streaming seek)
    fn flush(&mut self);

    /// Lets a device recover its concrete buffer type in `create_voice`
    fn as_any(&self) -> &dyn Any;
}

/// Hardware playback cursor
pub trait DeviceVoice: Send + Sync {
    fn play(&self, looping: bool);

    fn pause(&self);

    /// Stop and rewind the cursor to zero
    fn stop(&self);

    fn seek(&self, sample: u64);

    /// Samples played since the last stop or seek origin
    fn position(&self) -> u64;

    fn status(&self) -> DeviceVoiceStatus;

    fn set_volume(&self, volume: f32);

    /// Volume last applied with [`DeviceVoice::set_volume`]
    fn volume(&self) -> f32;

    fn set_pitch(&self, pitch: f32);

    /// Place a 3D voice; plain voices ignore it
    fn set_transform(&self, _position: [f32; 3], _velocity: [f32; 3]) {}
}

/// Audio output device
pub trait Device: Send {
    fn name(&self) -> &str;

    /// Simultaneous voices the device can play
    fn max_voices(&self) -> usize;

    fn create_buffer(
        &mut self,
        format: SampleFormat,
        layout: BufferLayout,
    ) -> Result<Box<dyn DeviceBuffer>>;

    /// A voice over `buffer`, or `None` when the device is out of voices
    fn create_voice(&mut self, is_3d: bool, buffer: &dyn DeviceBuffer)
        -> Option<Arc<dyn DeviceVoice>>;

    /// Voices currently held by the application
    fn active_voices(&self) -> usize;

    /// Per-frame device work
    fn update(&mut self, listener: &Listener);
}
