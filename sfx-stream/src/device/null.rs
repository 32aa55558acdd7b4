//! Clock-driven device that produces no sound
//!
//! Voices advance against a [`TimeSource`] instead of an audio callback, which
//! makes playback deterministic under a manual clock. Behavior mirrors a real
//! device closely enough to exercise the streaming core:
//! - single-shot voices stop on their own at the end of a non-looping sound
//!   and wrap around when looping
//! - ring voices never play past the data written so far; a starved voice
//!   stalls and resumes where it stopped once more data arrives
//! - a configurable voice limit makes `create_voice` fail when exhausted

use crate::device::{BufferLayout, Device, DeviceBuffer, DeviceVoice, DeviceVoiceStatus, Listener};
use crate::error::Result;
use crate::playback::packet_queue::PacketConsumer;
use crate::playback::wrap_around::WrapAroundBuffer;
use crate::stream::Packet;
use crate::time_source::TimeSource;
use sfx_common::SampleFormat;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace};

/// Device with no output
pub struct NullDevice {
    name: String,
    clock: Arc<dyn TimeSource>,
    max_voices: usize,
    voices: Vec<Weak<NullVoice>>,
    listener: Listener,
    updates: u64,
}

impl NullDevice {
    pub fn new(clock: Arc<dyn TimeSource>, max_voices: usize) -> Self {
        Self {
            name: "null".to_string(),
            clock,
            max_voices,
            voices: Vec::new(),
            listener: Listener::default(),
            updates: 0,
        }
    }

    /// Last listener passed to [`Device::update`]
    pub fn listener(&self) -> Listener {
        self.listener
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }

    fn prune(&mut self) {
        self.voices.retain(|voice| voice.strong_count() > 0);
    }
}

impl Device for NullDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_voices(&self) -> usize {
        self.max_voices
    }

    fn create_buffer(
        &mut self,
        format: SampleFormat,
        layout: BufferLayout,
    ) -> Result<Box<dyn DeviceBuffer>> {
        let storage = match layout {
            BufferLayout::SingleShot { samples } => Storage::SingleShot {
                data: Vec::with_capacity(format.samples_to_bytes(samples) as usize),
                resident: Arc::new(AtomicU64::new(0)),
            },
            BufferLayout::Ring { bytes } => {
                let wrap = Arc::new(WrapAroundBuffer::new(format, bytes));
                Storage::Ring {
                    data: vec![0; wrap.buffer_size() as usize],
                    wrap,
                }
            }
        };
        trace!("Null device buffer created: {} {:?}", format, layout);

        Ok(Box::new(NullBuffer {
            format,
            layout,
            storage,
            packets_written: 0,
        }))
    }

    fn create_voice(
        &mut self,
        _is_3d: bool,
        buffer: &dyn DeviceBuffer,
    ) -> Option<Arc<dyn DeviceVoice>> {
        self.prune();
        if self.voices.len() >= self.max_voices {
            debug!("Null device out of voices ({} in use)", self.voices.len());
            return None;
        }

        let buffer = buffer.as_any().downcast_ref::<NullBuffer>()?;
        let cursor = match &buffer.storage {
            Storage::SingleShot { resident, .. } => Cursor::SingleShot(Arc::clone(resident)),
            Storage::Ring { wrap, .. } => Cursor::Ring(Arc::clone(wrap)),
        };

        let voice = Arc::new(NullVoice {
            clock: Arc::clone(&self.clock),
            format: buffer.format,
            cursor,
            state: Mutex::new(VoiceState::default()),
        });
        self.voices.push(Arc::downgrade(&voice));
        Some(voice)
    }

    fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.strong_count() > 0).count()
    }

    fn update(&mut self, listener: &Listener) {
        self.listener = *listener;
        self.updates += 1;
        self.prune();
    }
}

enum Storage {
    SingleShot {
        data: Vec<u8>,
        resident: Arc<AtomicU64>,
    },
    Ring {
        data: Vec<u8>,
        wrap: Arc<WrapAroundBuffer>,
    },
}

/// Buffer storage of the null device
pub struct NullBuffer {
    format: SampleFormat,
    layout: BufferLayout,
    storage: Storage,
    packets_written: u64,
}

impl NullBuffer {
    /// Raw stored bytes (whole sound, or the ring)
    pub fn data(&self) -> &[u8] {
        match &self.storage {
            Storage::SingleShot { data, .. } => data,
            Storage::Ring { data, .. } => data,
        }
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Absolute bytes written into a ring buffer
    pub fn ring_write_offset(&self) -> Option<u64> {
        match &self.storage {
            Storage::Ring { wrap, .. } => Some(wrap.write_offset()),
            Storage::SingleShot { .. } => None,
        }
    }
}

impl PacketConsumer for NullBuffer {
    fn write(&mut self, packet: Packet) {
        self.packets_written += 1;
        match &mut self.storage {
            Storage::SingleShot { data, resident } => {
                data.extend_from_slice(packet.bytes());
                resident.store(
                    self.format.bytes_to_samples(data.len() as u64),
                    Ordering::Release,
                );
            }
            Storage::Ring { data, wrap } => wrap.write_into(data, packet.bytes()),
        }
    }
}

impl DeviceBuffer for NullBuffer {
    fn format(&self) -> SampleFormat {
        self.format
    }

    fn layout(&self) -> BufferLayout {
        self.layout
    }

    fn flush(&mut self) {
        match &mut self.storage {
            Storage::SingleShot { data, resident } => {
                data.clear();
                resident.store(0, Ordering::Release);
            }
            Storage::Ring { wrap, .. } => wrap.flush(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

enum Cursor {
    /// Samples resident in the buffer
    SingleShot(Arc<AtomicU64>),
    Ring(Arc<WrapAroundBuffer>),
}

#[derive(Debug)]
struct VoiceState {
    status: DeviceVoiceStatus,
    looping: bool,

    /// Raw position when the cursor last started, paused or seeked
    base: u64,

    /// Clock tick the cursor started running at
    started_at: Option<u64>,

    volume: f32,
    pitch: f32,
}

impl Default for VoiceState {
    fn default() -> Self {
        Self {
            status: DeviceVoiceStatus::Stopped,
            looping: false,
            base: 0,
            started_at: None,
            volume: 1.0,
            pitch: 1.0,
        }
    }
}

/// Voice of the null device
pub struct NullVoice {
    clock: Arc<dyn TimeSource>,
    format: SampleFormat,
    cursor: Cursor,
    state: Mutex<VoiceState>,
}

impl NullVoice {
    /// Bring the cursor up to the clock and return the raw position
    fn advance(&self, state: &mut VoiceState) -> u64 {
        let now = self.clock.tick();
        let elapsed_ticks = state
            .started_at
            .map(|started_at| now.saturating_sub(started_at))
            .unwrap_or(0);
        let elapsed =
            (self.format.ticks_to_samples(elapsed_ticks) as f64 * f64::from(state.pitch)) as u64;
        let raw = state.base + elapsed;

        match &self.cursor {
            Cursor::SingleShot(resident) => {
                let total = resident.load(Ordering::Acquire);
                if total == 0 {
                    return 0;
                }
                if state.looping {
                    raw % total
                } else if raw >= total {
                    if state.status == DeviceVoiceStatus::Playing {
                        trace!("Null voice reached end of buffer");
                    }
                    state.status = DeviceVoiceStatus::Stopped;
                    state.base = 0;
                    state.started_at = None;
                    0
                } else {
                    raw
                }
            }
            Cursor::Ring(wrap) => {
                let written = self.format.bytes_to_samples(wrap.write_offset());
                let raw = if raw > written {
                    // Starved: hold at the end of the data
                    state.base = written;
                    if state.started_at.is_some() {
                        state.started_at = Some(now);
                    }
                    written
                } else {
                    raw
                };
                let physical = self.format.samples_to_bytes(raw) % wrap.buffer_size();
                wrap.sample_pos(physical)
            }
        }
    }
}

impl DeviceVoice for NullVoice {
    fn play(&self, looping: bool) {
        let mut state = self.state.lock().unwrap();
        state.looping = looping;
        if state.status != DeviceVoiceStatus::Playing {
            state.started_at = Some(self.clock.tick());
            state.status = DeviceVoiceStatus::Playing;
        }
    }

    fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status == DeviceVoiceStatus::Playing {
            let raw = self.advance(&mut state);
            if state.status == DeviceVoiceStatus::Playing {
                state.base = raw;
                state.started_at = None;
                state.status = DeviceVoiceStatus::Paused;
            }
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.base = 0;
        state.started_at = None;
        state.status = DeviceVoiceStatus::Stopped;
    }

    fn seek(&self, sample: u64) {
        let mut state = self.state.lock().unwrap();
        state.base = sample;
        if state.started_at.is_some() {
            state.started_at = Some(self.clock.tick());
        }
    }

    fn position(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        self.advance(&mut state)
    }

    fn status(&self) -> DeviceVoiceStatus {
        let mut state = self.state.lock().unwrap();
        self.advance(&mut state);
        state.status
    }

    fn set_volume(&self, volume: f32) {
        self.state.lock().unwrap().volume = volume;
    }

    fn volume(&self) -> f32 {
        self.state.lock().unwrap().volume
    }

    fn set_pitch(&self, pitch: f32) {
        let mut state = self.state.lock().unwrap();
        if state.started_at.is_some() {
            // Rebase so the old rate applies up to now
            let raw = self.advance(&mut state);
            state.base = raw;
            state.started_at = Some(self.clock.tick());
        }
        state.pitch = pitch;
    }
}
