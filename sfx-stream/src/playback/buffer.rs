//! Sound Buffer
//!
//! A buffer owns the asynchronous read pipeline for one sound resource and
//! the device storage that packets end up in. It comes in two shapes:
//!
//! - **Single-shot**: the whole resource is read in one packet and written
//!   into resident device storage. Shared between all sources playing the
//!   same resource.
//! - **Streaming**: packets are read ahead and written into a wrap-around
//!   device ring, paced by a [`PacketQueue`] that measures time against the
//!   buffer's unique voice. Never shared.
//!
//! ## States
//!
//! ```text
//!   Null ──load──► Loading ──► Ready ◄──► Blocked
//!                     ▲          │           │
//!                     └──seek────┴───────────┤
//!                                            ▼
//!                                          AtEnd          (any) ──destroy──► Dead
//! ```
//!
//! [`SoundBuffer::update`] advances the machine and reports status changes
//! to its caller, which forwards them to the voices bound to the buffer.

use crate::arena::VoiceId;
use crate::device::{BufferLayout, Device, DeviceBuffer};
use crate::error::Result;
use crate::playback::dead_list::DeadList;
use crate::playback::packet_queue::PacketQueue;
use crate::playback::voice::VoiceTimeSource;
use crate::stream::{PacketStream, PacketStreamConfig, ReaderPoolHandle, SourceStream, StreamId};
use sfx_common::{SampleFormat, SoundDescription};
use std::fmt;
use tracing::{debug, warn};

/// Buffer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferStatus {
    /// Created, not loading yet
    Null,
    /// Reading initial data
    Loading,
    /// Enough data for playback
    Ready,
    /// Playback caught up with the data; waiting for more
    Blocked,
    /// Playback consumed everything the stream will deliver
    AtEnd,
    /// Destroyed
    Dead,
}

impl fmt::Display for BufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BufferStatus::Null => "Null",
            BufferStatus::Loading => "Loading",
            BufferStatus::Ready => "Ready",
            BufferStatus::Blocked => "Blocked",
            BufferStatus::AtEnd => "AtEnd",
            BufferStatus::Dead => "Dead",
        };
        f.write_str(name)
    }
}

/// Result of one [`SoundBuffer::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferUpdate {
    /// New status, when it changed
    pub status_changed: Option<BufferStatus>,

    /// The buffer still has async work and wants further updates
    pub keep_updating: bool,

    /// A destroyed buffer finished tearing down and can be released
    pub reclaim: bool,
}

/// Result of [`SoundBuffer::destroy_self`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// No async work; release now
    Immediate,
    /// Async work pending; release after the next update
    Deferred,
    /// Destroy was already requested
    AlreadyDead,
}

/// Shared services buffers need to (re)start their streams
pub struct StreamContext<'a> {
    pub pool: &'a ReaderPoolHandle,
    pub dead_list: &'a mut DeadList,
}

/// The live read pipeline of a buffer
pub struct AsyncState {
    stream: PacketStream,

    /// Created once the buffer has a voice to measure time against
    queue: Option<PacketQueue<VoiceTimeSource>>,

    /// Stream sample this pipeline started at
    start_sample: u64,

    /// Stream sample where the next submitted packet begins
    cursor_sample: u64,

    /// Nothing submitted to the device yet
    untouched: bool,
}

impl AsyncState {
    fn new(stream: PacketStream, start_sample: u64) -> Self {
        Self {
            stream,
            queue: None,
            start_sample,
            cursor_sample: start_sample,
            untouched: true,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream.id()
    }

    pub fn stream(&self) -> &PacketStream {
        &self.stream
    }

    /// Stop the stream; true when no read is in flight
    pub fn stop(&self) -> bool {
        self.stream.stop()
    }
}

/// Device buffer plus the pipeline that fills it
pub struct SoundBuffer {
    format: SampleFormat,
    description: SoundDescription,
    stream_config: PacketStreamConfig,
    duration_samples: Option<u64>,
    status: BufferStatus,
    is_dead: bool,
    async_state: Option<AsyncState>,

    /// Source waiting for `load`
    pending_source: Option<Box<dyn SourceStream>>,

    /// Untouched copy of the source for seeking (streaming only)
    prototype: Option<Box<dyn SourceStream>>,

    device: Box<dyn DeviceBuffer>,
    unique_voice: Option<VoiceId>,

    /// Samples written to single-shot storage
    resident_samples: u64,
}

impl SoundBuffer {
    /// Create the device storage for `source`
    pub fn new(
        source: Box<dyn SourceStream>,
        description: &SoundDescription,
        device: &mut dyn Device,
    ) -> Result<Self> {
        let description = description.validated();
        let format = source.format();
        let stream_config = PacketStreamConfig::for_description(&description, format);

        let layout = if description.is_streaming {
            let packet_bytes = format.samples_to_bytes(stream_config.packet_samples);
            BufferLayout::Ring {
                bytes: packet_bytes * stream_config.fifo_capacity() as u64,
            }
        } else {
            BufferLayout::SingleShot {
                samples: source.sample_count().unwrap_or(0),
            }
        };
        let device_buffer = device.create_buffer(format, layout)?;

        let prototype = if description.is_streaming {
            source.try_clone()
        } else {
            None
        };

        Ok(Self {
            format,
            duration_samples: source.sample_count(),
            stream_config,
            description,
            status: BufferStatus::Null,
            is_dead: false,
            async_state: None,
            pending_source: Some(source),
            prototype,
            device: device_buffer,
            unique_voice: None,
            resident_samples: 0,
        })
    }

    pub fn status(&self) -> BufferStatus {
        self.status
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn description(&self) -> &SoundDescription {
        &self.description
    }

    /// Known length of the sound in samples
    pub fn duration_samples(&self) -> Option<u64> {
        self.duration_samples
    }

    pub fn is_streaming(&self) -> bool {
        self.description.is_streaming
    }

    pub fn is_looping(&self) -> bool {
        self.description.is_looping
    }

    /// Streaming buffers belong to exactly one voice
    pub fn is_unique(&self) -> bool {
        self.description.is_streaming
    }

    pub fn is_dead(&self) -> bool {
        self.is_dead
    }

    pub fn device_buffer(&self) -> &dyn DeviceBuffer {
        self.device.as_ref()
    }

    pub fn unique_voice(&self) -> Option<VoiceId> {
        self.unique_voice
    }

    pub fn has_async_state(&self) -> bool {
        self.async_state.is_some()
    }

    /// Id of the active packet stream
    pub fn stream_id(&self) -> Option<StreamId> {
        self.async_state.as_ref().map(AsyncState::stream_id)
    }

    /// Unplayed packets tracked by the streaming queue
    pub fn queued_packets(&self) -> usize {
        self.async_state
            .as_ref()
            .and_then(|s| s.queue.as_ref())
            .map(PacketQueue::len)
            .unwrap_or(0)
    }

    /// Late packets discarded by the active queue
    pub fn dropped_packets(&self) -> u64 {
        self.async_state
            .as_ref()
            .and_then(|s| s.queue.as_ref())
            .map(PacketQueue::dropped_packets)
            .unwrap_or(0)
    }

    fn set_status(&mut self, status: BufferStatus) -> Option<BufferStatus> {
        if self.status == status {
            return None;
        }
        debug!("Buffer {} -> {}", self.status, status);
        self.status = status;
        Some(status)
    }

    /// Start reading; returns whether the buffer needs updates
    pub fn load(&mut self, ctx: &mut StreamContext) -> bool {
        if self.is_dead {
            return false;
        }
        let Some(source) = self.pending_source.take() else {
            return self.async_state.is_some();
        };

        let stream = PacketStream::start(
            source,
            self.stream_config,
            ctx.pool.clone(),
            Some(ctx.dead_list.sender()),
        );
        self.async_state = Some(AsyncState::new(stream, 0));
        self.set_status(BufferStatus::Loading);
        true
    }

    /// Advance the state machine
    ///
    /// `voice_clock` is the unique voice's cursor, if the buffer has one;
    /// streaming submission waits until it does.
    pub fn update(
        &mut self,
        voice_clock: Option<VoiceTimeSource>,
        dead_list: &mut DeadList,
    ) -> BufferUpdate {
        if self.is_dead {
            if let Some(state) = self.async_state.take() {
                dead_list.retire(state);
            }
            // Reported once, on the transition into Dead
            let status_changed = self.set_status(BufferStatus::Dead);
            return BufferUpdate {
                status_changed,
                keep_updating: false,
                reclaim: status_changed.is_some(),
            };
        }

        let status_changed = if self.description.is_streaming {
            self.update_streaming(voice_clock)
        } else {
            self.update_resident(dead_list)
        };

        BufferUpdate {
            status_changed,
            keep_updating: self.async_state.is_some() && self.status != BufferStatus::AtEnd,
            reclaim: false,
        }
    }

    /// Single-shot: move the whole-resource packet into device storage
    fn update_resident(&mut self, dead_list: &mut DeadList) -> Option<BufferStatus> {
        let state = self.async_state.as_mut()?;

        let mut saw_last = false;
        while let Some(packet) = state.stream.read() {
            saw_last = packet.is_last;
            if !packet.is_padding {
                self.resident_samples += packet.samples();
                self.device.write(packet);
            }
            if saw_last {
                break;
            }
        }

        if !saw_last && !state.stream.is_finished() {
            return None;
        }

        self.duration_samples = Some(self.resident_samples);
        if let Some(state) = self.async_state.take() {
            dead_list.retire(state);
        }
        debug!(
            "Buffer loaded: {} samples ({})",
            self.resident_samples, self.format
        );
        self.set_status(BufferStatus::Ready)
    }

    /// Streaming: feed the queue and derive the status from it
    fn update_streaming(&mut self, voice_clock: Option<VoiceTimeSource>) -> Option<BufferStatus> {
        let format = self.format;
        let looping = self.description.is_looping;
        let state = self.async_state.as_mut()?;

        if state.queue.is_none() {
            state.queue = voice_clock.map(|clock| {
                PacketQueue::new(
                    clock,
                    self.stream_config.read_ahead,
                    self.description.drop_late_packets,
                    looping,
                )
            });
        }
        let queue = state.queue.as_mut()?;

        // At most one queue's worth per pass
        let mut submitted = 0;
        while submitted < queue.capacity() && queue.need_packet() {
            let Some(packet) = state.stream.read() else {
                break;
            };

            if packet.is_padding {
                self.device.write(packet);
                continue;
            }

            let is_last = packet.is_last;
            let start = state.cursor_sample;
            let end = start + packet.samples();
            let ticks = format.samples_to_ticks(end) - format.samples_to_ticks(start);
            let explicit_start = state.untouched.then(|| format.samples_to_ticks(start));
            state.untouched = false;

            queue.submit_packet(self.device.as_mut(), packet, ticks, is_last, explicit_start);
            state.cursor_sample = end;
            submitted += 1;

            if is_last {
                if self.duration_samples != Some(end) {
                    debug!("Stream length fixed at {} samples", end);
                    self.duration_samples = Some(end);
                }
                if looping {
                    queue.time_source_mut().set_stream_samples(end);
                    queue.begin_loop();
                    state.cursor_sample = 0;
                }
            }
        }

        let next = if queue.is_at_end() {
            Some(BufferStatus::AtEnd)
        } else if queue.is_empty() {
            (self.status == BufferStatus::Ready).then_some(BufferStatus::Blocked)
        } else if queue.is_full() || state.stream.is_fully_read() {
            matches!(
                self.status,
                BufferStatus::Null | BufferStatus::Loading | BufferStatus::Blocked
            )
            .then_some(BufferStatus::Ready)
        } else {
            None
        };

        next.and_then(|status| self.set_status(status))
    }

    /// Restart the stream at `sample` (streaming only)
    ///
    /// The running pipeline is retired rather than modified, since a read
    /// may be in flight on it. Returns the sample the new pipeline starts
    /// at, or `None` when the stream cannot be repositioned; the buffer is
    /// then `AtEnd`.
    pub fn seek(&mut self, sample: u64, ctx: &mut StreamContext) -> Option<u64> {
        if !self.description.is_streaming || self.is_dead {
            return None;
        }

        let target = match self.duration_samples {
            Some(n) if n > 0 && self.description.is_looping => sample % n,
            Some(n) => sample.min(n),
            None => sample,
        };

        // A pipeline that has not delivered anything yet is already in place
        if let Some(state) = &self.async_state {
            if state.untouched && state.start_sample == target {
                return Some(target);
            }
        }

        let source = self
            .prototype
            .as_ref()
            .and_then(|prototype| prototype.try_clone())
            .and_then(|mut source| (target == 0 || source.set_position(target)).then_some(source));

        if let Some(old) = self.async_state.take() {
            ctx.dead_list.retire(old);
        }
        self.device.flush();

        let Some(source) = source else {
            warn!("Stream cannot seek to sample {}, ending playback", target);
            self.set_status(BufferStatus::AtEnd);
            return None;
        };

        debug!("Buffer seek to sample {}", target);
        let stream = PacketStream::start(
            source,
            self.stream_config,
            ctx.pool.clone(),
            Some(ctx.dead_list.sender()),
        );
        self.async_state = Some(AsyncState::new(stream, target));
        self.set_status(BufferStatus::Loading);
        Some(target)
    }

    /// Bind the buffer's unique voice
    pub fn attach_voice(&mut self, voice: VoiceId) {
        self.unique_voice = Some(voice);
    }

    /// Unbind the unique voice
    ///
    /// The queue measured time against that voice, so it goes too; the next
    /// voice repositions the stream with [`seek`](Self::seek).
    pub fn detach_voice(&mut self) {
        self.unique_voice = None;
        if let Some(state) = self.async_state.as_mut() {
            state.queue = None;
        }
    }

    /// Request destruction
    ///
    /// Idempotent. A buffer with async work is torn down by its next
    /// [`update`](Self::update), which reports `reclaim`.
    pub fn destroy_self(&mut self) -> DestroyOutcome {
        if self.is_dead {
            return DestroyOutcome::AlreadyDead;
        }
        self.is_dead = true;
        self.unique_voice = None;
        self.pending_source = None;

        if self.async_state.is_none() {
            self.set_status(BufferStatus::Dead);
            DestroyOutcome::Immediate
        } else {
            DestroyOutcome::Deferred
        }
    }

    /// Stop async work outright (device loss)
    pub fn stop_async(&mut self, dead_list: &mut DeadList) {
        if let Some(state) = self.async_state.take() {
            dead_list.retire(state);
        }
    }
}

impl Drop for SoundBuffer {
    fn drop(&mut self) {
        if let Some(state) = self.async_state.take() {
            // Readers may still hold the stream; make them stop reading
            state.stop();
        }
    }
}

impl fmt::Debug for SoundBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundBuffer")
            .field("format", &self.format)
            .field("status", &self.status)
            .field("streaming", &self.description.is_streaming)
            .field("duration_samples", &self.duration_samples)
            .field("is_dead", &self.is_dead)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;
    use crate::stream::{MemoryStream, ReaderPool};
    use crate::time_source::{ManualClock, TimeSource};
    use std::sync::Arc;

    fn mono16() -> SampleFormat {
        SampleFormat::new(1, 16, 1000).unwrap()
    }

    #[test]
    fn test_single_shot_ready_after_one_update() {
        let clock = Arc::new(ManualClock::new());
        let mut device = NullDevice::new(clock as Arc<dyn TimeSource>, 4);
        let pool = ReaderPool::inline();
        let mut dead_list = DeadList::new();

        let source = MemoryStream::counting(mono16(), 1234);
        let mut buffer =
            SoundBuffer::new(Box::new(source), &SoundDescription::default(), &mut device).unwrap();
        assert_eq!(buffer.status(), BufferStatus::Null);

        let handle = pool.handle();
        let mut ctx = StreamContext {
            pool: &handle,
            dead_list: &mut dead_list,
        };
        assert!(buffer.load(&mut ctx));
        assert_eq!(buffer.status(), BufferStatus::Loading);

        let update = buffer.update(None, &mut dead_list);
        assert_eq!(update.status_changed, Some(BufferStatus::Ready));
        assert!(!update.keep_updating);
        assert_eq!(buffer.duration_samples(), Some(1234));
        assert!(!buffer.has_async_state());
        assert_eq!(dead_list.parked(), 0);
    }

    #[test]
    fn test_streaming_waits_for_voice() {
        let clock = Arc::new(ManualClock::new());
        let mut device = NullDevice::new(clock as Arc<dyn TimeSource>, 4);
        let pool = ReaderPool::inline();
        let mut dead_list = DeadList::new();

        let source = MemoryStream::counting(mono16(), 5000);
        let description = SoundDescription::streaming(1.0, 3);
        let mut buffer = SoundBuffer::new(Box::new(source), &description, &mut device).unwrap();
        assert!(buffer.is_unique());

        let handle = pool.handle();
        let mut ctx = StreamContext {
            pool: &handle,
            dead_list: &mut dead_list,
        };
        buffer.load(&mut ctx);

        let update = buffer.update(None, &mut dead_list);
        assert_eq!(update.status_changed, None);
        assert!(update.keep_updating);
        assert_eq!(buffer.status(), BufferStatus::Loading);
        assert_eq!(buffer.queued_packets(), 0);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let clock = Arc::new(ManualClock::new());
        let mut device = NullDevice::new(clock as Arc<dyn TimeSource>, 4);
        let pool = ReaderPool::inline();
        let mut dead_list = DeadList::new();

        let source = MemoryStream::counting(mono16(), 5000);
        let mut buffer = SoundBuffer::new(
            Box::new(source),
            &SoundDescription::streaming(1.0, 3),
            &mut device,
        )
        .unwrap();
        let handle = pool.handle();
        buffer.load(&mut StreamContext {
            pool: &handle,
            dead_list: &mut dead_list,
        });

        assert_eq!(buffer.destroy_self(), DestroyOutcome::Deferred);
        assert_eq!(buffer.destroy_self(), DestroyOutcome::AlreadyDead);

        let update = buffer.update(None, &mut dead_list);
        assert!(update.reclaim);
        assert_eq!(update.status_changed, Some(BufferStatus::Dead));
        assert_eq!(dead_list.retired(), 1);
        assert_eq!(buffer.destroy_self(), DestroyOutcome::AlreadyDead);
        assert!(!buffer.update(None, &mut dead_list).reclaim);
    }

    #[test]
    fn test_destroy_without_async_is_immediate() {
        let clock = Arc::new(ManualClock::new());
        let mut device = NullDevice::new(clock as Arc<dyn TimeSource>, 4);
        let source = MemoryStream::counting(mono16(), 10);
        let mut buffer =
            SoundBuffer::new(Box::new(source), &SoundDescription::default(), &mut device).unwrap();

        assert_eq!(buffer.destroy_self(), DestroyOutcome::Immediate);
        assert_eq!(buffer.status(), BufferStatus::Dead);
    }
}
