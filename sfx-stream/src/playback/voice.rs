//! Sound Voice
//!
//! A voice binds one device voice to one buffer. It owns the device voice
//! and refers to the buffer weakly (by [`BufferId`]): when the buffer is gone
//! the voice reports `Null` and position 0 instead of failing.
//!
//! Streaming voices translate between the device cursor, which restarts at
//! zero after every seek, and the absolute stream position by carrying the
//! seek target as an `offset`.
//!
//! ## Reaction to buffer status
//!
//! | Buffer  | Voice action                                        |
//! |---------|-----------------------------------------------------|
//! | Loading | stop device; a playing voice becomes `Blocked`      |
//! | AtEnd   | stop device; `Stopped`, offset back to 0            |
//! | Blocked | pause device; a playing voice becomes `Blocked`     |
//! | Ready   | a `Blocked` voice resumes and becomes `Playing`     |
//! | Dead    | stop device; `Null`                                 |

use crate::arena::BufferId;
use crate::device::{DeviceVoice, DeviceVoiceStatus};
use crate::playback::buffer::{BufferStatus, SoundBuffer, StreamContext};
use crate::time_source::TimeSource;
use sfx_common::SampleFormat;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Voice state as seen by sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceStatus {
    /// No usable buffer
    Null,
    Playing,
    Paused,
    Stopped,
    /// Wants to play but the buffer has no data yet
    Blocked,
}

/// Tick source reading a device voice's cursor in stream time
///
/// Not clamped: a non-looping stream's clock may run past the end (through
/// trailing silence), which is how the packet queue detects the end.
#[derive(Clone)]
pub struct VoiceTimeSource {
    device: Arc<dyn DeviceVoice>,
    format: SampleFormat,
    offset: u64,
    stream_samples: Option<u64>,
    looping: bool,
}

impl VoiceTimeSource {
    /// Loop length, once a stream of unknown length has been read through
    pub fn set_stream_samples(&mut self, samples: u64) {
        self.stream_samples = Some(samples);
    }
}

impl TimeSource for VoiceTimeSource {
    fn tick(&self) -> u64 {
        let mut sample = self.device.position() + self.offset;
        if self.looping {
            if let Some(n) = self.stream_samples.filter(|n| *n > 0) {
                sample %= n;
            }
        }
        self.format.samples_to_ticks(sample)
    }
}

impl fmt::Debug for VoiceTimeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceTimeSource")
            .field("offset", &self.offset)
            .field("stream_samples", &self.stream_samples)
            .field("looping", &self.looping)
            .finish()
    }
}

/// Playback handle over one buffer
pub struct SoundVoice {
    buffer: BufferId,
    device: Arc<dyn DeviceVoice>,
    format: SampleFormat,
    is_streaming: bool,
    is_looping: bool,
    status: VoiceStatus,

    /// Stream sample the device cursor's zero corresponds to
    offset: u64,

    /// Next play must restart the stream from the beginning
    needs_rewind: bool,
}

impl SoundVoice {
    pub fn new(buffer_id: BufferId, buffer: &SoundBuffer, device: Arc<dyn DeviceVoice>) -> Self {
        Self {
            buffer: buffer_id,
            device,
            format: buffer.format(),
            is_streaming: buffer.is_streaming(),
            is_looping: buffer.is_looping(),
            status: VoiceStatus::Stopped,
            offset: 0,
            needs_rewind: false,
        }
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer
    }

    pub fn device_voice(&self) -> &Arc<dyn DeviceVoice> {
        &self.device
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Streams loop by rewinding the source; only resident sounds loop on
    /// the device
    fn device_looping(&self) -> bool {
        self.is_looping && !self.is_streaming
    }

    /// Clock for the buffer's packet queue
    pub fn time_source(&self, buffer: &SoundBuffer) -> VoiceTimeSource {
        VoiceTimeSource {
            device: Arc::clone(&self.device),
            format: self.format,
            offset: self.offset,
            stream_samples: buffer.duration_samples(),
            looping: self.is_looping,
        }
    }

    /// Status as of the last update, without polling the device
    pub fn last_status(&self) -> VoiceStatus {
        self.status
    }

    /// Current status, picking up device-side stops
    pub fn status(&mut self, buffer: Option<&SoundBuffer>) -> VoiceStatus {
        if buffer.is_none() {
            return VoiceStatus::Null;
        }
        if self.status == VoiceStatus::Playing
            && self.device.status() == DeviceVoiceStatus::Stopped
        {
            trace!("Device voice stopped on its own");
            self.status = VoiceStatus::Stopped;
            self.offset = 0;
            self.needs_rewind = self.is_streaming;
        }
        self.status
    }

    /// Position in samples
    ///
    /// Streaming positions wrap when looping and otherwise stay inside the
    /// stream, `[0, length)`.
    pub fn position(&self, buffer: Option<&SoundBuffer>) -> u64 {
        let Some(buffer) = buffer else {
            return 0;
        };
        let raw = self.device.position();
        if !self.is_streaming {
            return raw;
        }

        let sample = raw + self.offset;
        match buffer.duration_samples() {
            Some(n) if n > 0 && self.is_looping => sample % n,
            Some(n) if n > 0 => sample.min(n - 1),
            _ => sample,
        }
    }

    /// Start or resume playback
    ///
    /// Returns whether the buffer restarted its stream (and so needs
    /// updates).
    pub fn play(&mut self, buffer: Option<&mut SoundBuffer>, ctx: &mut StreamContext) -> bool {
        let Some(buffer) = buffer else {
            self.status = VoiceStatus::Null;
            return false;
        };

        let mut restarted = false;
        if self.is_streaming && (self.needs_rewind || buffer.status() == BufferStatus::AtEnd) {
            restarted = self.seek_stream(0, buffer, ctx);
            self.needs_rewind = false;
        }

        match buffer.status() {
            BufferStatus::Ready => {
                self.device.play(self.device_looping());
                self.status = VoiceStatus::Playing;
            }
            BufferStatus::Null | BufferStatus::Loading | BufferStatus::Blocked => {
                self.status = VoiceStatus::Blocked;
            }
            BufferStatus::AtEnd => {
                self.status = VoiceStatus::Stopped;
            }
            BufferStatus::Dead => {
                self.status = VoiceStatus::Null;
            }
        }
        restarted
    }

    pub fn pause(&mut self) {
        match self.status {
            VoiceStatus::Playing => {
                self.device.pause();
                self.status = VoiceStatus::Paused;
            }
            VoiceStatus::Blocked => {
                self.device.pause();
                self.status = VoiceStatus::Paused;
            }
            _ => {}
        }
    }

    pub fn stop(&mut self) {
        self.device.stop();
        self.status = VoiceStatus::Stopped;
        self.offset = 0;
        self.needs_rewind = self.is_streaming;
    }

    /// Move to `sample`
    ///
    /// Resident sounds seek the device cursor. Streams restart their
    /// pipeline at the target and record it as the offset. Returns whether
    /// the buffer restarted its stream.
    pub fn set_position(
        &mut self,
        sample: u64,
        buffer: Option<&mut SoundBuffer>,
        ctx: &mut StreamContext,
    ) -> bool {
        let Some(buffer) = buffer else {
            return false;
        };

        if !self.is_streaming {
            let sample = match buffer.duration_samples() {
                Some(n) if n > 0 && self.is_looping => sample % n,
                Some(n) => sample.min(n),
                None => sample,
            };
            self.device.seek(sample);
            return false;
        }

        let restarted = self.seek_stream(sample, buffer, ctx);
        self.needs_rewind = false;
        restarted
    }

    fn seek_stream(&mut self, sample: u64, buffer: &mut SoundBuffer, ctx: &mut StreamContext) -> bool {
        match buffer.seek(sample, ctx) {
            Some(target) => {
                self.offset = target;
                self.on_buffer_status(buffer.status());
                // The ring was flushed, so the device cursor starts over
                self.device.stop();
                true
            }
            None => {
                self.on_buffer_status(BufferStatus::AtEnd);
                false
            }
        }
    }

    /// React to a buffer status change
    pub fn on_buffer_status(&mut self, status: BufferStatus) {
        match status {
            BufferStatus::Loading => {
                self.device.stop();
                if matches!(self.status, VoiceStatus::Playing | VoiceStatus::Blocked) {
                    self.status = VoiceStatus::Blocked;
                }
            }
            BufferStatus::AtEnd => {
                self.device.stop();
                self.status = VoiceStatus::Stopped;
                self.offset = 0;
                self.needs_rewind = self.is_streaming;
            }
            BufferStatus::Blocked => {
                if self.status == VoiceStatus::Playing {
                    self.device.pause();
                    self.status = VoiceStatus::Blocked;
                }
            }
            BufferStatus::Ready => {
                if self.status == VoiceStatus::Blocked {
                    self.device.play(self.device_looping());
                    self.status = VoiceStatus::Playing;
                }
            }
            BufferStatus::Dead | BufferStatus::Null => {
                self.device.stop();
                self.status = VoiceStatus::Null;
            }
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.device.set_volume(volume);
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.device.set_pitch(pitch);
    }

    pub fn set_transform(&self, position: [f32; 3], velocity: [f32; 3]) {
        self.device.set_transform(position, velocity);
    }
}

impl fmt::Debug for SoundVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundVoice")
            .field("buffer", &self.buffer)
            .field("status", &self.status)
            .field("offset", &self.offset)
            .field("streaming", &self.is_streaming)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, NullDevice};
    use crate::playback::dead_list::DeadList;
    use crate::stream::{MemoryStream, ReaderPool};
    use crate::time_source::ManualClock;
    use sfx_common::SoundDescription;

    fn mono16() -> SampleFormat {
        SampleFormat::new(1, 16, 1000).unwrap()
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        device: NullDevice,
        pool: ReaderPool,
        dead_list: DeadList,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new());
            Self {
                device: NullDevice::new(clock.clone() as Arc<dyn TimeSource>, 4),
                clock,
                pool: ReaderPool::inline(),
                dead_list: DeadList::new(),
            }
        }

        fn loaded(&mut self, samples: u64, description: SoundDescription) -> SoundBuffer {
            let source = MemoryStream::counting(mono16(), samples);
            let mut buffer = SoundBuffer::new(Box::new(source), &description, &mut self.device).unwrap();
            let handle = self.pool.handle();
            buffer.load(&mut StreamContext {
                pool: &handle,
                dead_list: &mut self.dead_list,
            });
            buffer
        }

        fn voice(&mut self, buffer: &mut SoundBuffer) -> SoundVoice {
            let device_voice = self.device.create_voice(false, buffer.device_buffer()).unwrap();
            let mut arena = crate::arena::Arena::<BufferId, ()>::new();
            let id = arena.insert(());
            SoundVoice::new(id, buffer, device_voice)
        }
    }

    #[test]
    fn test_missing_buffer_is_null() {
        let mut fx = Fixture::new();
        let mut buffer = fx.loaded(100, SoundDescription::default());
        let mut voice = fx.voice(&mut buffer);
        assert_eq!(voice.status(None), VoiceStatus::Null);
        assert_eq!(voice.position(None), 0);
    }

    #[test]
    fn test_play_while_loading_blocks_then_resumes() {
        let mut fx = Fixture::new();
        let mut buffer = fx.loaded(500, SoundDescription::default());
        let mut voice = fx.voice(&mut buffer);

        let handle = fx.pool.handle();
        let mut ctx = StreamContext {
            pool: &handle,
            dead_list: &mut fx.dead_list,
        };
        voice.play(Some(&mut buffer), &mut ctx);
        assert_eq!(voice.status(Some(&buffer)), VoiceStatus::Blocked);

        let update = buffer.update(None, &mut fx.dead_list);
        voice.on_buffer_status(update.status_changed.unwrap());
        assert_eq!(voice.status(Some(&buffer)), VoiceStatus::Playing);

        fx.clock.advance(100);
        assert_eq!(voice.position(Some(&buffer)), 100);
    }

    #[test]
    fn test_at_end_stops_and_rewinds() {
        let mut fx = Fixture::new();
        let mut buffer = fx.loaded(500, SoundDescription::default());
        buffer.update(None, &mut fx.dead_list);
        let mut voice = fx.voice(&mut buffer);

        let handle = fx.pool.handle();
        voice.play(
            Some(&mut buffer),
            &mut StreamContext {
                pool: &handle,
                dead_list: &mut fx.dead_list,
            },
        );
        fx.clock.advance(250);

        voice.on_buffer_status(BufferStatus::AtEnd);
        assert_eq!(voice.status(Some(&buffer)), VoiceStatus::Stopped);
        assert_eq!(voice.position(Some(&buffer)), 0);
    }

    #[test]
    fn test_blocked_pauses_only_playing_voice() {
        let mut fx = Fixture::new();
        let mut buffer = fx.loaded(500, SoundDescription::default());
        let mut voice = fx.voice(&mut buffer);

        voice.on_buffer_status(BufferStatus::Blocked);
        assert_eq!(voice.status(Some(&buffer)), VoiceStatus::Stopped);

        voice.on_buffer_status(BufferStatus::Ready);
        assert_eq!(voice.status(Some(&buffer)), VoiceStatus::Stopped);
    }

    #[test]
    fn test_resident_seek_is_clamped() {
        let mut fx = Fixture::new();
        let mut buffer = fx.loaded(500, SoundDescription::default());
        buffer.update(None, &mut fx.dead_list);
        let mut voice = fx.voice(&mut buffer);

        let handle = fx.pool.handle();
        let mut ctx = StreamContext {
            pool: &handle,
            dead_list: &mut fx.dead_list,
        };
        voice.set_position(300, Some(&mut buffer), &mut ctx);
        assert_eq!(voice.position(Some(&buffer)), 300);
    }
}
