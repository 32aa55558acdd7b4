//! Sound System
//!
//! The device context every other piece hangs off. It owns the device, the
//! buffer / voice / source arenas, the reader pool, the buffer update list,
//! the resource cache and the dead list, and it runs the per-frame update:
//!
//! 1. release parked stream states whose readers have gone quiet
//! 2. per-frame device work
//! 3. advance buffers on the update list (round-robin, soft time budget)
//!    and forward their status changes to the voices bound to them
//! 4. reconcile sources with their voices, poll effects
//! 5. voice assignment: the highest-priority audible playing sources get
//!    device voices, the rest play virtually on their timers
//!
//! The system is single-owner. Callers that want a background update wrap
//! it in `Arc<Mutex<_>>` and use [`UpdateThread`](super::UpdateThread).

use crate::arena::{Arena, BufferId, SourceId, VoiceId};
use crate::device::{Device, Listener};
use crate::error::{Error, Result};
use crate::events::SoundEvent;
use crate::playback::buffer::{BufferStatus, DestroyOutcome, SoundBuffer, StreamContext};
use crate::playback::dead_list::DeadList;
use crate::playback::effects::FadeCompletion;
use crate::playback::source::{SoundProfile, Source, SourceStatus};
use crate::playback::voice::{SoundVoice, VoiceStatus};
use crate::stream::{ReaderPool, ReaderPoolHandle, SourceStream};
use crate::time_source::TimeSource;
use sfx_common::config::SystemConfig;
use sfx_common::timing::{seconds_to_ticks, ticks_to_seconds};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};

struct BufferEntry {
    buffer: SoundBuffer,
    /// Sources holding the buffer
    refs: usize,
    cache_key: Option<String>,
}

/// Snapshot of system bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemStats {
    pub sources: usize,
    /// Playing sources without a device voice
    pub virtual_sources: usize,
    pub buffers: usize,
    pub voices: usize,
    pub update_list: usize,
    /// Retired stream states waiting for their reader
    pub parked_states: usize,
    /// Buffers destroyed and released since startup
    pub reclaimed_buffers: u64,
    pub updates: u64,
}

pub struct SoundSystem {
    device: Option<Box<dyn Device>>,
    clock: Arc<dyn TimeSource>,
    pool: ReaderPool,
    pool_handle: ReaderPoolHandle,

    buffers: Arena<BufferId, BufferEntry>,
    voices: Arena<VoiceId, SoundVoice>,
    sources: Arena<SourceId, Source>,

    /// Buffers with async work, visited round-robin
    update_list: Vec<BufferId>,
    next_update: usize,
    update_budget: Option<Duration>,

    /// Shared resident buffers by profile name
    cache: HashMap<String, BufferId>,

    dead_list: DeadList,
    listener: Listener,
    events: Option<UnboundedSender<SoundEvent>>,

    reclaimed_buffers: u64,
    updates: u64,
}

fn not_found(id: SourceId) -> Error {
    Error::NotFound(id.to_string())
}

impl SoundSystem {
    pub fn new(clock: Arc<dyn TimeSource>, pool: ReaderPool) -> Self {
        let pool_handle = pool.handle();
        Self {
            device: None,
            clock,
            pool,
            pool_handle,
            buffers: Arena::new(),
            voices: Arena::new(),
            sources: Arena::new(),
            update_list: Vec::new(),
            next_update: 0,
            update_budget: None,
            cache: HashMap::new(),
            dead_list: DeadList::new(),
            listener: Listener::default(),
            events: None,
            reclaimed_buffers: 0,
            updates: 0,
        }
    }

    /// System with the reader pool and update budget from `config`
    pub fn from_config(config: &SystemConfig, clock: Arc<dyn TimeSource>) -> Self {
        let mut system = Self::new(clock, ReaderPool::new(config.reader_threads));
        if config.update_budget_ms > 0 {
            system.update_budget = Some(Duration::from_millis(config.update_budget_ms));
        }
        system
    }

    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    pub fn reader_threads(&self) -> usize {
        self.pool.thread_count()
    }

    pub fn set_update_budget(&mut self, budget: Option<Duration>) {
        self.update_budget = budget;
    }

    pub fn set_event_channel(&mut self, events: UnboundedSender<SoundEvent>) {
        self.events = Some(events);
    }

    pub fn set_listener(&mut self, listener: Listener) {
        self.listener = listener;
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device.as_deref().map(|device| device.name())
    }

    fn emit(&self, event: SoundEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                trace!("Event receiver dropped");
            }
        }
    }

    // ------------------------------------------------------------------
    // Device lifecycle
    // ------------------------------------------------------------------

    /// Start using `device`; replaces any current device
    pub fn init(&mut self, device: Box<dyn Device>) {
        if self.device.is_some() {
            self.shutdown();
        }
        info!(
            "Sound system using device '{}' ({} voices, {} reader threads)",
            device.name(),
            device.max_voices(),
            self.pool.thread_count()
        );
        self.device = Some(device);
        self.assign_voices();
    }

    /// Release every device resource; sources stay and play virtually
    pub fn shutdown(&mut self) {
        let Some(name) = self.device_name().map(str::to_string) else {
            return;
        };
        self.release_device_resources();
        self.device = None;
        info!("Sound system released device '{}'", name);
    }

    /// The device went away underneath us
    pub fn device_lost(&mut self) {
        let Some(name) = self.device_name().map(str::to_string) else {
            return;
        };
        warn!("Device '{}' lost; all sources continue virtually", name);
        self.release_device_resources();
        self.device = None;
        self.emit(SoundEvent::DeviceLost { device: name });
    }

    fn release_device_resources(&mut self) {
        for sid in self.sources.keys() {
            self.release_voice(sid, true);
        }
        for bid in self.buffers.keys() {
            if let Some(mut entry) = self.buffers.remove(bid) {
                entry.buffer.stop_async(&mut self.dead_list);
            }
        }
        for (_, source) in self.sources.iter_mut() {
            source.buffer = None;
        }
        self.cache.clear();
        self.update_list.clear();
        self.next_update = 0;
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    /// Create a stopped source for `profile`
    ///
    /// Fails only when the profile's stream cannot be opened. Without a
    /// device the source is created bufferless and plays virtually.
    pub fn create_source(&mut self, profile: Arc<SoundProfile>) -> Result<SourceId> {
        let stream = profile
            .provider
            .open()
            .ok_or_else(|| Error::Stream(format!("cannot open '{}'", profile.name)))?;
        let format = stream.format();
        let duration = stream.sample_count();

        let sid = self
            .sources
            .insert(Source::new(Arc::clone(&profile), format, duration));
        let buffer = self.acquire_buffer(&profile, stream);
        if let Some(source) = self.sources.get_mut(sid) {
            source.buffer = buffer;
        }
        debug!(
            "{} created for '{}' ({}, {:?} samples, buffer {:?})",
            sid, profile.name, format, duration, buffer
        );
        Ok(sid)
    }

    pub fn delete_source(&mut self, id: SourceId) -> Result<()> {
        if !self.sources.contains(id) {
            return Err(not_found(id));
        }
        self.release_voice(id, false);
        if let Some(buffer) = self.sources.remove(id).and_then(|source| source.buffer) {
            self.release_buffer(buffer);
        }
        debug!("{} deleted", id);
        Ok(())
    }

    pub fn source(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(id)
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.keys()
    }

    pub fn status(&self, id: SourceId) -> Result<SourceStatus> {
        self.sources
            .get(id)
            .map(|source| source.status())
            .ok_or_else(|| not_found(id))
    }

    /// Start or resume playback
    ///
    /// `fade_in` overrides the profile's fade-in time. A source that gets
    /// no voice plays virtually until the assignment pass grants one.
    pub fn play(&mut self, id: SourceId, fade_in: Option<f32>) -> Result<()> {
        let now = self.clock.tick();
        let source = self.sources.get_mut(id).ok_or_else(|| not_found(id))?;
        if source.status() == SourceStatus::Playing && !source.has_transition_fade() {
            return Ok(());
        }

        let fade_in = fade_in.unwrap_or(source.description().fade_in_time);
        let previous = source.begin_play(now, fade_in);
        debug!("{} play ({} -> playing, fade in {}s)", id, previous, fade_in);

        match source.voice {
            Some(vid) => {
                let volume = source.effective_volume();
                self.resume_voice(vid, volume);
            }
            None => {
                if previous == SourceStatus::Stopped {
                    source.timer.reset();
                }
                source.timer.start(self.clock.as_ref());
                self.assign_voices();
            }
        }

        if previous != SourceStatus::Playing {
            self.emit(SoundEvent::StatusChanged {
                source: id,
                status: SourceStatus::Playing,
            });
        }
        Ok(())
    }

    /// Pause, optionally after fading out for `fade_out` seconds
    pub fn pause(&mut self, id: SourceId, fade_out: Option<f32>) -> Result<()> {
        let now = self.clock.tick();
        let source = self.sources.get_mut(id).ok_or_else(|| not_found(id))?;
        if source.status() != SourceStatus::Playing {
            return Ok(());
        }
        match fade_out.filter(|secs| *secs > 0.0) {
            Some(secs) => source.begin_fade_out(now, secs, FadeCompletion::Pause),
            None => self.pause_now(id),
        }
        Ok(())
    }

    /// Stop, optionally after fading out for `fade_out` seconds
    pub fn stop(&mut self, id: SourceId, fade_out: Option<f32>) -> Result<()> {
        let now = self.clock.tick();
        let source = self.sources.get_mut(id).ok_or_else(|| not_found(id))?;
        match (source.status(), fade_out.filter(|secs| *secs > 0.0)) {
            (SourceStatus::Stopped, _) => {}
            (SourceStatus::Playing, Some(secs)) => {
                source.begin_fade_out(now, secs, FadeCompletion::Stop)
            }
            _ => self.stop_now(id),
        }
        Ok(())
    }

    fn pause_now(&mut self, id: SourceId) {
        let Some(source) = self.sources.get_mut(id) else {
            return;
        };
        source.clear_fades();
        if !source.set_status(SourceStatus::Paused) {
            return;
        }
        match source.voice {
            Some(vid) => {
                if let Some(voice) = self.voices.get_mut(vid) {
                    voice.pause();
                }
            }
            None => source.timer.pause(self.clock.as_ref()),
        }
        debug!("{} paused", id);
        self.emit(SoundEvent::StatusChanged {
            source: id,
            status: SourceStatus::Paused,
        });
    }

    fn stop_now(&mut self, id: SourceId) {
        let Some(source) = self.sources.get_mut(id) else {
            return;
        };
        source.clear_fades();
        source.timer.reset();
        let changed = source.set_status(SourceStatus::Stopped);
        if let Some(voice) = source.voice.and_then(|vid| self.voices.get_mut(vid)) {
            voice.stop();
        }
        if changed {
            debug!("{} stopped", id);
            self.emit(SoundEvent::StatusChanged {
                source: id,
                status: SourceStatus::Stopped,
            });
        }
    }

    /// Move playback to `seconds`, clamped to the sound (wrapped when looping)
    pub fn set_position(&mut self, id: SourceId, seconds: f32) -> Result<()> {
        let source = self.sources.get_mut(id).ok_or_else(|| not_found(id))?;
        let ticks = source.wrap_ticks(seconds_to_ticks(seconds.max(0.0)));

        match source.voice {
            Some(vid) => {
                let sample = source.format().ticks_to_samples(ticks);
                let paused = source.status() == SourceStatus::Paused;
                self.seek_voice(vid, sample, paused);
            }
            None => source.timer.set_position(ticks, self.clock.as_ref()),
        }
        trace!("{} position set to {} ticks", id, ticks);
        Ok(())
    }

    /// Playback position in seconds
    pub fn position(&self, id: SourceId) -> Result<f32> {
        self.position_ticks(id)
            .map(ticks_to_seconds)
            .ok_or_else(|| not_found(id))
    }

    fn position_ticks(&self, id: SourceId) -> Option<u64> {
        let source = self.sources.get(id)?;
        if let Some(voice) = source.voice.and_then(|vid| self.voices.get(vid)) {
            let buffer = self.buffers.get(voice.buffer_id()).map(|entry| &entry.buffer);
            return Some(source.format().samples_to_ticks(voice.position(buffer)));
        }
        Some(source.virtual_position(self.clock.as_ref()))
    }

    pub fn set_volume(&mut self, id: SourceId, volume: f32) -> Result<()> {
        let source = self.sources.get_mut(id).ok_or_else(|| not_found(id))?;
        source.set_volume(volume);
        if let Some(voice) = source.voice.and_then(|vid| self.voices.get(vid)) {
            voice.set_volume(source.effective_volume());
        }
        Ok(())
    }

    pub fn set_pitch(&mut self, id: SourceId, pitch: f32) -> Result<()> {
        let source = self.sources.get_mut(id).ok_or_else(|| not_found(id))?;
        source.set_pitch(pitch);
        if let Some(voice) = source.voice.and_then(|vid| self.voices.get(vid)) {
            voice.set_pitch(source.pitch());
        }
        Ok(())
    }

    pub fn set_transform(&mut self, id: SourceId, position: [f32; 3], velocity: [f32; 3]) -> Result<()> {
        let source = self.sources.get_mut(id).ok_or_else(|| not_found(id))?;
        source.set_transform(position, velocity);
        if let Some(voice) = source.voice.and_then(|vid| self.voices.get(vid)) {
            voice.set_transform(position, velocity);
        }
        Ok(())
    }

    /// Emit [`SoundEvent::MarkerPassed`] once playback reaches `seconds`
    pub fn add_marker(&mut self, id: SourceId, name: impl Into<String>, seconds: f32) -> Result<()> {
        let source = self.sources.get_mut(id).ok_or_else(|| not_found(id))?;
        source.add_marker(name, seconds_to_ticks(seconds.max(0.0)));
        Ok(())
    }

    pub fn has_voice(&self, id: SourceId) -> bool {
        self.sources
            .get(id)
            .is_some_and(|source| source.voice.is_some())
    }

    pub fn voice(&self, id: SourceId) -> Option<&SoundVoice> {
        self.sources.get(id)?.voice.and_then(|vid| self.voices.get(vid))
    }

    /// Device voice position of a voiced source, in samples
    pub fn voice_position(&self, id: SourceId) -> Option<u64> {
        let voice = self.sources.get(id)?.voice.and_then(|vid| self.voices.get(vid))?;
        let buffer = self.buffers.get(voice.buffer_id()).map(|entry| &entry.buffer);
        Some(voice.position(buffer))
    }

    pub fn buffer_status(&self, id: BufferId) -> Option<BufferStatus> {
        self.buffers.get(id).map(|entry| entry.buffer.status())
    }

    pub fn buffer(&self, id: BufferId) -> Option<&SoundBuffer> {
        self.buffers.get(id).map(|entry| &entry.buffer)
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats {
            sources: self.sources.len(),
            virtual_sources: self
                .sources
                .iter()
                .filter(|(_, s)| s.status() == SourceStatus::Playing && s.voice.is_none())
                .count(),
            buffers: self.buffers.len(),
            voices: self.voices.len(),
            update_list: self.update_list.len(),
            parked_states: self.dead_list.parked(),
            reclaimed_buffers: self.reclaimed_buffers,
            updates: self.updates,
        }
    }

    // ------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------

    /// Shared resident buffer from the cache, or a new one over `stream`
    fn acquire_buffer(&mut self, profile: &SoundProfile, stream: Box<dyn SourceStream>) -> Option<BufferId> {
        let device = self.device.as_mut()?;
        let shared = !profile.description.is_streaming;

        if shared {
            if let Some(&bid) = self.cache.get(&profile.name) {
                if let Some(entry) = self.buffers.get_mut(bid).filter(|e| !e.buffer.is_dead()) {
                    entry.refs += 1;
                    trace!("'{}' shares {} ({} refs)", profile.name, bid, entry.refs);
                    return Some(bid);
                }
                self.cache.remove(&profile.name);
            }
        }

        let buffer = match SoundBuffer::new(stream, &profile.description, device.as_mut()) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("No buffer for '{}': {}", profile.name, e);
                return None;
            }
        };

        let cache_key = shared.then(|| profile.name.clone());
        let bid = self.buffers.insert(BufferEntry {
            buffer,
            refs: 1,
            cache_key: cache_key.clone(),
        });
        if let Some(key) = cache_key {
            self.cache.insert(key, bid);
        }

        let needs_updates = match self.buffers.get_mut(bid) {
            Some(entry) => entry.buffer.load(&mut StreamContext {
                pool: &self.pool_handle,
                dead_list: &mut self.dead_list,
            }),
            None => false,
        };
        if needs_updates {
            self.schedule_buffer(bid);
        }
        Some(bid)
    }

    /// The source's live buffer, recreated after device loss
    fn ensure_buffer(&mut self, sid: SourceId) -> Option<BufferId> {
        let source = self.sources.get(sid)?;
        if let Some(bid) = source.buffer {
            if self.buffers.get(bid).is_some_and(|entry| !entry.buffer.is_dead()) {
                return Some(bid);
            }
        }

        let profile = Arc::clone(source.profile());
        let Some(stream) = profile.provider.open() else {
            warn!("{}: cannot reopen '{}'", sid, profile.name);
            return None;
        };
        let bid = self.acquire_buffer(&profile, stream)?;
        if let Some(source) = self.sources.get_mut(sid) {
            source.buffer = Some(bid);
        }
        Some(bid)
    }

    fn release_buffer(&mut self, id: BufferId) {
        let Some(entry) = self.buffers.get_mut(id) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            self.destroy_buffer(id);
        }
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        let Some(entry) = self.buffers.get_mut(id) else {
            return;
        };
        match entry.buffer.destroy_self() {
            DestroyOutcome::Immediate => self.reclaim_buffer(id),
            DestroyOutcome::Deferred => self.schedule_buffer(id),
            DestroyOutcome::AlreadyDead => {}
        }
    }

    fn reclaim_buffer(&mut self, id: BufferId) {
        let Some(entry) = self.buffers.remove(id) else {
            return;
        };
        if let Some(key) = entry.cache_key {
            if self.cache.get(&key) == Some(&id) {
                self.cache.remove(&key);
            }
        }
        self.update_list.retain(|bid| *bid != id);
        self.reclaimed_buffers += 1;
        debug!("{} reclaimed", id);
    }

    fn schedule_buffer(&mut self, id: BufferId) {
        if !self.update_list.contains(&id) {
            self.update_list.push(id);
        }
    }

    // ------------------------------------------------------------------
    // Voices
    // ------------------------------------------------------------------

    fn resume_voice(&mut self, vid: VoiceId, volume: f32) {
        let Some(voice) = self.voices.get_mut(vid) else {
            return;
        };
        let bid = voice.buffer_id();
        voice.set_volume(volume);
        let restarted = voice.play(
            self.buffers.get_mut(bid).map(|entry| &mut entry.buffer),
            &mut StreamContext {
                pool: &self.pool_handle,
                dead_list: &mut self.dead_list,
            },
        );
        if restarted {
            self.schedule_buffer(bid);
        }
    }

    fn seek_voice(&mut self, vid: VoiceId, sample: u64, paused: bool) {
        let Some(voice) = self.voices.get_mut(vid) else {
            return;
        };
        let bid = voice.buffer_id();
        let restarted = voice.set_position(
            sample,
            self.buffers.get_mut(bid).map(|entry| &mut entry.buffer),
            &mut StreamContext {
                pool: &self.pool_handle,
                dead_list: &mut self.dead_list,
            },
        );
        if paused {
            voice.pause();
        }
        if restarted {
            self.schedule_buffer(bid);
        }
    }

    /// Give `sid` a device voice positioned at its virtual time
    fn alloc_voice(&mut self, sid: SourceId) -> bool {
        let Some(bid) = self.ensure_buffer(sid) else {
            return false;
        };
        let Some(device) = self.device.as_mut() else {
            return false;
        };
        let Some(entry) = self.buffers.get_mut(bid) else {
            return false;
        };
        let buffer = &mut entry.buffer;
        if buffer.is_dead() || (buffer.is_unique() && buffer.unique_voice().is_some()) {
            return false;
        }
        let Some(source) = self.sources.get_mut(sid) else {
            return false;
        };

        let Some(device_voice) = device.create_voice(buffer.description().is_3d, buffer.device_buffer())
        else {
            trace!("{}: no device voice free", sid);
            return false;
        };
        let vid = self.voices.insert(SoundVoice::new(bid, buffer, device_voice));
        if buffer.is_unique() {
            buffer.attach_voice(vid);
        }

        let clock = self.clock.as_ref();
        let ticks = source.virtual_position(clock);
        let sample = source.format().ticks_to_samples(ticks);
        let playing = source.status() == SourceStatus::Playing;
        source.timer.reset();
        source.voice = Some(vid);

        let Some(voice) = self.voices.get_mut(vid) else {
            return false;
        };
        voice.set_volume(source.effective_volume());
        voice.set_pitch(source.pitch());
        let (position, velocity) = source.transform();
        voice.set_transform(position, velocity);

        let mut ctx = StreamContext {
            pool: &self.pool_handle,
            dead_list: &mut self.dead_list,
        };
        let mut restarted = false;
        if sample > 0 || buffer.is_streaming() {
            restarted |= voice.set_position(sample, Some(&mut *buffer), &mut ctx);
        }
        if playing {
            restarted |= voice.play(Some(&mut *buffer), &mut ctx);
        }
        let needs_updates = restarted || buffer.has_async_state();

        debug!("{} got {} on {} at sample {}", sid, vid, bid, sample);
        if needs_updates {
            self.schedule_buffer(bid);
        }
        self.emit(SoundEvent::VoiceAssigned { source: sid });
        true
    }

    /// Take the source's voice away
    ///
    /// With `virtualize` the source's timer picks up at the voice position.
    fn release_voice(&mut self, sid: SourceId, virtualize: bool) {
        let Some(source) = self.sources.get_mut(sid) else {
            return;
        };
        let Some(vid) = source.voice.take() else {
            return;
        };
        let Some(mut voice) = self.voices.remove(vid) else {
            return;
        };

        let mut buffer = self
            .buffers
            .get_mut(voice.buffer_id())
            .map(|entry| &mut entry.buffer);
        let sample = voice.position(buffer.as_deref());
        voice.stop();
        if let Some(buffer) = buffer.as_deref_mut() {
            if buffer.unique_voice() == Some(vid) {
                buffer.detach_voice();
            }
        }
        drop(voice);

        if !virtualize {
            return;
        }
        let clock = self.clock.as_ref();
        let ticks = source.format().samples_to_ticks(sample);
        source.timer.reset();
        source.timer.set_position(ticks, clock);
        let playing = source.status() == SourceStatus::Playing;
        if playing {
            source.timer.start(clock);
        }

        debug!("{} released {} at sample {}", sid, vid, sample);
        if playing {
            self.emit(SoundEvent::Virtualized { source: sid });
        }
    }

    /// Hand device voices to the most important audible sources
    fn assign_voices(&mut self) {
        let Some(max_voices) = self.device.as_ref().map(|device| device.max_voices()) else {
            return;
        };

        let mut wanted: Vec<(SourceId, f32)> = self
            .sources
            .iter()
            .filter(|(_, s)| s.status() == SourceStatus::Playing && s.effective_volume() > 0.0)
            .map(|(id, s)| (id, s.priority()))
            .collect();
        wanted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        wanted.truncate(max_voices);
        let keep: HashSet<SourceId> = wanted.iter().map(|(id, _)| *id).collect();

        let surplus: Vec<SourceId> = self
            .sources
            .iter()
            .filter(|(id, s)| {
                s.voice.is_some()
                    && match s.status() {
                        SourceStatus::Stopped => true,
                        SourceStatus::Playing => !keep.contains(id),
                        SourceStatus::Paused => false,
                    }
            })
            .map(|(id, _)| id)
            .collect();
        for sid in surplus {
            self.release_voice(sid, true);
        }

        for (sid, _) in wanted {
            if self.has_voice(sid) || self.alloc_voice(sid) {
                continue;
            }
            // Paused sources give up their voices before playing ones go virtual
            let victim = self
                .sources
                .iter()
                .filter(|(_, s)| s.status() == SourceStatus::Paused && s.voice.is_some())
                .min_by(|a, b| a.1.priority().partial_cmp(&b.1.priority()).unwrap_or(Ordering::Equal))
                .map(|(id, _)| id);
            if let Some(victim) = victim {
                self.release_voice(victim, true);
                self.alloc_voice(sid);
            }
        }
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// One pass of the update driver
    pub fn update(&mut self) {
        let started = Instant::now();
        self.updates += 1;

        let released = self.dead_list.reclaim();
        if released > 0 {
            trace!("Released {} parked stream states", released);
        }

        if let Some(device) = self.device.as_mut() {
            device.update(&self.listener);
        }

        self.update_buffers(started);
        self.update_sources();
        self.assign_voices();
    }

    fn update_buffers(&mut self, started: Instant) {
        let count = self.update_list.len();
        if count == 0 {
            return;
        }

        let mut changes: Vec<(BufferId, BufferStatus)> = Vec::new();
        let mut finished: Vec<BufferId> = Vec::new();
        let mut reclaim: Vec<BufferId> = Vec::new();
        let mut index = self.next_update % count;
        let mut visited = 0;

        while visited < count {
            if let Some(budget) = self.update_budget {
                if visited > 0 && started.elapsed() >= budget {
                    trace!("Update budget spent after {} of {} buffers", visited, count);
                    break;
                }
            }
            let bid = self.update_list[index];
            index = (index + 1) % count;
            visited += 1;

            let Some(entry) = self.buffers.get_mut(bid) else {
                finished.push(bid);
                continue;
            };
            let voice_clock = entry
                .buffer
                .unique_voice()
                .and_then(|vid| self.voices.get(vid))
                .map(|voice| voice.time_source(&entry.buffer));
            let result = entry.buffer.update(voice_clock, &mut self.dead_list);

            if let Some(status) = result.status_changed {
                changes.push((bid, status));
            }
            if result.reclaim {
                reclaim.push(bid);
            } else if !result.keep_updating {
                finished.push(bid);
            }
        }
        self.next_update = index;

        for (bid, status) in changes {
            for (_, voice) in self.voices.iter_mut() {
                if voice.buffer_id() == bid {
                    voice.on_buffer_status(status);
                }
            }
        }

        self.update_list.retain(|bid| !finished.contains(bid));
        for bid in reclaim {
            self.reclaim_buffer(bid);
        }
        if self.update_list.is_empty() {
            self.next_update = 0;
        }
    }

    fn update_sources(&mut self) {
        let now = self.clock.tick();
        for sid in self.sources.keys() {
            self.update_source(sid, now);
        }
    }

    fn update_source(&mut self, sid: SourceId, now: u64) {
        let Some(source) = self.sources.get_mut(sid) else {
            return;
        };
        let clock = self.clock.as_ref();
        let mut reached_end = false;

        let position_ticks = match source.voice.and_then(|vid| self.voices.get_mut(vid)) {
            Some(voice) => {
                let buffer = self.buffers.get(voice.buffer_id()).map(|entry| &entry.buffer);
                match (source.status(), voice.status(buffer)) {
                    (SourceStatus::Playing, VoiceStatus::Stopped | VoiceStatus::Null) => {
                        reached_end = true
                    }
                    (SourceStatus::Paused, VoiceStatus::Playing | VoiceStatus::Blocked) => {
                        voice.pause()
                    }
                    _ => {}
                }
                source.format().samples_to_ticks(voice.position(buffer))
            }
            None => {
                reached_end =
                    source.status() == SourceStatus::Playing && source.virtual_finished(clock);
                source.virtual_position(clock)
            }
        };

        let mut action = FadeCompletion::None;
        let mut markers = Vec::new();
        if source.status() == SourceStatus::Playing && !reached_end {
            let update = source.update_effects(now, position_ticks);
            action = update.action;
            markers = update.markers;
        }

        if let Some(voice) = source.voice.and_then(|vid| self.voices.get(vid)) {
            voice.set_volume(source.effective_volume());
        }

        for name in markers {
            debug!("{} passed marker '{}'", sid, name);
            self.emit(SoundEvent::MarkerPassed { source: sid, name });
        }

        if reached_end {
            debug!("{} reached the end", sid);
            self.stop_now(sid);
            return;
        }
        match action {
            FadeCompletion::Stop => self.stop_now(sid),
            FadeCompletion::Pause => self.pause_now(sid),
            FadeCompletion::None => {}
        }
    }
}

impl Drop for SoundSystem {
    fn drop(&mut self) {
        self.shutdown();
        self.pool.shutdown();
    }
}
