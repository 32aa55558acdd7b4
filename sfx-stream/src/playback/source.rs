//! Sound Source
//!
//! The application-facing playback controller. A source carries the play
//! intent (status, volume, pitch, effects) and survives the coming and
//! going of its buffer and voice. While it has no voice its position is
//! kept by a [`PlayTimer`] against the system clock; the system converts
//! that position into a sample offset when a voice is granted.
//!
//! Device-facing work (binding voices, seeking buffers) lives in
//! [`SoundSystem`](crate::playback::SoundSystem); this type holds the state
//! that work reads and writes.

use crate::arena::{BufferId, VoiceId};
use crate::playback::effects::{Effect, EffectList, EffectsUpdate, FadeCompletion, MIN_FADE_GAIN};
use crate::stream::StreamProvider;
use crate::time_source::{PlayTimer, TimeSource};
use serde::Serialize;
use sfx_common::timing::seconds_to_ticks;
use sfx_common::{SampleFormat, SoundDescription};
use std::fmt;
use std::sync::Arc;

/// Application-visible playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceStatus::Stopped => "stopped",
            SourceStatus::Playing => "playing",
            SourceStatus::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// A named sound resource and how to play it
///
/// Non-streaming profiles share one resident buffer per name.
pub struct SoundProfile {
    pub name: String,
    pub provider: Arc<dyn StreamProvider>,
    pub description: SoundDescription,
}

impl SoundProfile {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn StreamProvider>,
        description: SoundDescription,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            provider,
            description: description.validated(),
        })
    }
}

impl fmt::Debug for SoundProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundProfile")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

pub struct Source {
    profile: Arc<SoundProfile>,
    format: SampleFormat,
    duration_samples: Option<u64>,
    status: SourceStatus,
    pub(crate) buffer: Option<BufferId>,
    pub(crate) voice: Option<VoiceId>,

    /// Position while virtual
    pub(crate) timer: PlayTimer,

    effects: EffectList,
    fade_gain: f32,
    volume: f32,
    pitch: f32,
    position_3d: [f32; 3],
    velocity_3d: [f32; 3],
}

impl Source {
    pub fn new(profile: Arc<SoundProfile>, format: SampleFormat, duration_samples: Option<u64>) -> Self {
        let volume = profile.description.volume;
        let pitch = profile.description.pitch;
        Self {
            profile,
            format,
            duration_samples,
            status: SourceStatus::Stopped,
            buffer: None,
            voice: None,
            timer: PlayTimer::new(),
            effects: EffectList::new(),
            fade_gain: 1.0,
            volume,
            pitch,
            position_3d: [0.0; 3],
            velocity_3d: [0.0; 3],
        }
    }

    pub fn profile(&self) -> &Arc<SoundProfile> {
        &self.profile
    }

    pub fn description(&self) -> &SoundDescription {
        &self.profile.description
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn duration_samples(&self) -> Option<u64> {
        self.duration_samples
    }

    pub fn duration_ticks(&self) -> Option<u64> {
        self.duration_samples.map(|n| self.format.samples_to_ticks(n))
    }

    pub fn is_looping(&self) -> bool {
        self.profile.description.is_looping
    }

    pub fn status(&self) -> SourceStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: SourceStatus) -> bool {
        let changed = self.status != status;
        self.status = status;
        changed
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn voice(&self) -> Option<VoiceId> {
        self.voice
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        debug_assert!(volume.is_finite(), "volume must be finite");
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        debug_assert!(pitch.is_finite(), "pitch must be finite");
        self.pitch = pitch.clamp(0.1, 4.0);
    }

    pub fn transform(&self) -> ([f32; 3], [f32; 3]) {
        (self.position_3d, self.velocity_3d)
    }

    pub fn set_transform(&mut self, position: [f32; 3], velocity: [f32; 3]) {
        self.position_3d = position;
        self.velocity_3d = velocity;
    }

    pub fn fade_gain(&self) -> f32 {
        self.fade_gain
    }

    /// Configured volume scaled by the running fades
    pub fn effective_volume(&self) -> f32 {
        self.volume * self.fade_gain
    }

    /// Weight in the voice assignment pass
    pub fn priority(&self) -> f32 {
        self.profile.description.priority * self.effective_volume()
    }

    pub fn effects(&self) -> &EffectList {
        &self.effects
    }

    /// Fold a raw tick position into the sound
    ///
    /// Looping sounds wrap; others stop at their duration.
    pub fn wrap_ticks(&self, ticks: u64) -> u64 {
        match self.duration_ticks() {
            Some(d) if d > 0 && self.is_looping() => ticks % d,
            Some(d) => ticks.min(d),
            None => ticks,
        }
    }

    /// Position of the virtual timer in stream ticks
    pub fn virtual_position(&self, clock: &dyn TimeSource) -> u64 {
        self.wrap_ticks(self.timer.position(clock))
    }

    /// A virtual non-looping source has played past its end
    pub fn virtual_finished(&self, clock: &dyn TimeSource) -> bool {
        match self.duration_ticks() {
            Some(d) if !self.is_looping() => self.timer.position(clock) >= d,
            _ => false,
        }
    }

    /// Prepare effects for `play`
    ///
    /// Cancels pending stop/pause fades and any earlier fade-in, reschedules
    /// the end-of-sound fade-out and starts a fade-in when `fade_in_secs`
    /// is positive. Returns the previous status.
    pub fn begin_play(&mut self, now: u64, fade_in_secs: f32) -> SourceStatus {
        let description = &self.profile.description;

        self.effects.retain(|effect| !effect.is_fade());

        if description.fade_out_time > 0.0 && !description.is_looping {
            if let Some(end) = self.duration_samples.map(|n| self.format.samples_to_ticks(n)) {
                self.effects.push(Effect::end_fade(
                    description.fade_out_curve,
                    end,
                    seconds_to_ticks(description.fade_out_time),
                ));
            }
        }

        if fade_in_secs > 0.0 {
            self.effects.push(Effect::fade_in(
                description.fade_in_curve,
                now,
                seconds_to_ticks(fade_in_secs),
            ));
            self.fade_gain = MIN_FADE_GAIN;
        } else {
            self.fade_gain = 1.0;
        }

        let previous = self.status;
        self.status = SourceStatus::Playing;
        previous
    }

    /// Start a fade-out that stops or pauses the source when it completes
    pub fn begin_fade_out(&mut self, now: u64, secs: f32, on_complete: FadeCompletion) {
        self.effects.retain(|effect| !effect.is_transition_fade());
        self.effects.push(Effect::fade_out(
            self.profile.description.fade_out_curve,
            now,
            seconds_to_ticks(secs),
            on_complete,
        ));
    }

    /// A stop or pause fade is running
    pub fn has_transition_fade(&self) -> bool {
        self.effects.iter().any(|effect| effect.is_transition_fade())
    }

    /// Drop all fades; the gain returns to the configured volume
    pub fn clear_fades(&mut self) {
        self.effects.retain(|effect| !effect.is_fade());
        self.fade_gain = 1.0;
    }

    pub fn add_marker(&mut self, name: impl Into<String>, position_ticks: u64) {
        self.effects.push(Effect::marker(name, position_ticks));
    }

    /// Poll effects and refresh the fade gain
    pub fn update_effects(&mut self, now: u64, position_ticks: u64) -> EffectsUpdate {
        let update = self.effects.update(now, position_ticks);
        self.fade_gain = update.gain;
        update
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("profile", &self.profile.name)
            .field("status", &self.status)
            .field("buffer", &self.buffer)
            .field("voice", &self.voice)
            .field("volume", &self.volume)
            .field("fade_gain", &self.fade_gain)
            .finish()
    }
}
