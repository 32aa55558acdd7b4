//! Shared fixtures for sfx-stream integration tests
//!
//! Every fixture runs on a manual clock with the inline reader pool and the
//! null device, so tests step time explicitly and never sleep.

#![allow(dead_code)]

use sfx_common::{SampleFormat, SoundDescription};
use sfx_stream::device::NullDevice;
use sfx_stream::stream::{MemoryStream, ReaderPool};
use sfx_stream::{ManualClock, SoundProfile, SoundSystem, SourceId};
use std::sync::Arc;

/// Mono 16-bit at 1 kHz: one sample per tick
pub fn mono_1khz() -> SampleFormat {
    SampleFormat::new(1, 16, 1000).unwrap()
}

/// Profile over a counting stream of `samples` frames
pub fn profile(name: &str, samples: u64, description: SoundDescription) -> Arc<SoundProfile> {
    SoundProfile::new(
        name,
        MemoryStream::counting(mono_1khz(), samples).provider(),
        description,
    )
}

pub fn resident(name: &str, samples: u64) -> Arc<SoundProfile> {
    profile(name, samples, SoundDescription::default())
}

pub fn streaming(name: &str, samples: u64, packet_seconds: f32, read_ahead: u32) -> Arc<SoundProfile> {
    profile(
        name,
        samples,
        SoundDescription::streaming(packet_seconds, read_ahead),
    )
}

pub struct TestSystem {
    pub system: SoundSystem,
    pub clock: Arc<ManualClock>,
}

impl TestSystem {
    /// System on a null device with `max_voices` voices
    pub fn new(max_voices: usize) -> Self {
        let mut fixture = Self::without_device();
        fixture.attach_device(max_voices);
        fixture
    }

    /// System with no device: every source plays virtually
    pub fn without_device() -> Self {
        let clock = Arc::new(ManualClock::new());
        let system = SoundSystem::new(clock.clone(), ReaderPool::inline());
        Self { system, clock }
    }

    pub fn attach_device(&mut self, max_voices: usize) {
        self.system
            .init(Box::new(NullDevice::new(self.clock.clone(), max_voices)));
    }

    pub fn create(&mut self, profile: Arc<SoundProfile>) -> SourceId {
        self.system.create_source(profile).unwrap()
    }

    /// Advance the clock by `ticks` in steps of `step`, updating after each
    pub fn run(&mut self, ticks: u64, step: u64) {
        let mut elapsed = 0;
        while elapsed < ticks {
            let delta = step.min(ticks - elapsed);
            self.clock.advance(delta);
            self.system.update();
            elapsed += delta;
        }
    }

    pub fn position(&self, id: SourceId) -> f32 {
        self.system.position(id).unwrap()
    }
}

pub fn assert_near(actual: f32, expected: f32, tolerance: f32) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {} ± {}, got {}",
        expected,
        tolerance,
        actual
    );
}
