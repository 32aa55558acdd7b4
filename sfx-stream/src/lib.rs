//! # sfx-stream
//!
//! Asynchronous sound streaming core: packets are read from source streams
//! on a reader pool, paced into device buffers against the playback cursor,
//! and played through voices that sources acquire and release as device
//! resources allow.
//!
//! **Layers (leaves first):** time sources → packet streams → packet queue →
//! buffers → voices → sources, all owned by a [`SoundSystem`].

pub mod arena;
pub mod device;
pub mod error;
pub mod events;
pub mod playback;
pub mod stream;
pub mod time_source;

pub use arena::{BufferId, SourceId, VoiceId};
pub use error::{Error, Result};
pub use events::SoundEvent;
pub use playback::{SoundProfile, SoundSystem, SourceStatus, UpdateThread};
pub use time_source::{ManualClock, RealTimeSource, TimeSource};
