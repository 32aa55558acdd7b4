//! Events published by the sound system
//!
//! The system emits on an optional `tokio::sync::mpsc::UnboundedSender`
//! registered with [`SoundSystem::set_event_channel`]. Emission never
//! blocks the update driver; a closed channel is ignored.
//!
//! [`SoundSystem::set_event_channel`]: crate::playback::SoundSystem::set_event_channel

use crate::arena::SourceId;
use crate::playback::SourceStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum SoundEvent {
    /// Source changed between stopped, playing and paused
    StatusChanged {
        source: SourceId,
        status: SourceStatus,
    },

    /// Playback passed a marker added with `add_marker`
    MarkerPassed { source: SourceId, name: String },

    /// Source was granted a device voice
    VoiceAssigned { source: SourceId },

    /// Source lost its device voice and continues on its virtual timer
    Virtualized { source: SourceId },

    /// The device went away; all sources are virtual until `init`
    DeviceLost { device: String },
}

impl SoundEvent {
    /// Source the event is about, if any
    pub fn source(&self) -> Option<SourceId> {
        match self {
            SoundEvent::StatusChanged { source, .. }
            | SoundEvent::MarkerPassed { source, .. }
            | SoundEvent::VoiceAssigned { source }
            | SoundEvent::Virtualized { source } => Some(*source),
            SoundEvent::DeviceLost { .. } => None,
        }
    }
}
