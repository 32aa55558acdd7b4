//! Playback core: buffers, voices, sources and the system that drives them

pub mod buffer;
pub mod dead_list;
pub mod effects;
pub mod packet_queue;
pub mod source;
pub mod system;
pub mod update_thread;
pub mod voice;
pub mod wrap_around;

pub use buffer::{BufferStatus, SoundBuffer};
pub use effects::{Effect, EffectList, FadeCompletion};
pub use packet_queue::{PacketConsumer, PacketQueue};
pub use source::{SoundProfile, Source, SourceStatus};
pub use system::{SoundSystem, SystemStats};
pub use update_thread::UpdateThread;
pub use voice::{SoundVoice, VoiceStatus, VoiceTimeSource};
pub use wrap_around::WrapAroundBuffer;
