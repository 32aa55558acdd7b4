//! Sound descriptions
//!
//! A description is the playback profile of a sound resource: whether it is
//! streamed, how it is packetized and buffered, and how a source playing it
//! starts and ends. Descriptions come from configuration (TOML) and are
//! clamped with [`SoundDescription::validated`] before use.

use crate::params::clamp_param;
use crate::FadeCurve;
use serde::{Deserialize, Serialize};

/// Playback profile for a sound resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundDescription {
    /// Read the sound incrementally into a wrap-around device buffer
    pub is_streaming: bool,

    /// Restart from the beginning when the end is reached
    pub is_looping: bool,

    /// Request a positional (3D) device voice
    pub is_3d: bool,

    /// Seconds of audio per streamed packet
    pub stream_packet_duration: f32,

    /// Packets kept buffered ahead of playback
    pub stream_read_ahead: u32,

    /// Append one packet of silence after the final packet of a stream
    pub stream_read_silence_at_end: bool,

    /// Discard packets whose span has already played when they arrive
    pub drop_late_packets: bool,

    /// Seconds of fade-in when playback starts
    pub fade_in_time: f32,

    /// Seconds of fade-out ending at the end of the sound
    pub fade_out_time: f32,

    /// Curve used for fade-ins
    pub fade_in_curve: FadeCurve,

    /// Curve used for fade-outs
    pub fade_out_curve: FadeCurve,

    /// Source volume before fades
    pub volume: f32,

    /// Playback rate scale
    pub pitch: f32,

    /// Voice assignment priority weight
    pub priority: f32,
}

impl Default for SoundDescription {
    fn default() -> Self {
        Self {
            is_streaming: false,
            is_looping: false,
            is_3d: false,
            stream_packet_duration: 8.0,
            stream_read_ahead: 3,
            stream_read_silence_at_end: true,
            drop_late_packets: true,
            fade_in_time: 0.0,
            fade_out_time: 0.0,
            fade_in_curve: FadeCurve::Linear,
            fade_out_curve: FadeCurve::Linear,
            volume: 1.0,
            pitch: 1.0,
            priority: 1.0,
        }
    }
}

impl SoundDescription {
    /// Description for a streamed sound with the given packetization
    pub fn streaming(packet_duration: f32, read_ahead: u32) -> Self {
        Self {
            is_streaming: true,
            stream_packet_duration: packet_duration,
            stream_read_ahead: read_ahead,
            ..Self::default()
        }
    }

    /// Return a copy with every numeric option clamped into range
    pub fn validated(&self) -> Self {
        Self {
            volume: clamp_param("volume", self.volume as f64) as f32,
            pitch: clamp_param("pitch", self.pitch as f64) as f32,
            priority: clamp_param("priority", self.priority as f64) as f32,
            stream_packet_duration: clamp_param(
                "stream_packet_duration",
                self.stream_packet_duration as f64,
            ) as f32,
            stream_read_ahead: clamp_param("stream_read_ahead", self.stream_read_ahead as f64)
                as u32,
            fade_in_time: clamp_param("fade_in_time", self.fade_in_time as f64) as f32,
            fade_out_time: clamp_param("fade_out_time", self.fade_out_time as f64) as f32,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_already_valid() {
        let desc = SoundDescription::default();
        assert_eq!(desc.validated(), desc);
    }

    #[test]
    fn test_validated_clamps() {
        let desc = SoundDescription {
            volume: 3.0,
            pitch: -1.0,
            stream_read_ahead: 0,
            stream_packet_duration: 100.0,
            fade_in_time: -2.0,
            ..SoundDescription::default()
        }
        .validated();

        assert_eq!(desc.volume, 1.0);
        assert!((desc.pitch - 0.1).abs() < 1e-6);
        assert_eq!(desc.stream_read_ahead, 1);
        assert_eq!(desc.stream_packet_duration, 10.0);
        assert_eq!(desc.fade_in_time, 0.0);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let desc: SoundDescription = toml::from_str(
            r#"
            is_streaming = true
            stream_read_ahead = 5
            fade_in_curve = "s_curve"
            "#,
        )
        .unwrap();

        assert!(desc.is_streaming);
        assert_eq!(desc.stream_read_ahead, 5);
        assert_eq!(desc.fade_in_curve, FadeCurve::SCurve);
        assert_eq!(desc.volume, 1.0);
    }
}
