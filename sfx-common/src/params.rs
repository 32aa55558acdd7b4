//! Sound parameter metadata
//!
//! Single source of truth for the numeric options a sound description
//! carries: name, type, default value and valid range. Descriptions loaded
//! from configuration are clamped against this table before they reach the
//! streaming core, so the core can rely on every value being in range.
//!
//! # Usage
//!
//! ```rust
//! use sfx_common::params::{clamp_param, param_metadata};
//!
//! let volume = param_metadata("volume").unwrap();
//! assert_eq!(volume.default_value, "1.0");
//! assert_eq!(clamp_param("volume", 1.7), 1.0);
//! assert_eq!(clamp_param("stream_read_ahead", 0.0), 1.0);
//! ```

use tracing::warn;

/// Metadata for one numeric sound parameter
#[derive(Debug, Clone, Copy)]
pub struct ParamMetadata {
    /// Parameter key as it appears in TOML
    pub key: &'static str,

    /// Rust type of the parameter
    pub data_type: &'static str,

    /// Default value (string form, for documentation and diagnostics)
    pub default_value: &'static str,

    /// Human-readable description
    pub description: &'static str,

    /// Inclusive lower bound
    pub min: f64,

    /// Inclusive upper bound
    pub max: f64,
}

impl ParamMetadata {
    /// Clamp a value into the valid range
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }

    /// Check whether a value lies inside the valid range
    pub fn validate(&self, value: f64) -> Result<(), String> {
        if value.is_nan() || value < self.min || value > self.max {
            return Err(format!(
                "{}: value {} out of range [{}, {}]",
                self.key, value, self.min, self.max
            ));
        }
        Ok(())
    }
}

static METADATA: &[ParamMetadata] = &[
    ParamMetadata {
        key: "volume",
        data_type: "f32",
        default_value: "1.0",
        description: "Source volume before fades",
        min: 0.0,
        max: 1.0,
    },
    ParamMetadata {
        key: "pitch",
        data_type: "f32",
        default_value: "1.0",
        description: "Playback rate scale",
        min: 0.1,
        max: 4.0,
    },
    ParamMetadata {
        key: "priority",
        data_type: "f32",
        default_value: "1.0",
        description: "Voice assignment priority weight",
        min: 0.0,
        max: 100.0,
    },
    ParamMetadata {
        key: "stream_packet_duration",
        data_type: "f32",
        default_value: "8.0",
        description: "Seconds of audio per streamed packet",
        min: 0.05,
        max: 10.0,
    },
    ParamMetadata {
        key: "stream_read_ahead",
        data_type: "u32",
        default_value: "3",
        description: "Packets kept buffered ahead of playback",
        min: 1.0,
        max: 32.0,
    },
    ParamMetadata {
        key: "fade_in_time",
        data_type: "f32",
        default_value: "0.0",
        description: "Seconds of fade-in when playback starts",
        min: 0.0,
        max: 60.0,
    },
    ParamMetadata {
        key: "fade_out_time",
        data_type: "f32",
        default_value: "0.0",
        description: "Seconds of fade-out at the end of the sound",
        min: 0.0,
        max: 60.0,
    },
];

/// All parameter metadata entries
pub fn metadata() -> &'static [ParamMetadata] {
    METADATA
}

/// Look up metadata by key
pub fn param_metadata(key: &str) -> Option<&'static ParamMetadata> {
    METADATA.iter().find(|m| m.key == key)
}

/// Clamp a value for `key`, logging when the value had to change
///
/// Unknown keys pass through unchanged.
pub fn clamp_param(key: &str, value: f64) -> f64 {
    match param_metadata(key) {
        Some(meta) => {
            let clamped = meta.clamp(value);
            if clamped != value {
                warn!(
                    "Parameter {} value {} out of range [{}, {}], clamped to {}",
                    key, value, meta.min, meta.max, clamped
                );
            }
            clamped
        }
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_in_range() {
        for meta in metadata() {
            let default: f64 = meta.default_value.parse().unwrap();
            assert!(
                meta.validate(default).is_ok(),
                "default for {} out of range",
                meta.key
            );
        }
    }

    #[test]
    fn test_keys_are_unique() {
        let mut keys: Vec<_> = metadata().iter().map(|m| m.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), metadata().len());
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_param("pitch", 0.0), 0.1);
        assert_eq!(clamp_param("pitch", 9.0), 4.0);
        assert_eq!(clamp_param("pitch", 1.5), 1.5);
        assert_eq!(clamp_param("fade_in_time", f64::NAN), 0.0);
        assert_eq!(clamp_param("no_such_key", 42.0), 42.0);
    }

    #[test]
    fn test_validate_reports_key() {
        let err = param_metadata("volume").unwrap().validate(2.0).unwrap_err();
        assert!(err.contains("volume"));
    }
}
