//! # sfx Common Library
//!
//! Shared code for the sfx streaming workspace:
//! - Error type
//! - Tick / sample / byte timing math and sample formats
//! - Fade curve definitions
//! - Sound descriptions and parameter metadata
//! - Configuration loading

pub mod config;
pub mod description;
pub mod error;
pub mod fade_curves;
pub mod params;
pub mod timing;

pub use description::SoundDescription;
pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
pub use timing::SampleFormat;
