//! # TTV Common Library
//!
//! Shared code for the text-to-voice audio crates:
//! - Error type
//! - TOML configuration loading
//! - Event types and the EventBus
//! - Voice catalog record type
//! - Utility functions

pub mod config;
pub mod error;
pub mod events;
pub mod time;
pub mod uuid_utils;
pub mod voice;

pub use error::{Error, Result};
pub use voice::{QualityTier, VoiceProfile};
