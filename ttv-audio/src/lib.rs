//! # TTV Audio Core (ttv-audio)
//!
//! Audio session and resource lifecycle for a text-to-voice application.
//!
//! - [`registry`]: owns transient audio bytes under a memory budget
//! - [`playback`]: one playing session at a time, with completion callbacks
//! - [`recording`]: microphone capture with a hard duration ceiling
//! - [`limiter`]: bounded concurrency for synthesis, cloning and other long tasks
//!
//! [`AudioContext`] builds all four once per process.

pub mod context;
pub mod error;
pub mod limiter;
pub mod playback;
pub mod recording;
pub mod registry;
pub mod tone;

pub use context::AudioContext;
pub use error::{Error, Result};
pub use limiter::{ConcurrencyLimiter, TaskContext};
pub use playback::{PlaybackManager, PlaybackOptions, SessionSource};
pub use recording::{RecordingCallbacks, RecordingSession};
pub use registry::{Locator, ResourceHandle, ResourceRegistry};
