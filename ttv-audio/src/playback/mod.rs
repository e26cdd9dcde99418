//! Playback sessions over a pluggable audio backend

pub mod backend;
pub mod manager;
pub mod session;

pub use backend::{AudioBackend, AudioSink, SimulatedBackend, SinkNotifier, SourceData};
pub use manager::PlaybackManager;
pub use session::{PlaybackOptions, PlaybackSession, SessionSource};
