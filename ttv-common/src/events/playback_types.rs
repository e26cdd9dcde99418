//! Session state type definitions
//!
//! Shared by the playback manager, the recording session and event consumers.

use serde::{Deserialize, Serialize};

/// Playback session state
///
/// `Idle` doubles as the state reported for an id with no session, since a
/// stopped session is removed from the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
    Failed,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Loading => write!(f, "loading"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Ended => write!(f, "ended"),
            PlaybackState::Failed => write!(f, "failed"),
        }
    }
}

/// Microphone recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Inactive,
    Requesting,
    Recording,
    Paused,
    Stopping,
    Failed,
}

impl RecordingState {
    /// States in which a capture stream may be held
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RecordingState::Requesting
                | RecordingState::Recording
                | RecordingState::Paused
                | RecordingState::Stopping
        )
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingState::Inactive => write!(f, "inactive"),
            RecordingState::Requesting => write!(f, "requesting"),
            RecordingState::Recording => write!(f, "recording"),
            RecordingState::Paused => write!(f, "paused"),
            RecordingState::Stopping => write!(f, "stopping"),
            RecordingState::Failed => write!(f, "failed"),
        }
    }
}

/// Why a registered resource was dropped by the registry itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Not accessed within the idle window
    IdleTimeout,
    /// Older than the maximum age
    MaxAge,
    /// Aggregate size exceeded the budget
    Budget,
    /// Replaced by a registration under the same id
    Replaced,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::IdleTimeout => write!(f, "idle_timeout"),
            EvictionReason::MaxAge => write!(f, "max_age"),
            EvictionReason::Budget => write!(f, "budget"),
            EvictionReason::Replaced => write!(f, "replaced"),
        }
    }
}
