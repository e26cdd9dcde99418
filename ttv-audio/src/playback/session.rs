//! Playback session types

use crate::error::PlaybackError;
use std::ops::RangeInclusive;
use ttv_common::events::PlaybackState;

pub const VOLUME_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const PLAYBACK_RATE_RANGE: RangeInclusive<f32> = 0.5..=2.0;

/// Clamp a volume into [0, 1]; NaN becomes full volume
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return *VOLUME_RANGE.end();
    }
    volume.clamp(*VOLUME_RANGE.start(), *VOLUME_RANGE.end())
}

/// Clamp a playback rate into [0.5, 2]; NaN becomes normal speed
pub fn clamp_playback_rate(rate: f32) -> f32 {
    if rate.is_nan() {
        return 1.0;
    }
    rate.clamp(*PLAYBACK_RATE_RANGE.start(), *PLAYBACK_RATE_RANGE.end())
}

/// Where a session's audio comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSource {
    /// Persistent reference (bundled preview, file path)
    Url(String),
    /// Id of an entry in the resource registry
    Resource(String),
}

impl std::fmt::Display for SessionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionSource::Url(url) => write!(f, "url:{}", url),
            SessionSource::Resource(id) => write!(f, "resource:{}", id),
        }
    }
}

/// Snapshot of one playback session
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub id: String,
    pub state: PlaybackState,
    pub source: SessionSource,
    pub volume: f32,
    pub playback_rate: f32,
    /// Play cycle this session is on; bumps on every (re)open
    pub cycle: u64,
}

pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;
pub type ErrorCallback = Box<dyn FnOnce(PlaybackError) + Send + 'static>;

/// Per-call playback options
///
/// Callbacks are `FnOnce`: the manager takes them out of the session when it
/// delivers them, so each fires at most once per play cycle.
#[derive(Default)]
pub struct PlaybackOptions {
    pub volume: Option<f32>,
    pub playback_rate: Option<f32>,
    /// Release the registry resource once the session leaves the table
    pub release_source_on_finish: bool,
    pub on_ended: Option<EndedCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl PlaybackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn playback_rate(mut self, rate: f32) -> Self {
        self.playback_rate = Some(rate);
        self
    }

    pub fn release_source_on_finish(mut self) -> Self {
        self.release_source_on_finish = true;
        self
    }

    pub fn on_ended(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_ended = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(PlaybackError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for PlaybackOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackOptions")
            .field("volume", &self.volume)
            .field("playback_rate", &self.playback_rate)
            .field("release_source_on_finish", &self.release_source_on_finish)
            .field("on_ended", &self.on_ended.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping() {
        assert_eq!(clamp_volume(1.7), 1.0);
        assert_eq!(clamp_volume(-0.2), 0.0);
        assert_eq!(clamp_volume(f32::NAN), 1.0);
        assert_eq!(clamp_playback_rate(0.1), 0.5);
        assert_eq!(clamp_playback_rate(3.0), 2.0);
        assert_eq!(clamp_playback_rate(1.25), 1.25);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(SessionSource::Resource("a".into()).to_string(), "resource:a");
        assert_eq!(SessionSource::Url("/x.wav".into()).to_string(), "url:/x.wav");
    }
}
