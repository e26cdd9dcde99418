//! Shared fixtures for ttv-audio integration tests

#![allow(dead_code)]

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use ttv_audio::playback::SimulatedBackend;
use ttv_audio::recording::SimulatedCapture;
use ttv_audio::tone::render_tone_wav;
use ttv_audio::AudioContext;
use ttv_common::config::TomlConfig;
use ttv_common::events::TtvEvent;

/// Low-rate mono tone clip of the given length
pub fn clip(length: Duration) -> Bytes {
    render_tone_wav(440.0, length, 8000, 0.25).unwrap()
}

/// Arbitrary payload of exactly `size` bytes (not playable)
pub fn blob(size: usize) -> Vec<u8> {
    vec![0x5a; size]
}

/// WAV clip padded to roughly `size` bytes
pub fn clip_of_size(size: usize) -> Bytes {
    // 8 kHz, 16-bit mono: 16000 bytes per second
    let secs = (size as f64 / 16_000.0).max(0.1);
    render_tone_wav(330.0, Duration::from_secs_f64(secs), 8000, 0.25).unwrap()
}

pub struct Harness {
    pub context: Arc<AudioContext>,
    pub backend: SimulatedBackend,
    pub capture: SimulatedCapture,
}

pub fn harness(config: TomlConfig) -> Harness {
    harness_with(config, SimulatedBackend::new(), SimulatedCapture::new())
}

pub fn harness_with(config: TomlConfig, backend: SimulatedBackend, capture: SimulatedCapture) -> Harness {
    let context = AudioContext::new(&config, Arc::new(backend.clone()), Arc::new(capture.clone()));
    Harness {
        context: Arc::new(context),
        backend,
        capture,
    }
}

/// Drain everything currently buffered on a bus receiver
pub fn drain(rx: &mut broadcast::Receiver<TtvEvent>) -> Vec<TtvEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Let spawned tasks run without moving the clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
