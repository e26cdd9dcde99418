//! Recording session lifecycle through the audio context
//!
//! Every test checks that the simulated microphone ends up released.

mod helpers;

use helpers::{drain, harness, harness_with};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use ttv_audio::error::RecordingError;
use ttv_audio::playback::SimulatedBackend;
use ttv_audio::recording::{DeviceRefusal, SimulatedCapture};
use ttv_audio::RecordingCallbacks;
use ttv_common::config::{RecordingConfig, TomlConfig};
use ttv_common::events::{RecordingState, TtvEvent};

fn short_ceiling(secs: u64) -> TomlConfig {
    TomlConfig {
        recording: RecordingConfig {
            max_duration_secs: secs,
            sample_rate: 8000,
            channels: 1,
        },
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_fires_callback_exactly_once() {
    let h = harness(short_ceiling(3));
    let recording = h.context.recording();
    let mut rx = h.context.events().subscribe();

    let fired = Arc::new(AtomicUsize::new(0));
    let captured = Arc::new(AtomicUsize::new(0));
    let (f, c) = (Arc::clone(&fired), Arc::clone(&captured));
    recording
        .start(RecordingCallbacks::new().on_max_duration(move |stopped| {
            f.fetch_add(1, Ordering::SeqCst);
            c.store(stopped.data.map_or(0, |d| d.len()), Ordering::SeqCst);
        }))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(captured.load(Ordering::SeqCst) > 3 * 8000 * 2);
    assert_eq!(recording.state().await, RecordingState::Inactive);
    assert_eq!(h.capture.live_streams(), 0);

    let auto_stops: Vec<u64> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            TtvEvent::RecordingAutoStopped { duration_ms, .. } => Some(duration_ms),
            _ => None,
        })
        .collect();
    assert_eq!(auto_stops, vec![3000]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_registers_capture() {
    let h = harness(short_ceiling(60));
    let recording = h.context.recording();

    recording.start(RecordingCallbacks::new()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let handle = recording
        .stop_and_register(h.context.registry(), None)
        .await
        .unwrap()
        .unwrap();

    let locator = h.context.registry().access(&handle.id).await.unwrap();
    let bytes = h.context.registry().read(&locator).await.unwrap();
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes.as_ref())).unwrap();
    assert_eq!(reader.duration(), 2 * 8000);
    assert_eq!(h.capture.live_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_stop_returns_nothing() {
    let h = harness(short_ceiling(60));
    let recording = h.context.recording();

    recording.start(RecordingCallbacks::new()).await.unwrap();
    assert_eq!(recording.stop().await.unwrap(), None);
    assert_eq!(
        recording.stop_and_register(h.context.registry(), None).await.unwrap().map(|h| h.id),
        None
    );
    assert_eq!(h.capture.live_streams(), 0);
}

#[tokio::test]
async fn test_refusals_are_classified() {
    for (refusal, expected) in [
        (DeviceRefusal::NotAllowed, RecordingError::PermissionDenied),
        (DeviceRefusal::NotFound, RecordingError::NoDevice),
        (DeviceRefusal::NotSupported, RecordingError::Unsupported),
    ] {
        let capture = SimulatedCapture::new().refusing(refusal);
        let h = harness_with(short_ceiling(60), SimulatedBackend::new(), capture);

        let result = h.context.recording().start(RecordingCallbacks::new()).await;
        assert_eq!(result, Err(expected));
        assert_eq!(h.context.recording().state().await, RecordingState::Failed);
        assert_eq!(h.capture.live_streams(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_fault_during_pause_releases_stream() {
    let h = harness(short_ceiling(60));
    let recording = h.context.recording();
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);

    recording
        .start(RecordingCallbacks::new().on_error(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }))
        .await
        .unwrap();
    recording.pause().await.unwrap();
    h.capture.inject_fault("driver reset");
    h.capture.inject_fault("driver reset again");
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(recording.state().await, RecordingState::Failed);
    assert_eq!(h.capture.live_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_active_recording() {
    let h = harness(short_ceiling(60));
    h.context.recording().start(RecordingCallbacks::new()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.capture.live_streams(), 1);

    h.context.shutdown().await;
    assert_eq!(h.context.recording().state().await, RecordingState::Inactive);
    assert_eq!(h.capture.live_streams(), 0);
}
