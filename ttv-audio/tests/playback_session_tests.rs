//! Playback session manager behaviour through the audio context

mod helpers;

use helpers::{clip, clip_of_size, drain, harness, harness_with};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use ttv_audio::error::PlaybackError;
use ttv_audio::playback::SimulatedBackend;
use ttv_audio::recording::SimulatedCapture;
use ttv_audio::{PlaybackOptions, SessionSource};
use ttv_common::config::TomlConfig;
use ttv_common::events::{PlaybackState, TtvEvent};

fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&count);
    (count, move || {
        inner.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test(start_paused = true)]
async fn test_second_preview_replaces_first() {
    let h = harness(TomlConfig::default());
    let registry = h.context.registry();
    let playback = h.context.playback();

    registry
        .register(clip_of_size(10 * 1024 * 1024), Some("sampleA".into()))
        .await
        .unwrap();
    registry
        .register(clip(Duration::from_secs(5)), Some("sampleB".into()))
        .await
        .unwrap();

    playback
        .play("preview-1", SessionSource::Resource("sampleA".into()), PlaybackOptions::new())
        .await
        .unwrap();
    playback
        .play("preview-2", SessionSource::Resource("sampleB".into()), PlaybackOptions::new())
        .await
        .unwrap();

    assert_eq!(playback.state("preview-1").await, PlaybackState::Idle);
    assert!(!playback.is_playing("preview-1").await);
    assert!(playback.is_playing("preview-2").await);
    assert_eq!(playback.active_session().await.as_deref(), Some("preview-2"));
    assert_eq!(h.backend.live_sinks(), 1);

    // Resources stay registered; only sinks were released
    assert!(registry.contains("sampleA").await);
}

#[tokio::test]
async fn test_stop_unknown_session_is_noop() {
    let h = harness(TomlConfig::default());
    h.context.playback().stop("nonexistent").await;
    h.context.playback().stop("nonexistent").await;
    assert_eq!(h.context.playback().state("nonexistent").await, PlaybackState::Idle);
}

#[tokio::test]
async fn test_stop_then_not_playing() {
    let h = harness(TomlConfig::default());
    let playback = h.context.playback();
    h.context
        .registry()
        .register(clip(Duration::from_secs(3)), Some("a".into()))
        .await
        .unwrap();

    playback
        .play("s", SessionSource::Resource("a".into()), PlaybackOptions::new())
        .await
        .unwrap();
    playback.stop("s").await;

    assert!(!playback.is_playing("s").await);
    assert_eq!(playback.snapshot("s").await, None);
    assert_eq!(h.backend.live_sinks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_cycle_never_reports_ended() {
    let h = harness(TomlConfig::default());
    let playback = h.context.playback();
    h.context
        .registry()
        .register(clip(Duration::from_secs(1)), Some("a".into()))
        .await
        .unwrap();

    let (first_ended, first_cb) = counter();
    playback
        .play("s", SessionSource::Resource("a".into()), PlaybackOptions::new().on_ended(first_cb))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    playback.stop("s").await;

    let (second_ended, second_cb) = counter();
    playback
        .play("s", SessionSource::Resource("a".into()), PlaybackOptions::new().on_ended(second_cb))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(first_ended.load(Ordering::SeqCst), 0);
    assert_eq!(second_ended.load(Ordering::SeqCst), 1);
    assert_eq!(playback.session_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeat_play_keeps_single_sink() {
    let h = harness(TomlConfig::default());
    let playback = h.context.playback();
    h.context
        .registry()
        .register(clip(Duration::from_secs(4)), Some("a".into()))
        .await
        .unwrap();
    let source = SessionSource::Resource("a".into());

    playback.play("s", source.clone(), PlaybackOptions::new()).await.unwrap();
    playback.play("s", source.clone(), PlaybackOptions::new()).await.unwrap();
    assert_eq!(h.backend.opened_count(), 1);

    playback.pause("s").await;
    let (ended, on_ended) = counter();
    playback
        .play("s", source, PlaybackOptions::new().on_ended(on_ended))
        .await
        .unwrap();
    assert_eq!(h.backend.opened_count(), 1);
    assert!(playback.is_playing("s").await);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_static_asset_preview() {
    let backend = SimulatedBackend::new().with_static_asset("static://voices/aria.wav", clip(Duration::from_secs(2)));
    let h = harness_with(TomlConfig::default(), backend, SimulatedCapture::new());
    let playback = h.context.playback();

    let (ended, on_ended) = counter();
    playback
        .play(
            "preview-aria",
            SessionSource::Url("static://voices/aria.wav".into()),
            PlaybackOptions::new().on_ended(on_ended),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(ended.load(Ordering::SeqCst), 1);
    assert_eq!(playback.state("preview-aria").await, PlaybackState::Idle);
}

#[tokio::test]
async fn test_file_sources() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.wav");
    std::fs::write(&path, clip(Duration::from_secs(1))).unwrap();

    let h = harness(TomlConfig::default());
    let playback = h.context.playback();
    playback
        .play(
            "file",
            SessionSource::Url(format!("file://{}", path.display())),
            PlaybackOptions::new(),
        )
        .await
        .unwrap();
    assert!(playback.is_playing("file").await);

    let missing = dir.path().join("missing.wav");
    let result = playback
        .play(
            "missing",
            SessionSource::Url(missing.display().to_string()),
            PlaybackOptions::new(),
        )
        .await;
    assert!(matches!(result, Err(PlaybackError::SourceUnavailable { .. })));
}

#[tokio::test]
async fn test_released_resource_reports_error_once() {
    let h = harness(TomlConfig::default());
    let registry = h.context.registry();
    registry
        .register(clip(Duration::from_secs(1)), Some("gone".into()))
        .await
        .unwrap();
    registry.release("gone").await;

    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);
    let result = h
        .context
        .playback()
        .play(
            "s",
            SessionSource::Resource("gone".into()),
            PlaybackOptions::new().on_error(move |e| {
                assert_eq!(e.session_id(), "s");
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

    assert!(matches!(result, Err(PlaybackError::SourceUnavailable { .. })));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.live_sinks(), 0);
}

#[tokio::test]
async fn test_bus_reports_preempted_session_as_idle() {
    let h = harness(TomlConfig::default());
    let registry = h.context.registry();
    registry.register(clip(Duration::from_secs(5)), Some("a".into())).await.unwrap();
    registry.register(clip(Duration::from_secs(5)), Some("b".into())).await.unwrap();
    let mut rx = h.context.events().subscribe();

    let playback = h.context.playback();
    playback
        .play("A", SessionSource::Resource("a".into()), PlaybackOptions::new())
        .await
        .unwrap();
    playback
        .play("B", SessionSource::Resource("b".into()), PlaybackOptions::new())
        .await
        .unwrap();

    let transitions: Vec<(String, PlaybackState, PlaybackState)> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            TtvEvent::PlaybackStateChanged {
                session_id,
                old_state,
                new_state,
                ..
            } => Some((session_id, old_state, new_state)),
            _ => None,
        })
        .collect();

    assert_eq!(
        transitions,
        vec![
            ("A".to_string(), PlaybackState::Idle, PlaybackState::Loading),
            ("A".to_string(), PlaybackState::Loading, PlaybackState::Playing),
            ("A".to_string(), PlaybackState::Playing, PlaybackState::Idle),
            ("B".to_string(), PlaybackState::Idle, PlaybackState::Loading),
            ("B".to_string(), PlaybackState::Loading, PlaybackState::Playing),
        ]
    );
}
