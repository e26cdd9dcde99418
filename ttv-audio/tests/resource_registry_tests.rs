//! Resource registry lifecycle, budget and sweeping through the audio context

mod helpers;

use helpers::{blob, drain, harness};
use std::io::Write;
use std::time::Duration;
use ttv_audio::error::ResourceError;
use ttv_common::config::TomlConfig;
use ttv_common::events::{EvictionReason, TtvEvent};

fn config_from(toml: &str) -> TomlConfig {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(toml.as_bytes()).unwrap();
    TomlConfig::load(Some(file.path())).unwrap()
}

fn evictions(events: Vec<TtvEvent>) -> Vec<(String, EvictionReason)> {
    events
        .into_iter()
        .filter_map(|event| match event {
            TtvEvent::ResourceEvicted {
                resource_id, reason, ..
            } => Some((resource_id, reason)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_release_makes_id_unknown() {
    let h = harness(TomlConfig::default());
    let registry = h.context.registry();

    let handle = registry.register(blob(64), None).await.unwrap();
    assert_eq!(handle.size_bytes, 64);
    assert!(handle.locator.as_str().starts_with("blob:ttv/"));

    assert!(registry.release(&handle.id).await);
    assert_eq!(
        registry.access(&handle.id).await,
        Err(ResourceError::NotFound { id: handle.id.clone() })
    );
    assert!(!registry.release(&handle.id).await);
}

#[tokio::test]
async fn test_stale_locator_fails_loudly() {
    let h = harness(TomlConfig::default());
    let registry = h.context.registry();

    let first = registry.register(blob(10), Some("take".into())).await.unwrap();
    let second = registry.register(blob(20), Some("take".into())).await.unwrap();
    assert_ne!(first.locator, second.locator);

    assert!(matches!(
        registry.read(&first.locator).await,
        Err(ResourceError::Released { .. })
    ));
    assert_eq!(registry.read(&second.locator).await.unwrap().len(), 20);
    assert_eq!(registry.total_bytes().await, 20);
}

#[tokio::test(start_paused = true)]
async fn test_budget_evicts_least_recently_accessed() {
    let config = config_from(
        r#"
        [registry]
        max_total_bytes = 1000
        eviction_target_ratio = 0.8
        "#,
    );
    let h = harness(config);
    let registry = h.context.registry();
    let mut rx = h.context.events().subscribe();

    for id in ["a", "b", "c"] {
        registry.register(blob(300), Some(id.into())).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
    }
    // "a" becomes the most recently used
    registry.access("a").await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;

    registry.register(blob(300), Some("d".into())).await.unwrap();

    assert!(registry.total_bytes().await <= 800);
    assert!(registry.contains("a").await);
    assert!(registry.contains("d").await);
    assert!(!registry.contains("b").await);
    assert!(!registry.contains("c").await);

    assert_eq!(
        evictions(drain(&mut rx)),
        vec![
            ("b".to_string(), EvictionReason::Budget),
            ("c".to_string(), EvictionReason::Budget),
        ]
    );
}

#[tokio::test]
async fn test_oversized_payload_is_refused() {
    let h = harness(config_from("[registry]\nmax_total_bytes = 100\n"));
    let result = h.context.registry().register(blob(101), Some("huge".into())).await;

    assert!(matches!(result, Err(ResourceError::AllocationFailed { .. })));
    assert!(h.context.registry().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_evicts_idle_entries() {
    let config = config_from(
        r#"
        [registry]
        max_idle_secs = 10
        max_age_secs = 1000
        sweep_interval_secs = 2
        "#,
    );
    let h = harness(config);
    let registry = h.context.registry();
    let mut rx = h.context.events().subscribe();

    registry.register(blob(8), Some("idle".into())).await.unwrap();
    registry.register(blob(8), Some("busy".into())).await.unwrap();

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(3)).await;
        registry.access("busy").await.unwrap();
    }

    assert!(!registry.contains("idle").await);
    assert!(registry.contains("busy").await);
    assert_eq!(
        evictions(drain(&mut rx)),
        vec![("idle".to_string(), EvictionReason::IdleTimeout)]
    );

    h.context.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sweep_enforces_maximum_age() {
    let config = config_from(
        r#"
        [registry]
        max_idle_secs = 100
        max_age_secs = 20
        sweep_interval_secs = 3600
        "#,
    );
    let h = harness(config);
    let registry = h.context.registry();

    registry.register(blob(8), Some("old".into())).await.unwrap();
    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(5)).await;
        registry.access("old").await.unwrap();
    }

    assert_eq!(registry.sweep().await, vec!["old".to_string()]);
}
