//! Process-wide audio context
//!
//! Built once at startup and passed to whoever needs audio. Owns one of each
//! component, the event bus they report on, and the registry sweeper.

use crate::error::{Result, TaskError};
use crate::limiter::{ConcurrencyLimiter, TaskContext};
use crate::playback::{AudioBackend, PlaybackManager, SimulatedBackend};
use crate::recording::{CaptureBackend, RecordingSession, SimulatedCapture};
use crate::registry::{spawn_sweeper, ResourceHandle, ResourceRegistry};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ttv_common::config::TomlConfig;
use ttv_common::events::{EventBus, TaskKind, TaskPriority};

pub struct AudioContext {
    events: EventBus,
    registry: Arc<ResourceRegistry>,
    playback: PlaybackManager,
    recording: RecordingSession,
    limiter: ConcurrencyLimiter,
    sweeper_cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AudioContext {
    /// Build every component from `config` and start the sweeper
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &TomlConfig,
        playback_backend: Arc<dyn AudioBackend>,
        capture_backend: Arc<dyn CaptureBackend>,
    ) -> Self {
        let events = EventBus::new(config.events.capacity);
        let registry = Arc::new(
            ResourceRegistry::new(config.registry.clone()).with_event_bus(events.clone()),
        );
        let playback = PlaybackManager::new(
            Arc::clone(&registry),
            playback_backend,
            events.clone(),
            config.playback.clone(),
        );
        let recording = RecordingSession::new(capture_backend, config.recording.clone(), events.clone());
        let limiter = ConcurrencyLimiter::new(config.limiter.clone(), events.clone());

        let sweeper_cancel = CancellationToken::new();
        let sweeper = spawn_sweeper(Arc::clone(&registry), sweeper_cancel.clone());

        info!(
            budget_bytes = config.registry.max_total_bytes,
            max_concurrent = config.limiter.max_concurrent,
            max_recording_secs = config.recording.max_duration_secs,
            "Audio context ready"
        );

        Self {
            events,
            registry,
            playback,
            recording,
            limiter,
            sweeper_cancel,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Context backed by the simulated playback and capture backends
    pub fn simulated(config: &TomlConfig) -> Self {
        Self::new(
            config,
            Arc::new(SimulatedBackend::new()),
            Arc::new(SimulatedCapture::new()),
        )
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn playback(&self) -> &PlaybackManager {
        &self.playback
    }

    pub fn recording(&self) -> &RecordingSession {
        &self.recording
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Run a generation task under the limiter and register its audio
    pub async fn generate<F, Fut>(
        &self,
        kind: TaskKind,
        priority: TaskPriority,
        id: Option<String>,
        body: F,
    ) -> Result<ResourceHandle>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = std::result::Result<Bytes, TaskError>>,
    {
        let audio = self.limiter.run(kind, priority, body).await?;
        let handle = self.registry.register(audio, id).await?;
        info!(
            resource_id = %handle.id,
            size_bytes = handle.size_bytes,
            %kind,
            "Generated audio registered"
        );
        Ok(handle)
    }

    /// Stop playback and recording, cancel tasks, stop the sweeper
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.playback.stop_all().await;
        if let Err(error) = self.recording.stop().await {
            warn!(%error, "Recording did not stop cleanly");
        }
        self.limiter.cancel_all();

        self.sweeper_cancel.cancel();
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            if let Err(e) = sweeper.await {
                warn!(error = %e, "Registry sweeper ended abnormally");
            }
        }
        info!("Audio context shut down");
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.sweeper_cancel.cancel();
    }
}
