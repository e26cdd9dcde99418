//! Playback Session Manager
//!
//! Maps caller-chosen session ids to at most one native sink each and keeps
//! at most one session `Playing` across the whole manager.
//!
//! All state lives behind one async mutex. `play` holds it from "stop the
//! other session" through "sink is playing", so no caller can observe two
//! playing sessions or open two sinks for the same id.
//!
//! Sinks report completion through a single channel drained by a background
//! task. Each notification carries the play cycle it belongs to; anything from
//! a torn-down cycle is dropped, which is what keeps `on_ended`/`on_error` to
//! exactly one delivery.

use super::backend::{AudioBackend, AudioSink, OpenError, SinkEvent, SinkEventKind, SinkNotifier, SourceData};
use super::session::{
    clamp_playback_rate, clamp_volume, EndedCallback, ErrorCallback, PlaybackOptions,
    PlaybackSession, SessionSource,
};
use crate::error::PlaybackError;
use crate::registry::ResourceRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use ttv_common::config::PlaybackConfig;
use ttv_common::events::{EventBus, PlaybackState, TtvEvent};

struct SessionEntry {
    session: PlaybackSession,
    sink: Option<Box<dyn AudioSink>>,
    on_ended: Option<EndedCallback>,
    on_error: Option<ErrorCallback>,
    release_source_on_finish: bool,
}

impl SessionEntry {
    /// Registry id to release when this session leaves the table
    fn owned_resource(&self) -> Option<String> {
        match (&self.session.source, self.release_source_on_finish) {
            (SessionSource::Resource(id), true) => Some(id.clone()),
            _ => None,
        }
    }
}

#[derive(Default)]
struct ManagerInner {
    sessions: HashMap<String, SessionEntry>,
    /// The one session allowed to be Playing
    active: Option<String>,
    next_cycle: u64,
}

/// Owns playback sessions and their native sinks
pub struct PlaybackManager {
    inner: Arc<Mutex<ManagerInner>>,
    registry: Arc<ResourceRegistry>,
    backend: Arc<dyn AudioBackend>,
    events: EventBus,
    defaults: PlaybackConfig,
    sink_tx: mpsc::UnboundedSender<SinkEvent>,
    sink_pump: JoinHandle<()>,
}

impl PlaybackManager {
    /// Create the manager and start its sink-notification task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        registry: Arc<ResourceRegistry>,
        backend: Arc<dyn AudioBackend>,
        events: EventBus,
        defaults: PlaybackConfig,
    ) -> Self {
        let inner = Arc::new(Mutex::new(ManagerInner::default()));
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();

        let sink_pump = tokio::spawn(pump_sink_events(
            sink_rx,
            Arc::clone(&inner),
            Arc::clone(&registry),
            events.clone(),
        ));

        Self {
            inner,
            registry,
            backend,
            events,
            defaults,
            sink_tx,
            sink_pump,
        }
    }

    /// Start (or continue) playback of `source` under `id`
    ///
    /// Any other playing session is stopped first. Returns once the sink is
    /// playing, not when playback ends. Calling again for an id that is
    /// already playing the same source is a no-op; a paused one resumes.
    /// Callbacks passed on such a call replace the stored ones.
    pub async fn play(
        &self,
        id: &str,
        source: SessionSource,
        options: PlaybackOptions,
    ) -> Result<(), PlaybackError> {
        let mut inner = self.inner.lock().await;

        let reusable = inner
            .sessions
            .get(id)
            .filter(|entry| entry.session.source == source && entry.sink.is_some())
            .map(|entry| entry.session.state);

        match reusable {
            Some(PlaybackState::Playing) => {
                debug!(session_id = %id, "Already playing, keeping current sink");
                if let Some(entry) = inner.sessions.get_mut(id) {
                    apply_options(entry, options);
                }
                return Ok(());
            }
            Some(PlaybackState::Paused) => {
                self.stop_others_locked(&mut inner, id).await;
                if let Some(entry) = inner.sessions.get_mut(id) {
                    apply_options(entry, options);
                }
                self.resume_locked(&mut inner, id);
                return Ok(());
            }
            _ => {}
        }

        self.stop_others_locked(&mut inner, id).await;
        if inner.sessions.contains_key(id) {
            self.teardown_locked(&mut inner, id).await;
        }

        inner.next_cycle += 1;
        let cycle = inner.next_cycle;
        let volume = clamp_volume(options.volume.unwrap_or(self.defaults.default_volume));
        let playback_rate =
            clamp_playback_rate(options.playback_rate.unwrap_or(self.defaults.default_playback_rate));

        inner.sessions.insert(
            id.to_string(),
            SessionEntry {
                session: PlaybackSession {
                    id: id.to_string(),
                    state: PlaybackState::Loading,
                    source: source.clone(),
                    volume,
                    playback_rate,
                    cycle,
                },
                sink: None,
                on_ended: options.on_ended,
                on_error: options.on_error,
                release_source_on_finish: options.release_source_on_finish,
            },
        );
        emit_transition(&self.events, id, PlaybackState::Idle, PlaybackState::Loading);

        let mut loading = LoadingGuard {
            inner: &mut *inner,
            id,
            events: &self.events,
            registry: &self.registry,
            armed: true,
        };

        let opened = match self.resolve_source(id, &source).await {
            Ok(data) => {
                let notifier = SinkNotifier::new(id.to_string(), cycle, self.sink_tx.clone());
                self.backend
                    .open(data, notifier)
                    .await
                    .map_err(|e| classify_open_error(id, &source, e))
            }
            Err(e) => Err(e),
        };

        let mut sink = match opened {
            Ok(sink) => sink,
            Err(error) => {
                warn!(session_id = %id, %error, "Playback failed to start");
                loading.armed = false;
                let failed = loading.inner.sessions.remove(id);
                drop(loading);
                emit_transition(&self.events, id, PlaybackState::Loading, PlaybackState::Failed);
                drop(inner);

                if let Some(mut entry) = failed {
                    if let Some(resource_id) = entry.owned_resource() {
                        self.registry.release(&resource_id).await;
                    }
                    if let Some(on_error) = entry.on_error.take() {
                        on_error(error.clone());
                    }
                }
                return Err(error);
            }
        };

        sink.set_volume(volume);
        sink.set_playback_rate(playback_rate);
        sink.play();

        if let Some(entry) = loading.inner.sessions.get_mut(id) {
            entry.sink = Some(sink);
            entry.session.state = PlaybackState::Playing;
        }
        loading.inner.active = Some(id.to_string());
        loading.armed = false;
        drop(loading);
        emit_transition(&self.events, id, PlaybackState::Loading, PlaybackState::Playing);

        info!(session_id = %id, %source, cycle, "Playback started");
        Ok(())
    }

    /// `Playing → Paused`; no-op in any other state
    pub async fn pause(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.sessions.get_mut(id) else {
            return;
        };
        if entry.session.state != PlaybackState::Playing {
            return;
        }

        if let Some(sink) = entry.sink.as_mut() {
            sink.pause();
        }
        entry.session.state = PlaybackState::Paused;
        if inner.active.as_deref() == Some(id) {
            inner.active = None;
        }
        emit_transition(&self.events, id, PlaybackState::Playing, PlaybackState::Paused);
        debug!(session_id = %id, "Playback paused");
    }

    /// `Paused → Playing`, stopping whichever other session is playing
    ///
    /// Returns false when the session is not paused.
    pub async fn resume(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let paused = inner
            .sessions
            .get(id)
            .is_some_and(|entry| entry.session.state == PlaybackState::Paused);
        if !paused {
            return false;
        }

        self.stop_others_locked(&mut inner, id).await;
        self.resume_locked(&mut inner, id);
        true
    }

    /// Stop a session, rewind and release its sink, and forget it
    ///
    /// Idempotent; unknown ids are a no-op. `on_ended` is not delivered for a
    /// stopped cycle.
    pub async fn stop(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(id) {
            self.teardown_locked(&mut inner, id).await;
        }
    }

    /// Stop every session (teardown, or before an unrelated session)
    pub async fn stop_all(&self) {
        let mut inner = self.inner.lock().await;
        let ids: Vec<String> = inner.sessions.keys().cloned().collect();
        for id in ids {
            self.teardown_locked(&mut inner, &id).await;
        }
        inner.active = None;
    }

    pub async fn is_playing(&self, id: &str) -> bool {
        self.state(id).await == PlaybackState::Playing
    }

    /// Session state; ids without a session report `Idle`
    pub async fn state(&self, id: &str) -> PlaybackState {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(id)
            .map_or(PlaybackState::Idle, |entry| entry.session.state)
    }

    /// Id of the session currently playing, if any
    pub async fn active_session(&self) -> Option<String> {
        self.inner.lock().await.active.clone()
    }

    pub async fn snapshot(&self, id: &str) -> Option<PlaybackSession> {
        let inner = self.inner.lock().await;
        inner.sessions.get(id).map(|entry| entry.session.clone())
    }

    /// Current position and total duration of a session's sink
    pub async fn position(&self, id: &str) -> Option<(Duration, Duration)> {
        let inner = self.inner.lock().await;
        let sink = inner.sessions.get(id)?.sink.as_ref()?;
        Some((sink.position(), sink.duration()))
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    /// Set volume, clamped to [0, 1]; returns false for unknown ids
    pub async fn set_volume(&self, id: &str, volume: f32) -> bool {
        let volume = clamp_volume(volume);
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.sessions.get_mut(id) else {
            return false;
        };
        entry.session.volume = volume;
        if let Some(sink) = entry.sink.as_mut() {
            sink.set_volume(volume);
        }
        true
    }

    /// Set playback rate, clamped to [0.5, 2]; returns false for unknown ids
    pub async fn set_playback_rate(&self, id: &str, rate: f32) -> bool {
        let rate = clamp_playback_rate(rate);
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.sessions.get_mut(id) else {
            return false;
        };
        entry.session.playback_rate = rate;
        if let Some(sink) = entry.sink.as_mut() {
            sink.set_playback_rate(rate);
        }
        true
    }

    async fn resolve_source(
        &self,
        id: &str,
        source: &SessionSource,
    ) -> Result<SourceData, PlaybackError> {
        match source {
            SessionSource::Url(url) => Ok(SourceData::Url(url.clone())),
            SessionSource::Resource(resource_id) => {
                let unavailable = |reason: String| PlaybackError::SourceUnavailable {
                    session_id: id.to_string(),
                    location: source.to_string(),
                    reason,
                };
                let locator = self
                    .registry
                    .access(resource_id)
                    .await
                    .map_err(|e| unavailable(e.to_string()))?;
                let bytes = self
                    .registry
                    .read(&locator)
                    .await
                    .map_err(|e| unavailable(e.to_string()))?;
                Ok(SourceData::Bytes(bytes))
            }
        }
    }

    fn resume_locked(&self, inner: &mut ManagerInner, id: &str) {
        if let Some(entry) = inner.sessions.get_mut(id) {
            if let Some(sink) = entry.sink.as_mut() {
                sink.play();
            }
            entry.session.state = PlaybackState::Playing;
            inner.active = Some(id.to_string());
            emit_transition(&self.events, id, PlaybackState::Paused, PlaybackState::Playing);
            debug!(session_id = %id, "Playback resumed");
        }
    }

    async fn stop_others_locked(&self, inner: &mut ManagerInner, id: &str) {
        if let Some(active) = inner.active.clone() {
            if active != id {
                debug!(stopped = %active, starting = %id, "Stopping active session");
                self.teardown_locked(inner, &active).await;
            }
        }
    }

    async fn teardown_locked(&self, inner: &mut ManagerInner, id: &str) {
        if inner.active.as_deref() == Some(id) {
            inner.active = None;
        }
        let Some(mut entry) = inner.sessions.remove(id) else {
            return;
        };

        if let Some(mut sink) = entry.sink.take() {
            sink.stop();
        }
        emit_transition(&self.events, id, entry.session.state, PlaybackState::Idle);
        if let Some(resource_id) = entry.owned_resource() {
            self.registry.release(&resource_id).await;
        }
        debug!(session_id = %id, "Session stopped");
    }
}

/// Removes a `Loading` entry whose `play` call went away before the sink
/// was stored
struct LoadingGuard<'a> {
    inner: &'a mut ManagerInner,
    id: &'a str,
    events: &'a EventBus,
    registry: &'a Arc<ResourceRegistry>,
    armed: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(entry) = self.inner.sessions.remove(self.id) else {
            return;
        };
        emit_transition(self.events, self.id, PlaybackState::Loading, PlaybackState::Idle);
        info!(session_id = %self.id, "Playback start abandoned before the sink opened");

        if let Some(resource_id) = entry.owned_resource() {
            let registry = Arc::clone(self.registry);
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        registry.release(&resource_id).await;
                    });
                }
                Err(_) => warn!(%resource_id, "No runtime to release source of abandoned session"),
            }
        }
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.sink_pump.abort();
    }
}

fn apply_options(entry: &mut SessionEntry, options: PlaybackOptions) {
    if let Some(volume) = options.volume {
        let volume = clamp_volume(volume);
        entry.session.volume = volume;
        if let Some(sink) = entry.sink.as_mut() {
            sink.set_volume(volume);
        }
    }
    if let Some(rate) = options.playback_rate {
        let rate = clamp_playback_rate(rate);
        entry.session.playback_rate = rate;
        if let Some(sink) = entry.sink.as_mut() {
            sink.set_playback_rate(rate);
        }
    }
    if options.on_ended.is_some() {
        entry.on_ended = options.on_ended;
    }
    if options.on_error.is_some() {
        entry.on_error = options.on_error;
    }
    entry.release_source_on_finish |= options.release_source_on_finish;
}

fn classify_open_error(id: &str, source: &SessionSource, error: OpenError) -> PlaybackError {
    match error {
        OpenError::Unavailable(reason) => PlaybackError::SourceUnavailable {
            session_id: id.to_string(),
            location: source.to_string(),
            reason,
        },
        OpenError::Decode(reason) => PlaybackError::DecodeFailed {
            session_id: id.to_string(),
            reason,
        },
    }
}

fn emit_transition(events: &EventBus, id: &str, old_state: PlaybackState, new_state: PlaybackState) {
    events.emit_lossy(TtvEvent::PlaybackStateChanged {
        session_id: id.to_string(),
        old_state,
        new_state,
        timestamp: ttv_common::time::now(),
    });
}

enum Delivery {
    Ended(EndedCallback),
    Error(ErrorCallback, PlaybackError),
}

/// Drain sink notifications, finishing the matching play cycle
async fn pump_sink_events(
    mut rx: mpsc::UnboundedReceiver<SinkEvent>,
    inner: Arc<Mutex<ManagerInner>>,
    registry: Arc<ResourceRegistry>,
    events: EventBus,
) {
    while let Some(event) = rx.recv().await {
        let mut guard = inner.lock().await;

        let current = guard
            .sessions
            .get(&event.session_id)
            .is_some_and(|entry| entry.session.cycle == event.cycle && entry.sink.is_some());
        if !current {
            debug!(
                session_id = %event.session_id,
                cycle = event.cycle,
                "Ignoring notification from a finished play cycle"
            );
            continue;
        }

        let Some(mut entry) = guard.sessions.remove(&event.session_id) else {
            continue;
        };
        if guard.active.as_deref() == Some(event.session_id.as_str()) {
            guard.active = None;
        }
        drop(guard);

        // Sink is spent; dropping releases it
        entry.sink.take();

        let old_state = entry.session.state;
        let delivery = match event.kind {
            SinkEventKind::Ended => {
                emit_transition(&events, &event.session_id, old_state, PlaybackState::Ended);
                info!(session_id = %event.session_id, "Playback ended");
                entry.on_ended.take().map(Delivery::Ended)
            }
            SinkEventKind::Error(reason) => {
                emit_transition(&events, &event.session_id, old_state, PlaybackState::Failed);
                warn!(session_id = %event.session_id, %reason, "Playback failed");
                let error = PlaybackError::DecodeFailed {
                    session_id: event.session_id.clone(),
                    reason,
                };
                entry.on_error.take().map(|cb| Delivery::Error(cb, error))
            }
        };

        if let Some(resource_id) = entry.owned_resource() {
            registry.release(&resource_id).await;
        }

        match delivery {
            Some(Delivery::Ended(callback)) => callback(),
            Some(Delivery::Error(callback, error)) => callback(error),
            None => {}
        }
    }
}
