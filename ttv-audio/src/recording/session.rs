//! Recording session state machine
//!
//! `Inactive → Requesting → Recording ↔ Paused → Stopping → Inactive`, with
//! `Failed` reachable from every active state. The capture stream exists only
//! between a successful acquisition and the return to `Inactive`/`Failed`.
//!
//! Every `start` bumps a generation number. The ceiling timer, the fault pump
//! and a pending acquisition all compare against it, so work belonging to an
//! earlier start can never touch the current one.

use super::capture::{CaptureBackend, CaptureFault, CaptureStream, FaultNotifier};
use crate::error::{Error, RecordingError};
use crate::registry::{ResourceHandle, ResourceRegistry};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use ttv_common::config::RecordingConfig;
use ttv_common::events::{EventBus, RecordingState, TtvEvent};

/// Result handed to `on_max_duration` when the ceiling stops a recording
#[derive(Debug, Clone)]
pub struct AutoStopped {
    pub data: Option<Bytes>,
    pub duration: Duration,
}

pub type MaxDurationCallback = Box<dyn FnOnce(AutoStopped) + Send + 'static>;
pub type RecordingErrorCallback = Box<dyn FnOnce(RecordingError) + Send + 'static>;

/// Callbacks for one recording; each fires at most once
#[derive(Default)]
pub struct RecordingCallbacks {
    pub on_max_duration: Option<MaxDurationCallback>,
    pub on_error: Option<RecordingErrorCallback>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_max_duration(mut self, callback: impl FnOnce(AutoStopped) + Send + 'static) -> Self {
        self.on_max_duration = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(RecordingError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for RecordingCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingCallbacks")
            .field("on_max_duration", &self.on_max_duration.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

struct RecordingInner {
    state: RecordingState,
    generation: u64,
    stream: Option<Box<dyn CaptureStream>>,
    /// Active time banked at the last pause
    accumulated: Duration,
    recording_since: Option<Instant>,
    callbacks: RecordingCallbacks,
    ceiling_timer: Option<JoinHandle<()>>,
}

impl RecordingInner {
    fn elapsed(&self) -> Duration {
        self.accumulated
            + self
                .recording_since
                .map_or(Duration::ZERO, |since| since.elapsed())
    }

    fn cancel_ceiling(&mut self) {
        if let Some(timer) = self.ceiling_timer.take() {
            timer.abort();
        }
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
    }
}

struct Shared {
    inner: Mutex<RecordingInner>,
    backend: Arc<dyn CaptureBackend>,
    config: RecordingConfig,
    events: EventBus,
}

impl Shared {
    fn set_state(&self, inner: &mut RecordingInner, new_state: RecordingState) {
        let old_state = inner.state;
        if old_state == new_state {
            return;
        }
        inner.state = new_state;
        self.events.emit_lossy(TtvEvent::RecordingStateChanged {
            old_state,
            new_state,
            timestamp: ttv_common::time::now(),
        });
        debug!(%old_state, %new_state, "Recording state changed");
    }

    /// Flush and release the stream, landing in `Inactive`
    ///
    /// A flush failure lands in `Failed` instead; the stream is released
    /// either way.
    fn finish_locked(&self, inner: &mut RecordingInner) -> Result<Option<Bytes>, RecordingError> {
        self.set_state(inner, RecordingState::Stopping);

        if let Some(since) = inner.recording_since.take() {
            inner.accumulated += since.elapsed();
        }
        let flushed = match inner.stream.as_mut() {
            Some(stream) => stream.flush(),
            None => Ok(None),
        };
        inner.release_stream();

        match flushed {
            Ok(data) => {
                self.set_state(inner, RecordingState::Inactive);
                Ok(data)
            }
            Err(reason) => {
                self.set_state(inner, RecordingState::Failed);
                Err(RecordingError::DeviceFailure { reason })
            }
        }
    }

    fn arm_ceiling(self: &Arc<Self>, inner: &mut RecordingInner) {
        inner.cancel_ceiling();
        let remaining = self.config.max_duration().saturating_sub(inner.accumulated);
        let generation = inner.generation;
        let shared = Arc::clone(self);
        inner.ceiling_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            shared.auto_stop(generation).await;
        }));
    }

    async fn auto_stop(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != RecordingState::Recording {
            return;
        }
        // This task is the timer; drop the handle without aborting ourselves
        inner.ceiling_timer.take();

        let result = self.finish_locked(&mut inner);
        let duration = inner.accumulated;
        let on_max_duration = inner.callbacks.on_max_duration.take();
        let on_error = inner.callbacks.on_error.take();
        drop(inner);

        match result {
            Ok(data) => {
                info!(?duration, "Recording reached its maximum duration");
                self.events.emit_lossy(TtvEvent::RecordingAutoStopped {
                    duration_ms: duration.as_millis() as u64,
                    captured_bytes: data.as_ref().map_or(0, |d| d.len() as u64),
                    timestamp: ttv_common::time::now(),
                });
                if let Some(callback) = on_max_duration {
                    callback(AutoStopped { data, duration });
                }
            }
            Err(error) => {
                warn!(%error, "Recording failed while auto-stopping");
                if let Some(callback) = on_error {
                    callback(error);
                }
            }
        }
    }

    /// `Requesting → Inactive` for a start whose caller went away
    fn abandon_request_locked(&self, inner: &mut RecordingInner, generation: u64) {
        if inner.generation != generation || inner.state != RecordingState::Requesting {
            return;
        }
        inner.generation += 1;
        self.set_state(inner, RecordingState::Inactive);
        debug!("Microphone request abandoned by its caller");
    }

    /// Run `f` under the lock from a synchronous `drop`
    ///
    /// When the lock is held elsewhere `f` runs on a spawned task instead.
    fn lock_from_drop<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&Shared, &mut RecordingInner) + Send + 'static,
    {
        if let Ok(mut inner) = self.inner.try_lock() {
            f(Arc::as_ref(self), &mut *inner);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::clone(self);
                runtime.spawn(async move {
                    let mut inner = shared.inner.lock().await;
                    f(Arc::as_ref(&shared), &mut *inner);
                });
            }
            Err(_) => warn!("No runtime to finish recording cleanup"),
        }
    }

    async fn handle_fault(&self, fault: CaptureFault) {
        let mut inner = self.inner.lock().await;
        if inner.generation != fault.generation || !inner.state.is_active() {
            debug!(generation = fault.generation, "Ignoring fault from a finished recording");
            return;
        }

        inner.cancel_ceiling();
        if let Some(since) = inner.recording_since.take() {
            inner.accumulated += since.elapsed();
        }
        inner.release_stream();
        self.set_state(&mut inner, RecordingState::Failed);
        let on_error = inner.callbacks.on_error.take();
        drop(inner);

        warn!(reason = %fault.reason, "Capture device failed");
        if let Some(callback) = on_error {
            callback(RecordingError::DeviceFailure {
                reason: fault.reason,
            });
        }
    }
}

/// Owns the microphone capture lifecycle
pub struct RecordingSession {
    shared: Arc<Shared>,
    fault_tx: mpsc::UnboundedSender<CaptureFault>,
    fault_pump: JoinHandle<()>,
}

impl RecordingSession {
    /// Must be called from within a tokio runtime
    pub fn new(backend: Arc<dyn CaptureBackend>, config: RecordingConfig, events: EventBus) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(RecordingInner {
                state: RecordingState::Inactive,
                generation: 0,
                stream: None,
                accumulated: Duration::ZERO,
                recording_since: None,
                callbacks: RecordingCallbacks::default(),
                ceiling_timer: None,
            }),
            backend,
            config,
            events,
        });

        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel::<CaptureFault>();
        let pump_shared = Arc::clone(&shared);
        let fault_pump = tokio::spawn(async move {
            while let Some(fault) = fault_rx.recv().await {
                pump_shared.handle_fault(fault).await;
            }
        });

        Self {
            shared,
            fault_tx,
            fault_pump,
        }
    }

    /// Acquire the microphone and begin recording
    ///
    /// Allowed from `Inactive` or `Failed`. Device refusals leave the session
    /// `Failed` and are returned, not delivered to `on_error`.
    pub async fn start(&self, callbacks: RecordingCallbacks) -> Result<(), RecordingError> {
        let generation = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state.is_active() {
                return Err(RecordingError::InvalidState {
                    operation: "start",
                    state: inner.state,
                });
            }
            inner.generation += 1;
            inner.accumulated = Duration::ZERO;
            inner.recording_since = None;
            inner.callbacks = callbacks;
            self.shared.set_state(&mut inner, RecordingState::Requesting);
            inner.generation
        };

        // Lock is not held across the permission prompt so stop() can abort it
        let mut pending = PendingAcquire {
            shared: Arc::clone(&self.shared),
            generation,
            armed: true,
        };
        let notifier = FaultNotifier::new(generation, self.fault_tx.clone());
        let acquired = self.shared.backend.acquire(&self.shared.config, notifier).await;

        let mut inner = self.shared.inner.lock().await;
        pending.armed = false;
        if inner.generation != generation || inner.state != RecordingState::Requesting {
            if let Ok(mut stream) = acquired {
                stream.release();
            }
            debug!("Acquisition finished after the recording was stopped");
            return Err(RecordingError::InvalidState {
                operation: "start",
                state: inner.state,
            });
        }

        match acquired {
            Ok(stream) => {
                inner.stream = Some(stream);
                inner.recording_since = Some(Instant::now());
                self.shared.set_state(&mut inner, RecordingState::Recording);
                self.shared.arm_ceiling(&mut inner);
                info!(
                    max_duration_secs = self.shared.config.max_duration_secs,
                    "Recording started"
                );
                Ok(())
            }
            Err(refusal) => {
                let error = RecordingError::from(refusal);
                self.shared.set_state(&mut inner, RecordingState::Failed);
                warn!(%error, "Microphone unavailable");
                Err(error)
            }
        }
    }

    /// `Recording → Paused`
    pub async fn pause(&self) -> Result<(), RecordingError> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != RecordingState::Recording {
            return Err(RecordingError::InvalidState {
                operation: "pause",
                state: inner.state,
            });
        }
        inner.cancel_ceiling();
        if let Some(since) = inner.recording_since.take() {
            inner.accumulated += since.elapsed();
        }
        if let Some(stream) = inner.stream.as_mut() {
            stream.pause();
        }
        self.shared.set_state(&mut inner, RecordingState::Paused);
        Ok(())
    }

    /// `Paused → Recording`; the ceiling counts only the remaining time
    pub async fn resume(&self) -> Result<(), RecordingError> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != RecordingState::Paused {
            return Err(RecordingError::InvalidState {
                operation: "resume",
                state: inner.state,
            });
        }
        if let Some(stream) = inner.stream.as_mut() {
            stream.resume();
        }
        inner.recording_since = Some(Instant::now());
        self.shared.set_state(&mut inner, RecordingState::Recording);
        self.shared.arm_ceiling(&mut inner);
        Ok(())
    }

    /// Stop recording and return the captured WAV, if any
    ///
    /// Stopping while the device is still being requested abandons the
    /// request. Stopping an inactive session returns `Ok(None)`.
    pub async fn stop(&self) -> Result<Option<Bytes>, RecordingError> {
        let mut inner = self.shared.inner.lock().await;
        match inner.state {
            RecordingState::Recording | RecordingState::Paused => {
                inner.cancel_ceiling();
                let result = self.shared.finish_locked(&mut inner);
                if let Ok(data) = &result {
                    info!(
                        duration = ?inner.accumulated,
                        captured_bytes = data.as_ref().map_or(0, |d| d.len()),
                        "Recording stopped"
                    );
                }
                result
            }
            RecordingState::Requesting => {
                inner.generation += 1;
                self.shared.set_state(&mut inner, RecordingState::Inactive);
                debug!("Recording stopped before the device was acquired");
                Ok(None)
            }
            RecordingState::Inactive | RecordingState::Failed | RecordingState::Stopping => {
                Ok(None)
            }
        }
    }

    /// Stop and store the capture in `registry`
    ///
    /// Returns `None` when nothing was captured.
    pub async fn stop_and_register(
        &self,
        registry: &ResourceRegistry,
        id: Option<String>,
    ) -> Result<Option<ResourceHandle>, Error> {
        match self.stop().await? {
            Some(data) => Ok(Some(registry.register(data, id).await?)),
            None => Ok(None),
        }
    }

    pub async fn state(&self) -> RecordingState {
        self.shared.inner.lock().await.state
    }

    /// Active recording time so far, pauses excluded
    pub async fn accumulated_duration(&self) -> Duration {
        self.shared.inner.lock().await.elapsed()
    }

    pub fn max_duration(&self) -> Duration {
        self.shared.config.max_duration()
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.fault_pump.abort();
        self.shared.lock_from_drop(|_, inner| {
            inner.cancel_ceiling();
            inner.release_stream();
        });
    }
}

/// Returns the session to `Inactive` if `start` is dropped mid-acquisition
struct PendingAcquire {
    shared: Arc<Shared>,
    generation: u64,
    armed: bool,
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let generation = self.generation;
        self.shared
            .lock_from_drop(move |shared, inner| shared.abandon_request_locked(inner, generation));
    }
}
