//! Playback platform boundary
//!
//! `AudioBackend` opens a source into an `AudioSink` (the native audio element
//! in a browser, an output stream on desktop). Sinks report completion and
//! runtime failures through a `SinkNotifier`, tagged with the session id and
//! play cycle so the manager can discard notifications from torn-down sinks.
//!
//! `SimulatedBackend` is the stand-in used by the demo and the tests: it
//! validates WAV bytes with hound and drives a timer-based transport.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Source content handed to the backend after the manager resolved it
#[derive(Debug, Clone)]
pub enum SourceData {
    /// Persistent reference (static asset or file path)
    Url(String),
    /// Bytes read from the resource registry
    Bytes(Bytes),
}

/// Why a backend could not open a source
///
/// The manager classifies these into `PlaybackError` with session context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    Unavailable(String),
    Decode(String),
}

/// Notification kinds a sink can raise after playback began
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEventKind {
    Ended,
    Error(String),
}

/// Sink notification routed back to the playback manager
#[derive(Debug, Clone)]
pub struct SinkEvent {
    pub session_id: String,
    pub cycle: u64,
    pub kind: SinkEventKind,
}

/// Handle a sink uses to report completion or failure
#[derive(Debug, Clone)]
pub struct SinkNotifier {
    session_id: String,
    cycle: u64,
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl SinkNotifier {
    pub fn new(session_id: String, cycle: u64, tx: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { session_id, cycle, tx }
    }

    pub fn ended(&self) {
        self.send(SinkEventKind::Ended);
    }

    pub fn error(&self, reason: impl Into<String>) {
        self.send(SinkEventKind::Error(reason.into()));
    }

    fn send(&self, kind: SinkEventKind) {
        // Manager gone means nobody is waiting for this notification
        let _ = self.tx.send(SinkEvent {
            session_id: self.session_id.clone(),
            cycle: self.cycle,
            kind,
        });
    }
}

/// Opens sources into playable sinks
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn open(
        &self,
        source: SourceData,
        notifier: SinkNotifier,
    ) -> Result<Box<dyn AudioSink>, OpenError>;
}

/// One native playback resource
///
/// Dropping a sink releases it; `stop` additionally rewinds it.
pub trait AudioSink: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn set_playback_rate(&mut self, rate: f32);
    fn position(&self) -> Duration;
    fn duration(&self) -> Duration;
}

/// Timer-driven backend for tests and the demo
///
/// Accepts WAV data only. `Url` sources resolve against registered static
/// assets first, then as local file paths (`file://` prefix optional).
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    assets: Arc<HashMap<String, Bytes>>,
    open_delay: Duration,
    opened: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` for `url`, like a bundled preview asset
    pub fn with_static_asset(mut self, url: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Arc::make_mut(&mut self.assets).insert(url.into(), bytes.into());
        self
    }

    /// Pretend opening takes this long (exercises the reentrancy guard)
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Total sinks ever opened
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sinks currently alive (opened and not yet dropped)
    pub fn live_sinks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    async fn load(&self, source: SourceData) -> Result<Bytes, OpenError> {
        match source {
            SourceData::Bytes(bytes) => Ok(bytes),
            SourceData::Url(url) => {
                if let Some(bytes) = self.assets.get(&url) {
                    return Ok(bytes.clone());
                }
                let path = url.strip_prefix("file://").unwrap_or(&url);
                tokio::fs::read(path)
                    .await
                    .map(Bytes::from)
                    .map_err(|e| OpenError::Unavailable(format!("{}: {}", url, e)))
            }
        }
    }
}

/// Duration of a WAV payload, or why it is not playable
pub fn wav_duration(bytes: &[u8]) -> Result<Duration, OpenError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| OpenError::Decode(e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(OpenError::Decode("sample rate is zero".to_string()));
    }
    // duration() counts frames per channel
    let frames = reader.duration() as f64;
    Ok(Duration::from_secs_f64(frames / spec.sample_rate as f64))
}

#[async_trait]
impl AudioBackend for SimulatedBackend {
    async fn open(
        &self,
        source: SourceData,
        notifier: SinkNotifier,
    ) -> Result<Box<dyn AudioSink>, OpenError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        let bytes = self.load(source).await?;
        let duration = wav_duration(&bytes)?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        debug!(
            session_id = %notifier.session_id,
            cycle = notifier.cycle,
            ?duration,
            "Simulated sink opened"
        );

        Ok(Box::new(SimulatedSink {
            duration,
            position: Duration::ZERO,
            playing_since: None,
            rate: 1.0,
            volume: 1.0,
            timer: None,
            notifier,
            live: Arc::clone(&self.live),
        }))
    }
}

struct SimulatedSink {
    duration: Duration,
    /// Position at the last anchor (play/pause/rate change)
    position: Duration,
    playing_since: Option<Instant>,
    rate: f32,
    volume: f32,
    timer: Option<JoinHandle<()>>,
    notifier: SinkNotifier,
    live: Arc<AtomicUsize>,
}

impl SimulatedSink {
    fn current_position(&self) -> Duration {
        match self.playing_since {
            Some(since) => (self.position + since.elapsed().mul_f32(self.rate)).min(self.duration),
            None => self.position,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn schedule_end(&mut self) {
        self.cancel_timer();
        let remaining = self.duration.saturating_sub(self.position).div_f32(self.rate);
        let notifier = self.notifier.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            notifier.ended();
        }));
    }
}

impl AudioSink for SimulatedSink {
    fn play(&mut self) {
        if self.playing_since.is_some() {
            return;
        }
        self.playing_since = Some(Instant::now());
        self.schedule_end();
    }

    fn pause(&mut self) {
        if self.playing_since.is_none() {
            return;
        }
        self.position = self.current_position();
        self.playing_since = None;
        self.cancel_timer();
    }

    fn stop(&mut self) {
        self.cancel_timer();
        self.playing_since = None;
        self.position = Duration::ZERO;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn set_playback_rate(&mut self, rate: f32) {
        if self.playing_since.is_some() {
            self.position = self.current_position();
            self.playing_since = Some(Instant::now());
            self.rate = rate;
            self.schedule_end();
        } else {
            self.rate = rate;
        }
    }

    fn position(&self) -> Duration {
        self.current_position()
    }

    fn duration(&self) -> Duration {
        self.duration
    }
}

impl Drop for SimulatedSink {
    fn drop(&mut self) {
        self.cancel_timer();
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
