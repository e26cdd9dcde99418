//! Microphone platform boundary
//!
//! `CaptureBackend::acquire` is the permission prompt plus device open. Once a
//! stream exists, asynchronous device failures come back through the
//! `FaultNotifier` handed to `acquire`.

use crate::error::RecordingError;
use crate::tone::render_frames;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::debug;
use ttv_common::config::RecordingConfig;

/// Platform-level reasons a capture device was not handed out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRefusal {
    /// User or policy denied permission
    NotAllowed,
    /// No input device present
    NotFound,
    /// No capture API on this platform
    NotSupported,
    Other(String),
}

impl From<DeviceRefusal> for RecordingError {
    fn from(refusal: DeviceRefusal) -> Self {
        match refusal {
            DeviceRefusal::NotAllowed => RecordingError::PermissionDenied,
            DeviceRefusal::NotFound => RecordingError::NoDevice,
            DeviceRefusal::NotSupported => RecordingError::Unsupported,
            DeviceRefusal::Other(reason) => RecordingError::DeviceFailure { reason },
        }
    }
}

/// Device failure raised after acquisition, tagged with the start it belongs to
#[derive(Debug, Clone)]
pub struct CaptureFault {
    pub generation: u64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct FaultNotifier {
    generation: u64,
    tx: mpsc::UnboundedSender<CaptureFault>,
}

impl FaultNotifier {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<CaptureFault>) -> Self {
        Self { generation, tx }
    }

    pub fn fault(&self, reason: impl Into<String>) {
        let _ = self.tx.send(CaptureFault {
            generation: self.generation,
            reason: reason.into(),
        });
    }
}

/// Acquires microphone streams
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn acquire(
        &self,
        config: &RecordingConfig,
        faults: FaultNotifier,
    ) -> Result<Box<dyn CaptureStream>, DeviceRefusal>;
}

/// An acquired capture device
///
/// `release` is idempotent and must be called before the stream is dropped;
/// dropping an unreleased stream releases it as well.
pub trait CaptureStream: Send {
    fn pause(&mut self);
    fn resume(&mut self);
    /// Encode everything captured so far; `None` when nothing was captured
    fn flush(&mut self) -> Result<Option<Bytes>, String>;
    fn release(&mut self);
}

/// Simulated microphone producing a sine tone for the time it was live
#[derive(Clone)]
pub struct SimulatedCapture {
    refusal: Option<DeviceRefusal>,
    acquire_delay: Duration,
    frequency_hz: f32,
    acquired: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    last_notifier: Arc<Mutex<Option<FaultNotifier>>>,
}

impl Default for SimulatedCapture {
    fn default() -> Self {
        Self {
            refusal: None,
            acquire_delay: Duration::ZERO,
            frequency_hz: 220.0,
            acquired: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            last_notifier: Arc::new(Mutex::new(None)),
        }
    }
}

impl SimulatedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every acquisition with `refusal`
    pub fn refusing(mut self, refusal: DeviceRefusal) -> Self {
        self.refusal = Some(refusal);
        self
    }

    /// Simulate a slow permission prompt
    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = delay;
        self
    }

    /// Raise a device failure on the most recently acquired stream
    ///
    /// Returns false if nothing was ever acquired.
    pub fn inject_fault(&self, reason: &str) -> bool {
        let guard = self.last_notifier.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(notifier) => {
                notifier.fault(reason);
                true
            }
            None => false,
        }
    }

    pub fn acquired_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Streams acquired and not yet released
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureBackend for SimulatedCapture {
    async fn acquire(
        &self,
        config: &RecordingConfig,
        faults: FaultNotifier,
    ) -> Result<Box<dyn CaptureStream>, DeviceRefusal> {
        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }
        if let Some(refusal) = &self.refusal {
            return Err(refusal.clone());
        }

        *self.last_notifier.lock().unwrap_or_else(PoisonError::into_inner) = Some(faults);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        debug!(sample_rate = config.sample_rate, channels = config.channels, "Simulated microphone acquired");

        Ok(Box::new(SimulatedStream {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frequency_hz: self.frequency_hz,
            captured: Duration::ZERO,
            live_since: Some(Instant::now()),
            released: false,
            live: Arc::clone(&self.live),
        }))
    }
}

struct SimulatedStream {
    sample_rate: u32,
    channels: u16,
    frequency_hz: f32,
    /// Captured time up to the last pause
    captured: Duration,
    live_since: Option<Instant>,
    released: bool,
    live: Arc<AtomicUsize>,
}

impl SimulatedStream {
    fn captured_total(&self) -> Duration {
        self.captured + self.live_since.map_or(Duration::ZERO, |since| since.elapsed())
    }
}

impl CaptureStream for SimulatedStream {
    fn pause(&mut self) {
        if let Some(since) = self.live_since.take() {
            self.captured += since.elapsed();
        }
    }

    fn resume(&mut self) {
        if self.live_since.is_none() && !self.released {
            self.live_since = Some(Instant::now());
        }
    }

    fn flush(&mut self) -> Result<Option<Bytes>, String> {
        if self.released {
            return Err("stream already released".to_string());
        }
        self.pause();
        let frames = (self.captured.as_secs_f64() * self.sample_rate as f64).round() as u64;
        if frames == 0 {
            return Ok(None);
        }
        render_frames(self.frequency_hz, frames, self.sample_rate, self.channels, 0.3)
            .map(Some)
            .map_err(|e| e.to_string())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.live_since = None;
        self.released = true;
        self.live.fetch_sub(1, Ordering::SeqCst);
        debug!(captured = ?self.captured_total(), "Simulated microphone released");
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> (FaultNotifier, mpsc::UnboundedReceiver<CaptureFault>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FaultNotifier::new(7, tx), rx)
    }

    #[test]
    fn test_refusals_map_to_recording_errors() {
        assert_eq!(RecordingError::from(DeviceRefusal::NotAllowed), RecordingError::PermissionDenied);
        assert_eq!(RecordingError::from(DeviceRefusal::NotFound), RecordingError::NoDevice);
        assert_eq!(RecordingError::from(DeviceRefusal::NotSupported), RecordingError::Unsupported);
        assert!(matches!(
            RecordingError::from(DeviceRefusal::Other("busy".into())),
            RecordingError::DeviceFailure { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_covers_only_live_time() {
        let capture = SimulatedCapture::new();
        let config = RecordingConfig {
            sample_rate: 8000,
            ..Default::default()
        };
        let (n, _rx) = notifier();
        let mut stream = capture.acquire(&config, n).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        stream.pause();
        tokio::time::sleep(Duration::from_secs(10)).await;
        stream.resume();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let wav = stream.flush().unwrap().unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(wav.as_ref())).unwrap();
        assert_eq!(reader.duration(), 16000);

        stream.release();
        stream.release();
        assert_eq!(capture.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_flush_is_none() {
        let capture = SimulatedCapture::new();
        let (n, _rx) = notifier();
        let mut stream = capture.acquire(&RecordingConfig::default(), n).await.unwrap();
        assert_eq!(stream.flush().unwrap(), None);
        drop(stream);
        assert_eq!(capture.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_injected_fault_reaches_notifier() {
        let capture = SimulatedCapture::new();
        assert!(!capture.inject_fault("early"));

        let (n, mut rx) = notifier();
        let _stream = capture.acquire(&RecordingConfig::default(), n).await.unwrap();
        assert!(capture.inject_fault("unplugged"));

        let fault = rx.recv().await.unwrap();
        assert_eq!(fault.generation, 7);
        assert_eq!(fault.reason, "unplugged");
    }
}
