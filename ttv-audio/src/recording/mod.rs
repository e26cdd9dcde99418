//! Microphone recording

pub mod capture;
pub mod session;

pub use capture::{CaptureBackend, CaptureStream, DeviceRefusal, FaultNotifier, SimulatedCapture};
pub use session::{AutoStopped, RecordingCallbacks, RecordingSession};
