//! Error types for ttv-audio
//!
//! Each component has its own thiserror enum so callers can match on the
//! exact failure kind. Platform failures are classified into these enums at
//! the backend boundary and never surface raw.

use thiserror::Error;
use ttv_common::events::RecordingState;

/// Resource registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The payload is larger than the budget eviction target and could never
    /// be held without breaking it
    #[error("Cannot allocate resource {id}: {size_bytes} bytes exceeds budget of {budget_bytes} bytes")]
    AllocationFailed {
        id: String,
        size_bytes: u64,
        budget_bytes: u64,
    },

    /// No entry under this id (never registered, released, or evicted)
    #[error("Resource not found: {id}")]
    NotFound { id: String },

    /// A locator was resolved after its resource was released
    #[error("Locator used after release: {locator}")]
    Released { locator: String },
}

/// Playback errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// The source could not be opened (missing file, released resource, ...)
    #[error("Source unavailable for session {session_id} ({location}): {reason}")]
    SourceUnavailable {
        session_id: String,
        location: String,
        reason: String,
    },

    /// The bytes were opened but are not playable audio
    #[error("Decode failed for session {session_id}: {reason}")]
    DecodeFailed { session_id: String, reason: String },
}

impl PlaybackError {
    pub fn session_id(&self) -> &str {
        match self {
            PlaybackError::SourceUnavailable { session_id, .. } => session_id,
            PlaybackError::DecodeFailed { session_id, .. } => session_id,
        }
    }
}

/// Recording errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    /// The user or platform refused microphone access (not retryable)
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// No capture device present (not retryable)
    #[error("No microphone device found")]
    NoDevice,

    /// The platform cannot capture audio at all (not retryable)
    #[error("Audio capture is not supported on this platform")]
    Unsupported,

    /// The device failed while acquiring or capturing
    #[error("Capture device failure: {reason}")]
    DeviceFailure { reason: String },

    /// Operation not allowed in the current state
    #[error("Cannot {operation} while recording is {state}")]
    InvalidState {
        operation: &'static str,
        state: RecordingState,
    },
}

impl RecordingError {
    /// Whether retrying `start` can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecordingError::DeviceFailure { .. })
    }
}

/// Concurrency limiter task errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task observed its cancellation signal
    #[error("Task {task_id} cancelled")]
    Cancelled { task_id: u64 },

    /// The task body failed
    #[error("Task {task_id} failed: {reason}")]
    Failed { task_id: u64, reason: String },
}

/// Main error type for ttv-audio
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Task(#[from] TaskError),

    /// Configuration errors from ttv-common
    #[error("Configuration error: {0}")]
    Config(#[from] ttv_common::Error),
}

impl Error {
    /// Short human-readable message for the UI layer
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::Resource(ResourceError::AllocationFailed { .. }) => {
                "This audio is too large to keep in memory."
            }
            Error::Resource(ResourceError::NotFound { .. })
            | Error::Resource(ResourceError::Released { .. }) => {
                "This audio is no longer available. Please generate it again."
            }
            Error::Playback(PlaybackError::SourceUnavailable { .. }) => {
                "The audio could not be loaded."
            }
            Error::Playback(PlaybackError::DecodeFailed { .. }) => {
                "The audio file is not in a playable format."
            }
            Error::Recording(RecordingError::PermissionDenied) => {
                "Microphone access was denied. Allow access in your settings to record."
            }
            Error::Recording(RecordingError::NoDevice) => "No microphone was found.",
            Error::Recording(RecordingError::Unsupported) => {
                "Recording is not supported on this device."
            }
            Error::Recording(RecordingError::DeviceFailure { .. }) => {
                "The microphone stopped working. Please try again."
            }
            Error::Recording(RecordingError::InvalidState { .. }) => {
                "Recording is busy. Please wait and try again."
            }
            Error::Task(TaskError::Cancelled { .. }) => "The operation was cancelled.",
            Error::Task(TaskError::Failed { .. }) => "The operation failed. Please try again.",
            Error::Config(_) => "Something went wrong.",
        }
    }
}

/// Convenience Result type using ttv-audio Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_carry_context() {
        let err = PlaybackError::SourceUnavailable {
            session_id: "preview-1".to_string(),
            location: "resource:sampleA".to_string(),
            reason: "resource released".to_string(),
        };
        assert_eq!(err.session_id(), "preview-1");
        assert!(err.to_string().contains("resource:sampleA"));
    }

    #[test]
    fn test_user_messages_per_kind() {
        let denied: Error = RecordingError::PermissionDenied.into();
        assert!(denied.user_message().contains("denied"));

        let cancelled: Error = TaskError::Cancelled { task_id: 3 }.into();
        assert_eq!(cancelled.user_message(), "The operation was cancelled.");
    }

    #[test]
    fn test_retryable_recording_errors() {
        assert!(!RecordingError::PermissionDenied.is_retryable());
        assert!(!RecordingError::Unsupported.is_retryable());
        assert!(!RecordingError::NoDevice.is_retryable());
        assert!(RecordingError::DeviceFailure {
            reason: "buffer overrun".to_string()
        }
        .is_retryable());
    }
}
