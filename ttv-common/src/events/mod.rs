//! Event types for the TTV event system
//!
//! Provides shared event definitions and the EventBus used by the audio core
//! to tell observers (the UI layer, loggers, tests) what happened.

mod playback_types;
mod task_types;

pub use playback_types::{EvictionReason, PlaybackState, RecordingState};
pub use task_types::{TaskKind, TaskOutcome, TaskPriority};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// TTV event types
///
/// Events are broadcast via EventBus and serialize to tagged JSON so they can
/// be forwarded to a UI unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TtvEvent {
    /// A playback session moved between states
    ///
    /// Stop and preemption report `new_state: Idle`; natural completion reports
    /// `Ended`, failures `Failed`.
    PlaybackStateChanged {
        session_id: String,
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// The registry dropped a resource on its own (sweep, budget, replacement)
    ///
    /// Explicit `release` calls are not reported.
    ResourceEvicted {
        resource_id: String,
        size_bytes: u64,
        reason: EvictionReason,
        timestamp: DateTime<Utc>,
    },

    /// The recording session moved between states
    RecordingStateChanged {
        old_state: RecordingState,
        new_state: RecordingState,
        timestamp: DateTime<Utc>,
    },

    /// Recording hit its duration ceiling and stopped itself
    RecordingAutoStopped {
        duration_ms: u64,
        captured_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// A task entered the running set
    TaskAdmitted {
        task_id: u64,
        kind: TaskKind,
        priority: TaskPriority,
        timestamp: DateTime<Utc>,
    },

    /// A running task was signalled to make room for a high-priority task
    TaskPreempted {
        task_id: u64,
        kind: TaskKind,
        preempted_by: u64,
        timestamp: DateTime<Utc>,
    },

    /// Progress tick reported by a task body
    TaskProgress {
        task_id: u64,
        kind: TaskKind,
        percent: u8,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A task left the running set
    TaskFinished {
        task_id: u64,
        kind: TaskKind,
        outcome: TaskOutcome,
        timestamp: DateTime<Utc>,
    },
}

impl TtvEvent {
    /// Event type name, matching the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            TtvEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            TtvEvent::ResourceEvicted { .. } => "ResourceEvicted",
            TtvEvent::RecordingStateChanged { .. } => "RecordingStateChanged",
            TtvEvent::RecordingAutoStopped { .. } => "RecordingAutoStopped",
            TtvEvent::TaskAdmitted { .. } => "TaskAdmitted",
            TtvEvent::TaskPreempted { .. } => "TaskPreempted",
            TtvEvent::TaskProgress { .. } => "TaskProgress",
            TtvEvent::TaskFinished { .. } => "TaskFinished",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use ttv_common::events::{EventBus, TtvEvent, PlaybackState};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(TtvEvent::PlaybackStateChanged {
///     session_id: "preview-aria".to_string(),
///     old_state: PlaybackState::Loading,
///     new_state: PlaybackState::Playing,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TtvEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<TtvEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: TtvEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
