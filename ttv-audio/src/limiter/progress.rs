//! Task progress reporting
//!
//! Progress is a side channel: task bodies report through their
//! `ProgressReporter`, ticks travel over the event bus, and observers follow a
//! single task with `progress_stream`. Admission never looks at progress.

use futures::stream::{self, Stream};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use ttv_common::events::{EventBus, TaskKind, TtvEvent};

#[derive(Debug, Default)]
struct ReporterState {
    last: Option<u8>,
    closed: bool,
}

/// Finite progress for one task: 0 to 100, never decreasing, closed for good
/// once the task leaves the limiter
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    task_id: u64,
    kind: TaskKind,
    events: EventBus,
    state: Arc<Mutex<ReporterState>>,
}

impl ProgressReporter {
    pub(crate) fn new(task_id: u64, kind: TaskKind, events: EventBus) -> Self {
        Self {
            task_id,
            kind,
            events,
            state: Arc::new(Mutex::new(ReporterState::default())),
        }
    }

    /// Report a percentage (values above 100 are capped)
    ///
    /// Returns false if the tick was dropped: the reporter is closed or the
    /// value would move progress backwards.
    pub fn report(&self, percent: u8, message: Option<&str>) -> bool {
        let percent = percent.min(100);
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed || state.last.is_some_and(|last| percent < last) {
                return false;
            }
            state.last = Some(percent);
        }

        self.events.emit_lossy(TtvEvent::TaskProgress {
            task_id: self.task_id,
            kind: self.kind,
            percent,
            message: message.map(str::to_string),
            timestamp: ttv_common::time::now(),
        });
        true
    }

    /// Report `done` out of `total` units of work
    pub fn report_fraction(&self, done: u64, total: u64, message: Option<&str>) -> bool {
        if total == 0 {
            return false;
        }
        let percent = (done.min(total) * 100 / total) as u8;
        self.report(percent, message)
    }

    pub fn last(&self) -> Option<u8> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).last
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    pub(crate) fn close(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).closed = true;
    }
}

/// One progress tick as seen by an observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: Option<String>,
}

/// Follow one task's progress ticks until it finishes
///
/// Subscribe before the task starts, or early ticks are missed. Ticks lost to
/// a lagging receiver are skipped.
pub fn progress_stream(
    rx: broadcast::Receiver<TtvEvent>,
    task_id: u64,
) -> impl Stream<Item = ProgressUpdate> + Send + 'static {
    stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(TtvEvent::TaskProgress {
                    task_id: id,
                    percent,
                    message,
                    ..
                }) if id == task_id => {
                    return Some((ProgressUpdate { percent, message }, rx));
                }
                Ok(TtvEvent::TaskFinished { task_id: id, .. }) if id == task_id => return None,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let reporter = ProgressReporter::new(1, TaskKind::Synthesis, EventBus::new(16));
        assert!(reporter.report(10, None));
        assert!(!reporter.report(5, None));
        assert!(reporter.report(10, Some("still")));
        assert!(reporter.report(250, None));
        assert_eq!(reporter.last(), Some(100));
    }

    #[test]
    fn test_closed_reporter_drops_ticks() {
        let reporter = ProgressReporter::new(1, TaskKind::Synthesis, EventBus::new(16));
        reporter.close();
        assert!(!reporter.report(50, None));
        assert!(!reporter.report_fraction(1, 0, None));
        assert_eq!(reporter.last(), None);
    }

    #[tokio::test]
    async fn test_stream_follows_one_task() {
        let events = EventBus::new(16);
        let stream = progress_stream(events.subscribe(), 2);
        let ours = ProgressReporter::new(2, TaskKind::Cloning, events.clone());
        let other = ProgressReporter::new(3, TaskKind::Cloning, events.clone());

        other.report(40, None);
        ours.report_fraction(1, 4, Some("quarter"));
        ours.report(100, None);
        events.emit_lossy(TtvEvent::TaskFinished {
            task_id: 2,
            kind: TaskKind::Cloning,
            outcome: ttv_common::events::TaskOutcome::Completed,
            timestamp: ttv_common::time::now(),
        });

        let updates: Vec<ProgressUpdate> = stream.collect().await;
        assert_eq!(
            updates,
            vec![
                ProgressUpdate {
                    percent: 25,
                    message: Some("quarter".to_string())
                },
                ProgressUpdate {
                    percent: 100,
                    message: None
                },
            ]
        );
    }
}
