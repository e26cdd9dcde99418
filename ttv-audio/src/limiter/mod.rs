//! Concurrency Limiter
//!
//! Bounds how many long-running tasks (synthesis, cloning, analysis,
//! download) run at once. Waiters queue FIFO per priority tier and freed
//! slots go to `High`, then `Normal`, then `Low`. A `High` arrival that has
//! to wait may cancel one running task of a preemptible kind and lower
//! priority to make room.
//!
//! A slot is owned by a guard that lives inside the caller's future, so the
//! slot comes back however the task leaves: result, error, panic, or the
//! caller dropping the future.

pub mod progress;

pub use progress::{progress_stream, ProgressReporter, ProgressUpdate};

use crate::error::TaskError;
use futures::stream::{BoxStream, StreamExt};
use std::cmp::Reverse;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ttv_common::config::LimiterConfig;
use ttv_common::events::{EventBus, TaskKind, TaskOutcome, TaskPriority, TtvEvent};

/// Everything a task body gets from the limiter
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: u64,
    kind: TaskKind,
    priority: TaskPriority,
    cancel: CancellationToken,
    progress: ProgressReporter,
}

impl TaskContext {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the task has been asked to stop
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// `Err(Cancelled)` if the task has been asked to stop
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled_error());
        }
        Ok(())
    }

    pub fn cancelled_error(&self) -> TaskError {
        TaskError::Cancelled { task_id: self.id }
    }

    pub fn failed(&self, reason: impl Into<String>) -> TaskError {
        TaskError::Failed {
            task_id: self.id,
            reason: reason.into(),
        }
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }
}

/// Snapshot of one running task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: u64,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    /// Cancellation has been signalled (preempted or cancel_all)
    pub cancel_requested: bool,
}

struct RunningTask {
    id: u64,
    kind: TaskKind,
    priority: TaskPriority,
    /// Admission order, for picking the most recently admitted victim
    admitted_seq: u64,
    cancel: CancellationToken,
}

struct Waiter {
    id: u64,
    kind: TaskKind,
    priority: TaskPriority,
    cancel: CancellationToken,
    admit: oneshot::Sender<()>,
}

#[derive(Default)]
struct LimiterState {
    running: Vec<RunningTask>,
    /// Indexed by `tier()`, highest priority first
    waiting: [VecDeque<Waiter>; 3],
    admit_seq: u64,
}

fn tier(priority: TaskPriority) -> usize {
    match priority {
        TaskPriority::High => 0,
        TaskPriority::Normal => 1,
        TaskPriority::Low => 2,
    }
}

impl LimiterState {
    fn queued(&self) -> usize {
        self.waiting.iter().map(VecDeque::len).sum()
    }

    fn push_running(&mut self, id: u64, kind: TaskKind, priority: TaskPriority, cancel: CancellationToken) {
        self.admit_seq += 1;
        self.running.push(RunningTask {
            id,
            kind,
            priority,
            admitted_seq: self.admit_seq,
            cancel,
        });
    }

    fn remove_running(&mut self, id: u64) -> bool {
        match self.running.iter().position(|task| task.id == id) {
            Some(index) => {
                self.running.swap_remove(index);
                true
            }
            None => false,
        }
    }

    fn remove_waiter(&mut self, id: u64) -> bool {
        for queue in &mut self.waiting {
            if let Some(index) = queue.iter().position(|w| w.id == id) {
                queue.remove(index);
                return true;
            }
        }
        false
    }
}

struct LimiterShared {
    state: Mutex<LimiterState>,
    config: LimiterConfig,
    events: EventBus,
    next_id: AtomicU64,
}

impl LimiterShared {
    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_admitted(&self, id: u64, kind: TaskKind, priority: TaskPriority) {
        self.events.emit_lossy(TtvEvent::TaskAdmitted {
            task_id: id,
            kind,
            priority,
            timestamp: ttv_common::time::now(),
        });
    }

    /// Hand free slots to waiters, highest tier first
    fn fill_slots(&self, state: &mut LimiterState) {
        while state.running.len() < self.config.max_concurrent {
            let Some(waiter) = state.waiting.iter_mut().find_map(|queue| queue.pop_front()) else {
                break;
            };
            state.push_running(waiter.id, waiter.kind, waiter.priority, waiter.cancel);
            if waiter.admit.send(()).is_err() {
                // Caller went away between queueing and handoff
                state.remove_running(waiter.id);
                continue;
            }
            debug!(task_id = waiter.id, kind = %waiter.kind, priority = %waiter.priority, "Slot handed to waiter");
            self.emit_admitted(waiter.id, waiter.kind, waiter.priority);
        }
    }

    /// Cancel one running task to make room for `preemptor`
    fn preempt_for(&self, state: &LimiterState, preemptor: u64) {
        let victim = state
            .running
            .iter()
            .filter(|task| {
                task.priority < TaskPriority::High
                    && !task.cancel.is_cancelled()
                    && self.config.preemptible_kinds.contains(&task.kind)
            })
            .min_by_key(|task| (task.priority, Reverse(task.admitted_seq)));

        if let Some(victim) = victim {
            victim.cancel.cancel();
            info!(
                task_id = victim.id,
                kind = %victim.kind,
                preempted_by = preemptor,
                "Preempting task for high-priority work"
            );
            self.events.emit_lossy(TtvEvent::TaskPreempted {
                task_id: victim.id,
                kind: victim.kind,
                preempted_by: preemptor,
                timestamp: ttv_common::time::now(),
            });
        }
    }
}

/// Returns a running slot when dropped
struct SlotGuard {
    shared: Arc<LimiterShared>,
    id: u64,
    kind: TaskKind,
    progress: ProgressReporter,
    outcome: Option<TaskOutcome>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let outcome = match self.outcome {
            Some(outcome) => outcome,
            None if std::thread::panicking() => TaskOutcome::Failed,
            None => TaskOutcome::Cancelled,
        };
        self.progress.close();

        let mut state = self.shared.lock();
        state.remove_running(self.id);
        self.shared.events.emit_lossy(TtvEvent::TaskFinished {
            task_id: self.id,
            kind: self.kind,
            outcome,
            timestamp: ttv_common::time::now(),
        });
        self.shared.fill_slots(&mut state);
        debug!(task_id = self.id, %outcome, running = state.running.len(), "Slot released");
    }
}

/// Removes a queued task that is dropped before it runs
///
/// If the slot was already handed over, it is given back instead.
struct WaitGuard {
    shared: Arc<LimiterShared>,
    id: u64,
    armed: bool,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.lock();
        if !state.remove_waiter(self.id) && state.remove_running(self.id) {
            self.shared.fill_slots(&mut state);
        }
        debug!(task_id = self.id, "Queued task abandoned");
    }
}

/// Handle to a task started with [`ConcurrencyLimiter::spawn`]
pub struct TaskTicket<T> {
    pub id: u64,
    pub progress: BoxStream<'static, ProgressUpdate>,
    pub handle: JoinHandle<Result<T, TaskError>>,
}

/// Admission control for long-running tasks
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    shared: Arc<LimiterShared>,
}

impl ConcurrencyLimiter {
    pub fn new(config: LimiterConfig, events: EventBus) -> Self {
        Self {
            shared: Arc::new(LimiterShared {
                state: Mutex::new(LimiterState::default()),
                config,
                events,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.shared.config
    }

    /// Run `body` once a slot is available
    ///
    /// Cancellation is cooperative: the body decides when to look at its
    /// context. A body that returns `Ok` after being cancelled is reported
    /// as completed.
    pub async fn run<T, F, Fut>(&self, kind: TaskKind, priority: TaskPriority, body: F) -> Result<T, TaskError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let id = self.next_id();
        self.run_with_id(id, kind, priority, body).await
    }

    /// Run `body` on its own tokio task, observable through the ticket
    pub fn spawn<T, F, Fut>(&self, kind: TaskKind, priority: TaskPriority, body: F) -> TaskTicket<T>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let id = self.next_id();
        // Subscribe before the task can emit anything
        let progress = progress_stream(self.shared.events.subscribe(), id).boxed();
        let limiter = self.clone();
        let handle = tokio::spawn(async move { limiter.run_with_id(id, kind, priority, body).await });
        TaskTicket { id, progress, handle }
    }

    /// Signal every running task to stop
    ///
    /// Queued tasks are left alone and start normally once slots free up.
    pub fn cancel_all(&self) -> usize {
        let state = self.shared.lock();
        for task in &state.running {
            task.cancel.cancel();
        }
        if !state.running.is_empty() {
            info!(count = state.running.len(), "Cancelling all running tasks");
        }
        state.running.len()
    }

    pub fn running_count(&self) -> usize {
        self.shared.lock().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.shared.lock().queued()
    }

    pub fn running_tasks(&self) -> Vec<TaskInfo> {
        let state = self.shared.lock();
        let mut tasks: Vec<(u64, TaskInfo)> = state
            .running
            .iter()
            .map(|task| {
                (
                    task.admitted_seq,
                    TaskInfo {
                        id: task.id,
                        kind: task.kind,
                        priority: task.priority,
                        cancel_requested: task.cancel.is_cancelled(),
                    },
                )
            })
            .collect();
        tasks.sort_by_key(|(seq, _)| *seq);
        tasks.into_iter().map(|(_, info)| info).collect()
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn run_with_id<T, F, Fut>(
        &self,
        id: u64,
        kind: TaskKind,
        priority: TaskPriority,
        body: F,
    ) -> Result<T, TaskError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let cancel = CancellationToken::new();
        let progress = ProgressReporter::new(id, kind, self.shared.events.clone());

        let queued = {
            let mut state = self.shared.lock();
            let has_room = state.running.len() < self.shared.config.max_concurrent;
            if has_room && state.queued() == 0 {
                state.push_running(id, kind, priority, cancel.clone());
                self.shared.emit_admitted(id, kind, priority);
                debug!(task_id = id, %kind, %priority, "Task admitted");
                None
            } else {
                if priority == TaskPriority::High {
                    self.shared.preempt_for(&state, id);
                }
                let (admit, admitted) = oneshot::channel();
                state.waiting[tier(priority)].push_back(Waiter {
                    id,
                    kind,
                    priority,
                    cancel: cancel.clone(),
                    admit,
                });
                debug!(task_id = id, %kind, %priority, queued = state.queued(), "Task queued");
                Some(admitted)
            }
        };

        if let Some(admitted) = queued {
            let mut wait_guard = WaitGuard {
                shared: Arc::clone(&self.shared),
                id,
                armed: true,
            };
            if admitted.await.is_err() {
                warn!(task_id = id, "Limiter dropped a queued task");
                return Err(TaskError::Cancelled { task_id: id });
            }
            wait_guard.armed = false;
        }

        let mut slot = SlotGuard {
            shared: Arc::clone(&self.shared),
            id,
            kind,
            progress: progress.clone(),
            outcome: None,
        };

        let ctx = TaskContext {
            id,
            kind,
            priority,
            cancel,
            progress,
        };
        let result = body(ctx).await;

        slot.outcome = Some(match &result {
            Ok(_) => TaskOutcome::Completed,
            Err(TaskError::Cancelled { .. }) => TaskOutcome::Cancelled,
            Err(TaskError::Failed { .. }) => TaskOutcome::Failed,
        });
        result
    }
}
