//! Long-running task classification

use serde::{Deserialize, Serialize};

/// Category of work admitted through the concurrency limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Synthesis,
    Cloning,
    Analysis,
    Download,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Synthesis => write!(f, "synthesis"),
            TaskKind::Cloning => write!(f, "cloning"),
            TaskKind::Analysis => write!(f, "analysis"),
            TaskKind::Download => write!(f, "download"),
        }
    }
}

/// Admission priority
///
/// Ordering follows urgency: `Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
        }
    }
}

/// How a task left the running set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Completed => write!(f, "completed"),
            TaskOutcome::Failed => write!(f, "failed"),
            TaskOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}
