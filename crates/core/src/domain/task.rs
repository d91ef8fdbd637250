// Task Domain Model

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Task ID (UUID v4)
pub type TaskId = String;

/// Maximum retained log lines per task; oldest lines are discarded first
pub const MAX_TASK_LOG_LINES: usize = 500;

/// Task status (4-state machine)
///
/// pending -> running -> completed | failed
///
/// Exactly one transition into `running`, exactly one transition out of it,
/// no transitions out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Parse the wire/storage representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "running" => Some(TaskState::Running),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// Task update event payload delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub status: TaskState,
    pub progress: u8,
    pub message: String,
    pub logs: Vec<String>,
    pub error: Option<String>,
}

/// Task Entity
///
/// An in-memory, optionally-persisted record of one asynchronous operation's
/// progress and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskState,
    /// Progress percentage hint [0, 100]
    pub progress: u8,
    pub message: String,
    /// Ring-buffered output lines, clamped to MAX_TASK_LOG_LINES
    pub logs: VecDeque<String>,
    pub error: Option<String>,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Task {
    /// Create a new pending task
    ///
    /// # Arguments
    ///
    /// * `id` - Unique task ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `message` - Initial human-readable message
    pub fn new(id: impl Into<String>, created_at: i64, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskState::Pending,
            progress: 0,
            message: message.into(),
            logs: VecDeque::new(),
            error: None,
            created_at,
            updated_at: created_at,
            completed_at: None,
        }
    }

    /// Create a test task with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (task-1, task-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    ///
    /// **Note**: Tests only. Production code injects ID and time via providers.
    pub fn new_test(message: impl Into<String>) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(format!("task-{}", counter), (counter * 1000) as i64, message)
    }

    /// Transition to Running with explicit timestamp
    pub fn start(&mut self, now_millis: i64) -> crate::domain::error::Result<()> {
        if self.status != TaskState::Pending {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: TaskState::Running.to_string(),
            });
        }
        self.status = TaskState::Running;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Transition to Completed with explicit timestamp
    pub fn complete(&mut self, now_millis: i64) -> crate::domain::error::Result<()> {
        self.finish(TaskState::Completed, now_millis)
    }

    /// Transition to Failed with explicit timestamp
    pub fn fail(&mut self, now_millis: i64) -> crate::domain::error::Result<()> {
        self.finish(TaskState::Failed, now_millis)
    }

    fn finish(&mut self, terminal: TaskState, now_millis: i64) -> crate::domain::error::Result<()> {
        if self.status != TaskState::Running {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: terminal.to_string(),
            });
        }
        self.status = terminal;
        self.updated_at = now_millis;
        self.completed_at = Some(now_millis);
        Ok(())
    }

    /// Set the progress hint, clamped to [0, 100]
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
    }

    /// Append one output line, discarding the oldest beyond the ring capacity
    pub fn append_log(&mut self, line: impl Into<String>) {
        self.logs.push_back(line.into());
        while self.logs.len() > MAX_TASK_LOG_LINES {
            self.logs.pop_front();
        }
    }

    /// Snapshot of the broadcastable fields
    pub fn event(&self) -> TaskEvent {
        TaskEvent {
            task_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            logs: self.logs.iter().cloned().collect(),
            error: self.error.clone(),
        }
    }
}
