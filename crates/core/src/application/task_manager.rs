// Task Manager - in-memory task store and task runner
//
// Owns every task record for its lifetime. All mutations flow through
// update_task under one manager-wide lock: mutate, mirror to durable
// storage, then notify subscribers - as one logical unit per call.

use crate::application::broadcast::BroadcastHub;
use crate::domain::{Task, TaskId, TaskState};
use crate::error::Result;
use crate::port::{IdProvider, TaskRepository, TimeProvider};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Result shape a unit of task work may return
///
/// `Report` carries a message used verbatim for either outcome; `Flag`
/// falls back to a default message per outcome.
#[derive(Debug, Clone)]
pub enum WorkOutcome {
    Flag(bool),
    Report { ok: bool, message: String },
}

impl WorkOutcome {
    pub fn ok(&self) -> bool {
        match self {
            WorkOutcome::Flag(ok) => *ok,
            WorkOutcome::Report { ok, .. } => *ok,
        }
    }

    fn into_message(self) -> Option<String> {
        match self {
            WorkOutcome::Flag(_) => None,
            WorkOutcome::Report { message, .. } => Some(message),
        }
    }
}

impl From<bool> for WorkOutcome {
    fn from(ok: bool) -> Self {
        WorkOutcome::Flag(ok)
    }
}

impl From<(bool, String)> for WorkOutcome {
    fn from((ok, message): (bool, String)) -> Self {
        WorkOutcome::Report { ok, message }
    }
}

impl From<(bool, &str)> for WorkOutcome {
    fn from((ok, message): (bool, &str)) -> Self {
        WorkOutcome::Report {
            ok,
            message: message.to_string(),
        }
    }
}

/// One mutation of a task record; unset fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskState>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub log_line: Option<String>,
    pub error: Option<String>,
}

impl TaskUpdate {
    /// Append one output line
    pub fn log(line: impl Into<String>) -> Self {
        Self {
            log_line: Some(line.into()),
            ..Default::default()
        }
    }
}

/// Task Store + Task Runner
pub struct TaskManager {
    tasks: Mutex<HashMap<TaskId, Task>>,
    hub: Arc<BroadcastHub>,
    mirror: Option<Arc<dyn TaskRepository>>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl TaskManager {
    pub fn new(
        hub: Arc<BroadcastHub>,
        mirror: Option<Arc<dyn TaskRepository>>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            hub,
            mirror,
            id_provider,
            time_provider,
        }
    }

    /// Create a new pending task and return its ID
    pub async fn create_task(&self, message: impl Into<String>) -> TaskId {
        let task_id = self.id_provider.generate_id();
        let now = self.time_provider.now_millis();
        let task = Task::new(task_id.clone(), now, message);

        let mut tasks = self.tasks.lock().await;
        self.mirror_task(&task).await;
        self.hub.publish(&task_id, &task.event()).await;
        info!(task_id = %task_id, message = %task.message, "Created task");
        tasks.insert(task_id.clone(), task);

        task_id
    }

    /// Snapshot of one task
    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    /// Snapshots of all tasks, optionally filtered by status, oldest first
    pub async fn list_tasks(&self, status: Option<TaskState>) -> Vec<Task> {
        let tasks = self.tasks.lock().await;
        let mut all: Vec<Task> = tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Apply one mutation: update the record, mirror it durably, notify
    /// every subscriber with the updated snapshot - in that order, under
    /// the manager-wide lock.
    ///
    /// An unknown task ID is logged and ignored (late log lines after
    /// cleanup are expected). An invalid status transition is an error.
    pub async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks.get_mut(task_id) else {
            warn!(task_id = %task_id, "Update for unknown task ignored");
            return Ok(());
        };

        let now = self.time_provider.now_millis();

        if let Some(status) = update.status {
            match status {
                TaskState::Running => task.start(now)?,
                TaskState::Completed => task.complete(now)?,
                TaskState::Failed => task.fail(now)?,
                TaskState::Pending => {
                    return Err(crate::domain::DomainError::InvalidStateTransition {
                        from: task.status.to_string(),
                        to: status.to_string(),
                    }
                    .into())
                }
            }
        }
        if let Some(progress) = update.progress {
            task.set_progress(progress);
        }
        if let Some(message) = update.message {
            task.message = message;
        }
        if let Some(line) = update.log_line {
            task.append_log(line);
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }
        task.updated_at = now;

        let task = task.clone();
        self.mirror_task(&task).await;
        self.hub.publish(task_id, &task.event()).await;

        Ok(())
    }

    /// Upsert a non-terminal task into the durable mirror, or delete its
    /// row once terminal. Mirror failures are logged; the in-memory record
    /// stays authoritative.
    async fn mirror_task(&self, task: &Task) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let result = if task.status.is_terminal() {
            mirror.delete(&task.id).await
        } else {
            mirror.upsert(task).await
        };
        if let Err(e) = result {
            warn!(task_id = %task.id, error = %e, "Task mirror write failed");
        }
    }

    /// Drive one task through its lifecycle: mark running, execute the
    /// work, and mark completed or failed - exactly once.
    ///
    /// The work runs on its own tokio task so a panic is caught at the
    /// join handle and converted into a failed terminal state; no fault
    /// ever propagates out of here.
    pub async fn run_task<F>(&self, task_id: &str, work: F)
    where
        F: Future<Output = Result<WorkOutcome>> + Send + 'static,
    {
        if let Err(e) = self
            .update_task(
                task_id,
                TaskUpdate {
                    status: Some(TaskState::Running),
                    progress: Some(10),
                    ..Default::default()
                },
            )
            .await
        {
            error!(task_id = %task_id, error = %e, "Could not mark task running");
            return;
        }

        let handle = tokio::spawn(work);

        let (ok, message) = match handle.await {
            Ok(Ok(outcome)) => (outcome.ok(), outcome.into_message()),
            Ok(Err(e)) => {
                error!(task_id = %task_id, error = %e, "Task work failed");
                (false, Some(e.to_string()))
            }
            Err(join_err) => {
                if join_err.is_panic() {
                    error!(task_id = %task_id, "Task work panicked: {:?}", join_err);
                } else {
                    error!(task_id = %task_id, "Task work cancelled: {:?}", join_err);
                }
                (false, Some(format!("task aborted: {}", join_err)))
            }
        };

        let update = if ok {
            TaskUpdate {
                status: Some(TaskState::Completed),
                progress: Some(100),
                message: Some(
                    message.unwrap_or_else(|| "Operation completed successfully".to_string()),
                ),
                ..Default::default()
            }
        } else {
            TaskUpdate {
                status: Some(TaskState::Failed),
                progress: Some(100),
                error: Some(message.unwrap_or_else(|| "Operation failed".to_string())),
                ..Default::default()
            }
        };

        if let Err(e) = self.update_task(task_id, update).await {
            error!(task_id = %task_id, error = %e, "Could not finalize task");
        }
    }

    /// Repopulate the in-memory store from the durable mirror.
    ///
    /// Restored records are verbatim; call `fail_orphaned` afterwards to
    /// deal with work that died with the previous process.
    pub async fn restore(&self) -> Result<usize> {
        let Some(mirror) = &self.mirror else {
            return Ok(0);
        };
        let restored = mirror.load_all().await?;
        let count = restored.len();

        let mut tasks = self.tasks.lock().await;
        for task in restored {
            tasks.insert(task.id.clone(), task);
        }
        if count > 0 {
            info!(count, "Restored tasks from durable store");
        }
        Ok(count)
    }

    /// Fail every task still marked running: its work did not survive the
    /// restart. Returns the number of tasks failed.
    pub async fn fail_orphaned(&self) -> Result<usize> {
        let running: Vec<TaskId> = {
            let tasks = self.tasks.lock().await;
            tasks
                .values()
                .filter(|t| t.status == TaskState::Running)
                .map(|t| t.id.clone())
                .collect()
        };

        for task_id in &running {
            self.update_task(
                task_id,
                TaskUpdate {
                    status: Some(TaskState::Failed),
                    progress: Some(100),
                    error: Some("interrupted by control-plane restart".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        }

        if !running.is_empty() {
            warn!(count = running.len(), "Failed orphaned running tasks");
        }
        Ok(running.len())
    }

    /// Drop terminal tasks older than the retention window, together with
    /// any leftover subscriptions. Returns the number removed.
    pub async fn cleanup_old_tasks(&self, retention: Duration) -> usize {
        let now = self.time_provider.now_millis();
        let cutoff = now - retention.as_millis() as i64;

        let removed: Vec<TaskId> = {
            let mut tasks = self.tasks.lock().await;
            let expired: Vec<TaskId> = tasks
                .values()
                .filter(|t| {
                    t.status.is_terminal() && t.completed_at.unwrap_or(t.created_at) < cutoff
                })
                .map(|t| t.id.clone())
                .collect();
            for id in &expired {
                tasks.remove(id);
            }
            expired
        };

        for id in &removed {
            self.hub.remove_task(id).await;
            info!(task_id = %id, "Cleaned up old task");
        }
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::broadcast::mocks::RecordingListener;
    use crate::error::AppError;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::task_repository::mocks::InMemoryTaskRepository;
    use crate::port::time_provider::mocks::FixedTimeProvider;

    struct Fixture {
        manager: Arc<TaskManager>,
        hub: Arc<BroadcastHub>,
        mirror: Arc<InMemoryTaskRepository>,
        clock: Arc<FixedTimeProvider>,
    }

    fn fixture() -> Fixture {
        let hub = Arc::new(BroadcastHub::new());
        let mirror = Arc::new(InMemoryTaskRepository::new());
        let clock = Arc::new(FixedTimeProvider::new(1_000_000));
        let manager = Arc::new(TaskManager::new(
            hub.clone(),
            Some(mirror.clone() as Arc<dyn TaskRepository>),
            Arc::new(SequentialIdProvider::new()),
            clock.clone(),
        ));
        Fixture {
            manager,
            hub,
            mirror,
            clock,
        }
    }

    #[tokio::test]
    async fn test_create_task_starts_pending() {
        let f = fixture();
        let id = f.manager.create_task("Starting cluster demo").await;

        let task = f.manager.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskState::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.message, "Starting cluster demo");
        assert!(f.mirror.contains(&id));
    }

    #[tokio::test]
    async fn test_run_task_failure_report_used_verbatim() {
        // Scenario: work unit reports (false, "disk full")
        let f = fixture();
        let id = f.manager.create_task("Starting cluster demo").await;

        f.manager
            .run_task(&id, async { Ok(WorkOutcome::from((false, "disk full"))) })
            .await;

        let task = f.manager.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskState::Failed);
        assert_eq!(task.error.as_deref(), Some("disk full"));
        assert_eq!(task.progress, 100);
    }

    #[tokio::test]
    async fn test_run_task_success_flag_uses_default_message() {
        let f = fixture();
        let id = f.manager.create_task("work").await;

        f.manager
            .run_task(&id, async { Ok(WorkOutcome::from(true)) })
            .await;

        let task = f.manager.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskState::Completed);
        assert_eq!(task.message, "Operation completed successfully");
        assert_eq!(task.progress, 100);
    }

    #[tokio::test]
    async fn test_run_task_fault_becomes_failed_state() {
        let f = fixture();
        let id = f.manager.create_task("work").await;

        f.manager
            .run_task(&id, async {
                Err(AppError::Internal("scripts directory missing".to_string()))
            })
            .await;

        let task = f.manager.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskState::Failed);
        assert!(task.error.as_deref().unwrap().contains("scripts directory missing"));
    }

    #[tokio::test]
    async fn test_run_task_panic_is_contained() {
        let f = fixture();
        let id = f.manager.create_task("work").await;

        f.manager
            .run_task(&id, async { panic!("boom") })
            .await;

        let task = f.manager.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskState::Failed);
        assert!(task.error.is_some());
    }

    #[tokio::test]
    async fn test_status_sequence_is_pending_running_terminal() {
        let f = fixture();
        let id = f.manager.create_task("work").await;

        let listener = Arc::new(RecordingListener::new(f.hub.next_listener_id()));
        f.hub.subscribe(listener.clone(), &id).await;

        f.manager
            .run_task(&id, async { Ok(WorkOutcome::from(true)) })
            .await;

        let statuses: Vec<TaskState> = listener.events().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![TaskState::Running, TaskState::Completed]);
    }

    #[tokio::test]
    async fn test_terminal_task_removed_from_mirror() {
        let f = fixture();
        let id = f.manager.create_task("work").await;
        assert!(f.mirror.contains(&id));

        f.manager
            .run_task(&id, async { Ok(WorkOutcome::from(true)) })
            .await;

        assert!(!f.mirror.contains(&id));
        // still queryable from memory until cleanup
        assert!(f.manager.get_task(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_restore_round_trip_preserves_task() {
        let f = fixture();
        let id = f.manager.create_task("long build").await;
        f.manager
            .update_task(
                &id,
                TaskUpdate {
                    status: Some(TaskState::Running),
                    progress: Some(40),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        f.manager
            .update_task(&id, TaskUpdate::log("fetching images"))
            .await
            .unwrap();

        let before = f.manager.get_task(&id).await.unwrap();

        // Simulate a restart: fresh manager over the same mirror
        let restarted = TaskManager::new(
            Arc::new(BroadcastHub::new()),
            Some(f.mirror.clone() as Arc<dyn TaskRepository>),
            Arc::new(SequentialIdProvider::new()),
            f.clock.clone(),
        );
        assert_eq!(restarted.restore().await.unwrap(), 1);

        let after = restarted.get_task(&id).await.unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.progress, before.progress);
        assert_eq!(after.message, before.message);
        assert_eq!(after.logs, before.logs);
    }

    #[tokio::test]
    async fn test_fail_orphaned_fails_restored_running_tasks() {
        let f = fixture();
        let id = f.manager.create_task("interrupted work").await;
        f.manager
            .update_task(
                &id,
                TaskUpdate {
                    status: Some(TaskState::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let restarted = TaskManager::new(
            Arc::new(BroadcastHub::new()),
            Some(f.mirror.clone() as Arc<dyn TaskRepository>),
            Arc::new(SequentialIdProvider::new()),
            f.clock.clone(),
        );
        restarted.restore().await.unwrap();
        assert_eq!(restarted.fail_orphaned().await.unwrap(), 1);

        let task = restarted.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskState::Failed);
        assert!(task.error.as_deref().unwrap().contains("restart"));
        assert!(!f.mirror.contains(&id));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_terminal_tasks() {
        let f = fixture();
        let done = f.manager.create_task("old and done").await;
        f.manager
            .run_task(&done, async { Ok(WorkOutcome::from(true)) })
            .await;
        let pending = f.manager.create_task("still waiting").await;

        f.clock.advance(2 * 3600 * 1000);
        let removed = f
            .manager
            .cleanup_old_tasks(Duration::from_secs(3600))
            .await;

        assert_eq!(removed, 1);
        assert!(f.manager.get_task(&done).await.is_none());
        assert!(f.manager.get_task(&pending).await.is_some());
    }

    #[tokio::test]
    async fn test_list_tasks_filters_by_status() {
        let f = fixture();
        let a = f.manager.create_task("a").await;
        let _b = f.manager.create_task("b").await;
        f.manager
            .run_task(&a, async { Ok(WorkOutcome::from(true)) })
            .await;

        assert_eq!(f.manager.list_tasks(None).await.len(), 2);
        assert_eq!(
            f.manager.list_tasks(Some(TaskState::Pending)).await.len(),
            1
        );
        assert_eq!(
            f.manager
                .list_tasks(Some(TaskState::Completed))
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_update_unknown_task_is_ignored() {
        let f = fixture();
        assert!(f
            .manager
            .update_task("no-such-task", TaskUpdate::log("late line"))
            .await
            .is_ok());
    }
}
