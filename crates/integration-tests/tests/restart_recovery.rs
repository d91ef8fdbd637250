//! Durable task mirror round-trips across a simulated process restart

use corral_core::application::{BroadcastHub, TaskManager, TaskUpdate, WorkOutcome};
use corral_core::domain::TaskState;
use corral_core::port::id_provider::UuidProvider;
use corral_core::port::time_provider::SystemTimeProvider;
use corral_core::port::TaskRepository;
use corral_infra_sqlite::{create_pool, run_migrations, SqliteTaskRepository};
use sqlx::SqlitePool;
use std::sync::Arc;

async fn pool() -> SqlitePool {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

fn manager(pool: &SqlitePool) -> TaskManager {
    TaskManager::new(
        Arc::new(BroadcastHub::new()),
        Some(Arc::new(SqliteTaskRepository::new(pool.clone())) as Arc<dyn TaskRepository>),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    )
}

async fn mirrored_ids(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT id FROM tasks ORDER BY created_at")
        .fetch_all(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_non_terminal_task_round_trips_identically() {
    let pool = pool().await;
    let before_restart = manager(&pool);

    let task_id = before_restart.create_task("Creating cluster demo").await;
    before_restart
        .update_task(
            &task_id,
            TaskUpdate {
                status: Some(TaskState::Running),
                progress: Some(35),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    for line in ["allocating subnet", "pulling node image", "waiting for api server"] {
        before_restart
            .update_task(&task_id, TaskUpdate::log(line))
            .await
            .unwrap();
    }
    let before = before_restart.get_task(&task_id).await.unwrap();

    // "Restart": a fresh manager over the same database
    let after_restart = manager(&pool);
    assert_eq!(after_restart.restore().await.unwrap(), 1);

    let after = after_restart.get_task(&task_id).await.unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.progress, before.progress);
    assert_eq!(after.message, before.message);
    assert_eq!(after.logs, before.logs);
}

#[tokio::test]
async fn test_terminal_task_is_absent_from_durable_store() {
    let pool = pool().await;
    let tasks = manager(&pool);

    let task_id = tasks.create_task("short job").await;
    assert_eq!(mirrored_ids(&pool).await, vec![task_id.clone()]);

    tasks
        .run_task(&task_id, async { Ok(WorkOutcome::from(true)) })
        .await;

    // completing update deleted the row; memory still serves the snapshot
    assert!(mirrored_ids(&pool).await.is_empty());
    assert_eq!(
        tasks.get_task(&task_id).await.unwrap().status,
        TaskState::Completed
    );

    // nothing to restore after a restart
    let after_restart = manager(&pool);
    assert_eq!(after_restart.restore().await.unwrap(), 0);
    assert!(after_restart.get_task(&task_id).await.is_none());
}

#[tokio::test]
async fn test_orphaned_running_work_is_failed_after_restore() {
    let pool = pool().await;
    let before_restart = manager(&pool);

    let task_id = before_restart.create_task("interrupted work").await;
    before_restart
        .update_task(
            &task_id,
            TaskUpdate {
                status: Some(TaskState::Running),
                progress: Some(50),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let after_restart = manager(&pool);
    after_restart.restore().await.unwrap();

    // restore itself is verbatim...
    assert_eq!(
        after_restart.get_task(&task_id).await.unwrap().status,
        TaskState::Running
    );

    // ...the recovery pass fails the orphan and clears its mirror row
    assert_eq!(after_restart.fail_orphaned().await.unwrap(), 1);
    let task = after_restart.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskState::Failed);
    assert!(task.error.is_some());
    assert!(mirrored_ids(&pool).await.is_empty());
}

#[tokio::test]
async fn test_pending_tasks_survive_restart_untouched_by_recovery() {
    let pool = pool().await;
    let before_restart = manager(&pool);
    let task_id = before_restart.create_task("queued work").await;

    let after_restart = manager(&pool);
    after_restart.restore().await.unwrap();
    assert_eq!(after_restart.fail_orphaned().await.unwrap(), 0);

    let task = after_restart.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskState::Pending);
}
