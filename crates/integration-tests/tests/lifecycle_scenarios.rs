//! Cluster lifecycle scenarios over the real SQLite backend
//!
//! The script runner is mocked; everything else (registry, ledger, task
//! store, durable mirror, reconciler wiring) is the production stack.

use corral_core::application::{
    BroadcastHub, ClusterService, ClusterServiceConfig, DebouncedReconciler, ReconcilerConfig,
    TaskManager,
};
use corral_core::domain::{
    ClusterSpec, DesiredState, OperationKind, OperationStatus, Provider, Task, TaskState,
};
use corral_core::error::AppError;
use corral_core::port::id_provider::UuidProvider;
use corral_core::port::script_runner::mocks::{MockBehavior, MockScriptRunner};
use corral_core::port::time_provider::SystemTimeProvider;
use corral_core::port::{ClusterRepository, TaskRepository};
use corral_infra_sqlite::{create_pool, run_migrations, SqliteClusterRepository, SqliteTaskRepository};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

struct Stack {
    service: Arc<ClusterService>,
    registry: Arc<SqliteClusterRepository>,
    runner: Arc<MockScriptRunner>,
    tasks: Arc<TaskManager>,
}

async fn stack(behavior: MockBehavior) -> Stack {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();

    let time_provider = Arc::new(SystemTimeProvider);
    let registry = Arc::new(SqliteClusterRepository::new(
        pool.clone(),
        time_provider.clone(),
    ));
    let mirror: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool));
    let runner = Arc::new(MockScriptRunner::new(behavior));

    let hub = Arc::new(BroadcastHub::new());
    let tasks = Arc::new(TaskManager::new(
        hub,
        Some(mirror),
        Arc::new(UuidProvider),
        time_provider.clone(),
    ));

    let reconciler = Arc::new(DebouncedReconciler::new(
        ReconcilerConfig {
            debounce: Duration::from_millis(20),
            enabled: false, // scenario tests assert registry effects, not convergence
            ..Default::default()
        },
        runner.clone(),
    ));

    let service = Arc::new(ClusterService::new(
        registry.clone(),
        runner.clone(),
        tasks.clone(),
        reconciler,
        time_provider,
        ClusterServiceConfig {
            scripts_dir: PathBuf::from("/opt/corral/scripts"),
            operation_timeout: Duration::from_secs(5),
            protected_clusters: vec!["devops".to_string()],
        },
    ));

    Stack {
        service,
        registry,
        runner,
        tasks,
    }
}

fn spec(name: &str) -> ClusterSpec {
    ClusterSpec {
        name: name.to_string(),
        provider: Provider::K3d,
        node_port: 30080,
        pf_port: None,
        http_port: None,
        https_port: None,
        subnet: None,
    }
}

async fn wait_terminal(tasks: &TaskManager, task_id: &str) -> Task {
    for _ in 0..400 {
        if let Some(task) = tasks.get_task(task_id).await {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {} never reached a terminal state", task_id);
}

#[tokio::test]
async fn test_declaring_demo_cluster_flips_existence_and_conflicts_on_repeat() {
    let s = stack(MockBehavior::Succeed(vec!["cluster demo ready".to_string()])).await;

    assert!(!s.registry.exists("demo").await.unwrap());

    let task_id = s.service.declare_cluster(spec("demo")).await.unwrap();
    assert!(s.registry.exists("demo").await.unwrap());

    let err = s.service.declare_cluster(spec("demo")).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let task = wait_terminal(&s.tasks, &task_id).await;
    assert_eq!(task.status, TaskState::Completed);
}

#[tokio::test]
async fn test_create_lifecycle_updates_registry_and_ledger() {
    let s = stack(MockBehavior::Succeed(vec![
        "creating nodes".to_string(),
        "installing ingress".to_string(),
    ]))
    .await;

    let task_id = s.service.declare_cluster(spec("demo")).await.unwrap();
    let task = wait_terminal(&s.tasks, &task_id).await;

    assert_eq!(task.status, TaskState::Completed);
    assert_eq!(task.progress, 100);
    assert!(task.logs.iter().any(|l| l == "creating nodes"));
    assert!(task.logs.iter().any(|l| l == "installing ingress"));

    let cluster = s.registry.get("demo").await.unwrap().unwrap();
    assert_eq!(cluster.desired_state, DesiredState::Present);
    assert_eq!(cluster.actual_state, "running");

    let ops = s.registry.operations_for("demo", 10).await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].operation, OperationKind::Create);
    assert_eq!(ops[0].status, OperationStatus::Success);
    assert!(ops[0].log_output.as_deref().unwrap().contains("creating nodes"));

    let invocation = &s.runner.invocations()[0];
    assert!(invocation.program.ends_with("create_env.sh"));
    assert_eq!(
        invocation.args,
        vec!["-n", "demo", "-p", "k3d", "--node-port", "30080"]
    );
}

#[tokio::test]
async fn test_deletion_is_declarative_and_removes_row_after_teardown() {
    let s = stack(MockBehavior::Succeed(vec![])).await;

    let create_id = s.service.declare_cluster(spec("demo")).await.unwrap();
    wait_terminal(&s.tasks, &create_id).await;

    let delete_id = s.service.declare_delete("demo").await.unwrap();
    let task = wait_terminal(&s.tasks, &delete_id).await;
    assert_eq!(task.status, TaskState::Completed);

    assert!(!s.registry.exists("demo").await.unwrap());

    // ledger keeps the full history even after the row is gone
    let ops = s.registry.operations_for("demo", 10).await.unwrap();
    let kinds: Vec<OperationKind> = ops.iter().map(|o| o.operation).collect();
    assert!(kinds.contains(&OperationKind::Create));
    assert!(kinds.contains(&OperationKind::Delete));
}

#[tokio::test]
async fn test_failed_teardown_keeps_declared_absent_row() {
    let s = stack(MockBehavior::Succeed(vec![])).await;

    let create_id = s.service.declare_cluster(spec("demo")).await.unwrap();
    wait_terminal(&s.tasks, &create_id).await;

    s.runner.set_behavior(MockBehavior::ExitCode(vec![], 1));
    let delete_id = s.service.declare_delete("demo").await.unwrap();
    let task = wait_terminal(&s.tasks, &delete_id).await;

    assert_eq!(task.status, TaskState::Failed);
    let cluster = s.registry.get("demo").await.unwrap().unwrap();
    assert_eq!(cluster.desired_state, DesiredState::Absent);
    assert!(cluster.reconcile_error.is_some());
}

#[tokio::test]
async fn test_protected_cluster_cannot_be_deleted() {
    let s = stack(MockBehavior::Succeed(vec![])).await;

    let err = s.service.declare_delete("devops").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_operations_on_missing_cluster_are_rejected_before_any_task() {
    let s = stack(MockBehavior::Succeed(vec![])).await;

    assert!(matches!(
        s.service.start_cluster("ghost").await.unwrap_err(),
        AppError::NotFound(_)
    ));
    assert!(matches!(
        s.service.stop_cluster("ghost").await.unwrap_err(),
        AppError::NotFound(_)
    ));
    assert!(matches!(
        s.service.declare_delete("ghost").await.unwrap_err(),
        AppError::NotFound(_)
    ));

    assert!(s.tasks.list_tasks(None).await.is_empty());
    assert_eq!(s.runner.call_count(), 0);
}

#[tokio::test]
async fn test_timeout_surfaces_as_failed_task_with_ledgered_timeout() {
    let s = stack(MockBehavior::Timeout).await;

    let task_id = s.service.declare_cluster(spec("demo")).await.unwrap();
    let task = wait_terminal(&s.tasks, &task_id).await;

    assert_eq!(task.status, TaskState::Failed);

    let ops = s.registry.operations_for("demo", 10).await.unwrap();
    assert_eq!(ops[0].status, OperationStatus::Timeout);
    assert!(ops[0].error_message.as_deref().unwrap().contains("timeout"));
}
