// Cluster Service - turns declared changes into tasks running lifecycle scripts

use crate::application::reconciler::DebouncedReconciler;
use crate::application::task_manager::{TaskManager, TaskUpdate, WorkOutcome};
use crate::domain::{
    Cluster, ClusterSpec, ClusterUpdate, DesiredState, OperationKind, OperationRecord,
    OperationStatus, TaskId,
};
use crate::error::{AppError, Result};
use crate::port::{
    ClusterRepository, OutputSink, ScriptError, ScriptInvocation, ScriptRunner, ScriptStatus,
    TimeProvider,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tracing::{info, warn};

/// Service tuning, read once at startup
#[derive(Debug, Clone)]
pub struct ClusterServiceConfig {
    pub scripts_dir: PathBuf,
    /// Read timeout for every lifecycle script
    pub operation_timeout: Duration,
    /// Control clusters that refuse deletion
    pub protected_clusters: Vec<String>,
}

impl Default for ClusterServiceConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("./scripts"),
            operation_timeout: Duration::from_secs(300),
            protected_clusters: vec!["devops".to_string()],
        }
    }
}

/// Cluster lifecycle orchestration
///
/// Each declared change is validated synchronously (NotFound/Conflict reach
/// the caller before any task exists), then executed asynchronously by a
/// task streaming the script's output. The registry reflects outcomes; the
/// debounced reconciler is signalled after every change.
pub struct ClusterService {
    registry: Arc<dyn ClusterRepository>,
    runner: Arc<dyn ScriptRunner>,
    tasks: Arc<TaskManager>,
    reconciler: Arc<DebouncedReconciler>,
    time_provider: Arc<dyn TimeProvider>,
    config: ClusterServiceConfig,
}

impl ClusterService {
    pub fn new(
        registry: Arc<dyn ClusterRepository>,
        runner: Arc<dyn ScriptRunner>,
        tasks: Arc<TaskManager>,
        reconciler: Arc<DebouncedReconciler>,
        time_provider: Arc<dyn TimeProvider>,
        config: ClusterServiceConfig,
    ) -> Self {
        Self {
            registry,
            runner,
            tasks,
            reconciler,
            time_provider,
            config,
        }
    }

    /// Declare a new cluster: register the desired state and spawn the
    /// creation task. Conflict if the name is already taken.
    pub async fn declare_cluster(self: &Arc<Self>, spec: ClusterSpec) -> Result<TaskId> {
        spec.validate()?;

        if self.registry.exists(&spec.name).await? {
            return Err(AppError::Conflict(format!(
                "cluster {} already exists",
                spec.name
            )));
        }

        let now = self.time_provider.now_millis();
        self.registry
            .insert(&Cluster::declared(spec.clone(), now))
            .await?;

        info!(cluster = %spec.name, provider = %spec.provider, "Cluster creation declared");

        let task_id = self
            .tasks
            .create_task(format!("Creating cluster {}", spec.name))
            .await;

        self.spawn_work(task_id.clone(), {
            let service = Arc::clone(self);
            let task_id = task_id.clone();
            async move { service.create_work(spec, task_id).await }
        });

        Ok(task_id)
    }

    /// Declare a cluster absent and spawn the teardown task. The row
    /// survives until the teardown script confirms; a protected control
    /// cluster refuses deletion.
    pub async fn declare_delete(self: &Arc<Self>, name: &str) -> Result<TaskId> {
        if self.config.protected_clusters.iter().any(|p| p == name) {
            return Err(AppError::Conflict(format!(
                "cluster {} is protected and cannot be deleted",
                name
            )));
        }
        self.ensure_exists(name).await?;

        // Declarative delete: flip the desired state, clear any stale
        // reconcile error from a previous action.
        self.registry
            .update(
                name,
                &ClusterUpdate {
                    desired_state: Some(DesiredState::Absent),
                    reconcile_error: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        info!(cluster = %name, "Cluster deletion declared");

        let task_id = self
            .tasks
            .create_task(format!("Deleting cluster {}", name))
            .await;

        self.spawn_work(task_id.clone(), {
            let service = Arc::clone(self);
            let name = name.to_string();
            let task_id = task_id.clone();
            async move { service.delete_work(name, task_id).await }
        });

        Ok(task_id)
    }

    /// Start a stopped cluster (async operation)
    pub async fn start_cluster(self: &Arc<Self>, name: &str) -> Result<TaskId> {
        self.lifecycle_task(name, OperationKind::Start, "Starting", "running")
            .await
    }

    /// Stop a running cluster (async operation)
    pub async fn stop_cluster(self: &Arc<Self>, name: &str) -> Result<TaskId> {
        self.lifecycle_task(name, OperationKind::Stop, "Stopping", "stopped")
            .await
    }

    /// Fetch one cluster or NotFound
    pub async fn get_cluster(&self, name: &str) -> Result<Cluster> {
        self.registry
            .get(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("cluster {} not found", name)))
    }

    /// All clusters, oldest first
    pub async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        self.registry.list().await
    }

    /// Recent ledger entries for one cluster
    pub async fn cluster_operations(&self, name: &str, limit: i64) -> Result<Vec<OperationRecord>> {
        self.ensure_exists(name).await?;
        self.registry.operations_for(name, limit).await
    }

    /// Fire-and-forget convergence request
    pub async fn schedule_reconcile(&self, reason: &str) {
        self.reconciler.schedule(reason).await;
    }

    async fn ensure_exists(&self, name: &str) -> Result<()> {
        if !self.registry.exists(name).await? {
            return Err(AppError::NotFound(format!("cluster {} not found", name)));
        }
        Ok(())
    }

    /// Common start/stop shape: identity-only script, actual_state update
    /// on success.
    async fn lifecycle_task(
        self: &Arc<Self>,
        name: &str,
        kind: OperationKind,
        verb: &str,
        state_on_success: &'static str,
    ) -> Result<TaskId> {
        self.ensure_exists(name).await?;

        let task_id = self
            .tasks
            .create_task(format!("{} cluster {}", verb, name))
            .await;

        self.spawn_work(task_id.clone(), {
            let service = Arc::clone(self);
            let name = name.to_string();
            let task_id = task_id.clone();
            async move {
                let ok = service
                    .run_operation(&name, kind, vec![name.clone()], &task_id)
                    .await?;
                if ok {
                    service
                        .registry
                        .update(
                            &name,
                            &ClusterUpdate {
                                actual_state: Some(state_on_success.to_string()),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                Ok(WorkOutcome::from(ok))
            }
        });

        Ok(task_id)
    }

    /// Hand a unit of work to the task runner on its own tokio task so the
    /// declaring call returns immediately.
    fn spawn_work<F>(&self, task_id: TaskId, work: F)
    where
        F: std::future::Future<Output = Result<WorkOutcome>> + Send + 'static,
    {
        let tasks = Arc::clone(&self.tasks);
        tokio::spawn(async move {
            tasks.run_task(&task_id, work).await;
        });
    }

    async fn create_work(self: Arc<Self>, spec: ClusterSpec, task_id: TaskId) -> Result<WorkOutcome> {
        let mut args = vec![
            "-n".to_string(),
            spec.name.clone(),
            "-p".to_string(),
            spec.provider.to_string(),
            "--node-port".to_string(),
            spec.node_port.to_string(),
        ];
        if let Some(pf_port) = spec.pf_port {
            args.push("--pf-port".to_string());
            args.push(pf_port.to_string());
        }

        let ok = self
            .run_operation(&spec.name, OperationKind::Create, args, &task_id)
            .await?;

        let update = if ok {
            ClusterUpdate {
                actual_state: Some("running".to_string()),
                ..Default::default()
            }
        } else {
            ClusterUpdate {
                actual_state: Some("error".to_string()),
                reconcile_error: Some(Some(format!("creation of {} failed", spec.name))),
                ..Default::default()
            }
        };
        self.registry.update(&spec.name, &update).await?;

        self.reconciler
            .schedule(&format!("cluster {} declared", spec.name))
            .await;

        Ok(WorkOutcome::from(ok))
    }

    async fn delete_work(self: Arc<Self>, name: String, task_id: TaskId) -> Result<WorkOutcome> {
        let args = vec!["-n".to_string(), name.clone()];
        let ok = self
            .run_operation(&name, OperationKind::Delete, args, &task_id)
            .await?;

        if ok {
            // Teardown confirmed; the declared-absent row can go.
            self.registry.remove(&name).await?;
        } else {
            self.registry
                .update(
                    &name,
                    &ClusterUpdate {
                        actual_state: Some("error".to_string()),
                        reconcile_error: Some(Some(format!("teardown of {} failed", name))),
                        ..Default::default()
                    },
                )
                .await?;
        }

        self.reconciler
            .schedule(&format!("cluster {} teardown", name))
            .await;

        Ok(WorkOutcome::from(ok))
    }

    /// Run one lifecycle script, streaming its combined output into the
    /// task's log, bracketed by operation-ledger entries. Returns whether
    /// the script succeeded; runner-level faults are folded into `false`
    /// after being ledgered.
    async fn run_operation(
        &self,
        cluster_name: &str,
        kind: OperationKind,
        args: Vec<String>,
        task_id: &str,
    ) -> Result<bool> {
        let op_id = self
            .registry
            .log_operation_start(cluster_name, kind)
            .await?;

        let sink = Arc::new(TaskLogSink::new(
            Arc::clone(&self.tasks),
            task_id.to_string(),
        ));
        sink.emit(&format!(
            "[INFO] Executing {} {}",
            kind.script_name(),
            args.join(" ")
        ))
        .await;

        let invocation = ScriptInvocation {
            program: self.config.scripts_dir.join(kind.script_name()),
            args,
            working_dir: self.config.scripts_dir.clone(),
            timeout: self.config.operation_timeout,
        };

        info!(
            cluster = %cluster_name,
            operation = %kind,
            program = %invocation.program.display(),
            "Running operation script"
        );

        let (ok, status, error_message) = match self.runner.run(invocation, sink.clone()).await {
            Ok(outcome) if outcome.status == ScriptStatus::Success => {
                sink.emit("[SUCCESS] Operation completed successfully").await;
                (true, OperationStatus::Success, None)
            }
            Ok(outcome) => {
                let code = outcome
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let msg = format!("Script failed with exit code {}", code);
                sink.emit(&format!("[ERROR] {}", msg)).await;
                (false, OperationStatus::Failed, Some(msg))
            }
            Err(ScriptError::Timeout(window)) => {
                let msg = format!("Operation timeout after {}s", window.as_secs());
                sink.emit(&format!("[ERROR] {}", msg)).await;
                (false, OperationStatus::Timeout, Some(msg))
            }
            Err(e) => {
                let msg = format!("Failed to execute script: {}", e);
                sink.emit(&format!("[ERROR] {}", msg)).await;
                (false, OperationStatus::Error, Some(msg))
            }
        };

        self.registry
            .log_operation_complete(op_id, status, Some(sink.captured()), error_message)
            .await?;

        Ok(ok)
    }
}

/// Streams script output into a task's log while capturing the full text
/// for the operation ledger.
struct TaskLogSink {
    tasks: Arc<TaskManager>,
    task_id: TaskId,
    captured: StdMutex<String>,
}

impl TaskLogSink {
    fn new(tasks: Arc<TaskManager>, task_id: TaskId) -> Self {
        Self {
            tasks,
            task_id,
            captured: StdMutex::new(String::new()),
        }
    }

    fn captured(&self) -> String {
        self.captured.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutputSink for TaskLogSink {
    async fn emit(&self, line: &str) {
        if let Err(e) = self
            .tasks
            .update_task(&self.task_id, TaskUpdate::log(line))
            .await
        {
            warn!(task_id = %self.task_id, error = %e, "Could not append task log line");
        }
        let mut captured = self.captured.lock().unwrap();
        captured.push_str(line);
        captured.push('\n');
    }
}
