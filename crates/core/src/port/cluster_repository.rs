// Cluster Repository Port (Resource Registry + Operation Ledger)

use crate::domain::{Cluster, ClusterUpdate, OperationKind, OperationRecord, OperationStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Capability interface over the persistence backend, selected once at
/// startup; call sites never branch on the concrete backend.
#[async_trait]
pub trait ClusterRepository: Send + Sync {
    /// Verify connectivity (schema is expected to exist already)
    async fn connect(&self) -> Result<()>;

    /// Release the backend's resources
    async fn disconnect(&self) -> Result<()>;

    /// Insert a new cluster row; Conflict if the name already exists
    async fn insert(&self, cluster: &Cluster) -> Result<()>;

    /// Fetch a cluster by name
    async fn get(&self, name: &str) -> Result<Option<Cluster>>;

    /// All clusters, oldest first
    async fn list(&self) -> Result<Vec<Cluster>>;

    /// Apply a partial update; false when the cluster is absent or the
    /// update carries no recognized field
    async fn update(&self, name: &str, update: &ClusterUpdate) -> Result<bool>;

    /// Hard-delete the row (used once teardown is confirmed)
    async fn remove(&self, name: &str) -> Result<bool>;

    /// Existence check by name
    async fn exists(&self, name: &str) -> Result<bool>;

    // ------------------------------------------------------------------
    // Operation ledger (append-only history, survives restarts)
    // ------------------------------------------------------------------

    /// Open a ledger entry for an operation; returns its id
    async fn log_operation_start(&self, cluster_name: &str, kind: OperationKind) -> Result<i64>;

    /// Close a ledger entry exactly once with its outcome
    async fn log_operation_complete(
        &self,
        operation_id: i64,
        status: OperationStatus,
        log_output: Option<String>,
        error_message: Option<String>,
    ) -> Result<()>;

    /// Most recent operations for a cluster
    async fn operations_for(&self, cluster_name: &str, limit: i64) -> Result<Vec<OperationRecord>>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    /// In-memory registry + ledger (second backend variant, used by tests)
    #[derive(Default)]
    pub struct InMemoryClusterRepository {
        clusters: Mutex<HashMap<String, Cluster>>,
        operations: Mutex<Vec<OperationRecord>>,
        next_op_id: AtomicI64,
    }

    impl InMemoryClusterRepository {
        pub fn new() -> Self {
            Self {
                clusters: Mutex::new(HashMap::new()),
                operations: Mutex::new(Vec::new()),
                next_op_id: AtomicI64::new(1),
            }
        }

        /// All ledger entries (for assertions)
        pub fn all_operations(&self) -> Vec<OperationRecord> {
            self.operations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClusterRepository for InMemoryClusterRepository {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn insert(&self, cluster: &Cluster) -> Result<()> {
            let mut clusters = self.clusters.lock().unwrap();
            if clusters.contains_key(&cluster.name) {
                return Err(AppError::Conflict(format!(
                    "cluster {} already exists",
                    cluster.name
                )));
            }
            clusters.insert(cluster.name.clone(), cluster.clone());
            Ok(())
        }

        async fn get(&self, name: &str) -> Result<Option<Cluster>> {
            Ok(self.clusters.lock().unwrap().get(name).cloned())
        }

        async fn list(&self) -> Result<Vec<Cluster>> {
            let mut all: Vec<Cluster> = self.clusters.lock().unwrap().values().cloned().collect();
            all.sort_by_key(|c| c.created_at);
            Ok(all)
        }

        async fn update(&self, name: &str, update: &ClusterUpdate) -> Result<bool> {
            if update.is_empty() {
                return Ok(false);
            }
            let mut clusters = self.clusters.lock().unwrap();
            let Some(cluster) = clusters.get_mut(name) else {
                return Ok(false);
            };
            if let Some(v) = update.provider {
                cluster.provider = v;
            }
            if let Some(v) = update.node_port {
                cluster.node_port = v;
            }
            if let Some(v) = update.pf_port {
                cluster.pf_port = Some(v);
            }
            if let Some(v) = update.http_port {
                cluster.http_port = Some(v);
            }
            if let Some(v) = update.https_port {
                cluster.https_port = Some(v);
            }
            if let Some(v) = &update.subnet {
                cluster.subnet = Some(v.clone());
            }
            if let Some(v) = update.desired_state {
                cluster.desired_state = v;
            }
            if let Some(v) = &update.actual_state {
                cluster.actual_state = v.clone();
            }
            if let Some(v) = &update.reconcile_error {
                cluster.reconcile_error = v.clone();
            }
            cluster.updated_at += 1;
            Ok(true)
        }

        async fn remove(&self, name: &str) -> Result<bool> {
            Ok(self.clusters.lock().unwrap().remove(name).is_some())
        }

        async fn exists(&self, name: &str) -> Result<bool> {
            Ok(self.clusters.lock().unwrap().contains_key(name))
        }

        async fn log_operation_start(
            &self,
            cluster_name: &str,
            kind: OperationKind,
        ) -> Result<i64> {
            let id = self.next_op_id.fetch_add(1, Ordering::SeqCst);
            self.operations.lock().unwrap().push(OperationRecord {
                id,
                cluster_name: cluster_name.to_string(),
                operation: kind,
                status: OperationStatus::Running,
                log_output: None,
                error_message: None,
                started_at: id * 1000,
                completed_at: None,
            });
            Ok(id)
        }

        async fn log_operation_complete(
            &self,
            operation_id: i64,
            status: OperationStatus,
            log_output: Option<String>,
            error_message: Option<String>,
        ) -> Result<()> {
            let mut operations = self.operations.lock().unwrap();
            let record = operations
                .iter_mut()
                .find(|r| r.id == operation_id)
                .ok_or_else(|| AppError::NotFound(format!("operation {}", operation_id)))?;
            record.status = status;
            record.log_output = log_output;
            record.error_message = error_message;
            record.completed_at = Some(record.started_at + 1);
            Ok(())
        }

        async fn operations_for(
            &self,
            cluster_name: &str,
            limit: i64,
        ) -> Result<Vec<OperationRecord>> {
            let operations = self.operations.lock().unwrap();
            let mut matching: Vec<OperationRecord> = operations
                .iter()
                .filter(|r| r.cluster_name == cluster_name)
                .cloned()
                .collect();
            matching.sort_by_key(|r| std::cmp::Reverse(r.started_at));
            matching.truncate(limit as usize);
            Ok(matching)
        }
    }
}
