//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use corral_core::domain::{ClusterSpec, Provider};
use serde::{Deserialize, Serialize};

/// cluster.declare.v1 - declare a new cluster
#[derive(Debug, Deserialize)]
pub struct DeclareClusterRequest {
    pub name: String,
    pub provider: Provider,
    #[serde(default = "default_node_port")]
    pub node_port: u16,
    #[serde(default)]
    pub pf_port: Option<u16>,
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default)]
    pub https_port: Option<u16>,
    #[serde(default)]
    pub subnet: Option<String>,
}

fn default_node_port() -> u16 {
    30080
}

impl DeclareClusterRequest {
    pub fn into_spec(self) -> ClusterSpec {
        ClusterSpec {
            name: self.name,
            provider: self.provider,
            node_port: self.node_port,
            pf_port: self.pf_port,
            http_port: self.http_port,
            https_port: self.https_port,
            subnet: self.subnet,
        }
    }
}

/// cluster.get.v1 / cluster.delete.v1 / cluster.start.v1 / cluster.stop.v1
#[derive(Debug, Deserialize)]
pub struct ClusterNameRequest {
    pub name: String,
}

/// cluster.operations.v1 - recent ledger entries for a cluster
#[derive(Debug, Deserialize)]
pub struct ClusterOperationsRequest {
    pub name: String,
    #[serde(default = "default_operations_limit")]
    pub limit: i64,
}

fn default_operations_limit() -> i64 {
    50
}

/// Accepted response for every asynchronous cluster operation
#[derive(Debug, Clone, Serialize)]
pub struct TaskAcceptedResponse {
    pub task_id: String,
    pub status: String,
    pub message: String,
}

impl TaskAcceptedResponse {
    pub fn new(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: "pending".to_string(),
            message: message.into(),
        }
    }
}

/// task.get.v1 / task.subscribe.v1
#[derive(Debug, Deserialize)]
pub struct TaskIdRequest {
    pub task_id: String,
}

/// task.list.v1 - optional status filter (pending/running/completed/failed)
#[derive(Debug, Default, Deserialize)]
pub struct ListTasksRequest {
    #[serde(default)]
    pub status: Option<String>,
}

/// reconcile.schedule.v1 - fire-and-forget convergence request
#[derive(Debug, Deserialize)]
pub struct ScheduleReconcileRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleReconcileResponse {
    pub scheduled: bool,
}
