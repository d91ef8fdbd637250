// Operation Ledger Domain Model

use serde::{Deserialize, Serialize};

/// The bounded set of operation kinds, each backed by one external command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Delete,
    Start,
    Stop,
    Reconcile,
}

impl OperationKind {
    /// Script backing this operation kind
    pub fn script_name(&self) -> &'static str {
        match self {
            OperationKind::Create => "create_env.sh",
            OperationKind::Delete => "delete_env.sh",
            OperationKind::Start => "start_env.sh",
            OperationKind::Stop => "stop_env.sh",
            OperationKind::Reconcile => "reconcile.sh",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(OperationKind::Create),
            "delete" => Some(OperationKind::Delete),
            "start" => Some(OperationKind::Start),
            "stop" => Some(OperationKind::Stop),
            "reconcile" => Some(OperationKind::Reconcile),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::Start => write!(f, "start"),
            OperationKind::Stop => write!(f, "stop"),
            OperationKind::Reconcile => write!(f, "reconcile"),
        }
    }
}

/// Terminal (or in-flight) status of a ledgered operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Success,
    Failed,
    Timeout,
    Error,
}

impl OperationStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(OperationStatus::Running),
            "success" => Some(OperationStatus::Success),
            "failed" => Some(OperationStatus::Failed),
            "timeout" => Some(OperationStatus::Timeout),
            "error" => Some(OperationStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Running => write!(f, "running"),
            OperationStatus::Success => write!(f, "success"),
            OperationStatus::Failed => write!(f, "failed"),
            OperationStatus::Timeout => write!(f, "timeout"),
            OperationStatus::Error => write!(f, "error"),
        }
    }
}

/// Operation Record
///
/// Durable audit entry for one invocation of an operation against a cluster.
/// Append-only: completion fields are set exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: i64,
    pub cluster_name: String,
    pub operation: OperationKind,
    pub status: OperationStatus,
    /// Captured combined stdout/stderr of the script
    pub log_output: Option<String>,
    pub error_message: Option<String>,
    pub started_at: i64, // epoch ms
    pub completed_at: Option<i64>,
}
