//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method. Reads go to the
//! registry and task store directly; writes go through the ClusterService.

use crate::error::to_rpc_error;
use crate::types::{
    ClusterNameRequest, ClusterOperationsRequest, DeclareClusterRequest, ListTasksRequest,
    ScheduleReconcileRequest, ScheduleReconcileResponse, TaskAcceptedResponse, TaskIdRequest,
};
use corral_core::application::{BroadcastHub, ClusterService, TaskManager};
use corral_core::domain::{Cluster, OperationRecord, Task, TaskState};
use corral_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    service: Arc<ClusterService>,
    tasks: Arc<TaskManager>,
    hub: Arc<BroadcastHub>,
}

impl RpcHandler {
    pub fn new(
        service: Arc<ClusterService>,
        tasks: Arc<TaskManager>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            service,
            tasks,
            hub,
        }
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// cluster.declare.v1
    pub async fn declare_cluster(
        &self,
        params: DeclareClusterRequest,
    ) -> Result<TaskAcceptedResponse, ErrorObjectOwned> {
        let name = params.name.clone();
        let task_id = self
            .service
            .declare_cluster(params.into_spec())
            .await
            .map_err(to_rpc_error)?;

        Ok(TaskAcceptedResponse::new(
            task_id,
            format!("Cluster creation declared for {}", name),
        ))
    }

    /// cluster.get.v1
    pub async fn get_cluster(
        &self,
        params: ClusterNameRequest,
    ) -> Result<Cluster, ErrorObjectOwned> {
        self.service
            .get_cluster(&params.name)
            .await
            .map_err(to_rpc_error)
    }

    /// cluster.list.v1
    pub async fn list_clusters(&self) -> Result<Vec<Cluster>, ErrorObjectOwned> {
        self.service.list_clusters().await.map_err(to_rpc_error)
    }

    /// cluster.delete.v1
    pub async fn delete_cluster(
        &self,
        params: ClusterNameRequest,
    ) -> Result<TaskAcceptedResponse, ErrorObjectOwned> {
        let task_id = self
            .service
            .declare_delete(&params.name)
            .await
            .map_err(to_rpc_error)?;

        Ok(TaskAcceptedResponse::new(
            task_id,
            format!("Cluster deletion declared for {}", params.name),
        ))
    }

    /// cluster.start.v1
    pub async fn start_cluster(
        &self,
        params: ClusterNameRequest,
    ) -> Result<TaskAcceptedResponse, ErrorObjectOwned> {
        let task_id = self
            .service
            .start_cluster(&params.name)
            .await
            .map_err(to_rpc_error)?;

        Ok(TaskAcceptedResponse::new(
            task_id,
            format!("Cluster start task created for {}", params.name),
        ))
    }

    /// cluster.stop.v1
    pub async fn stop_cluster(
        &self,
        params: ClusterNameRequest,
    ) -> Result<TaskAcceptedResponse, ErrorObjectOwned> {
        let task_id = self
            .service
            .stop_cluster(&params.name)
            .await
            .map_err(to_rpc_error)?;

        Ok(TaskAcceptedResponse::new(
            task_id,
            format!("Cluster stop task created for {}", params.name),
        ))
    }

    /// cluster.operations.v1
    pub async fn cluster_operations(
        &self,
        params: ClusterOperationsRequest,
    ) -> Result<Vec<OperationRecord>, ErrorObjectOwned> {
        self.service
            .cluster_operations(&params.name, params.limit)
            .await
            .map_err(to_rpc_error)
    }

    /// task.get.v1
    pub async fn get_task(&self, params: TaskIdRequest) -> Result<Task, ErrorObjectOwned> {
        self.tasks.get_task(&params.task_id).await.ok_or_else(|| {
            to_rpc_error(AppError::NotFound(format!(
                "task {} not found",
                params.task_id
            )))
        })
    }

    /// task.list.v1
    pub async fn list_tasks(
        &self,
        params: ListTasksRequest,
    ) -> Result<Vec<Task>, ErrorObjectOwned> {
        let filter = match &params.status {
            Some(raw) => Some(TaskState::parse(raw).ok_or_else(|| {
                to_rpc_error(AppError::Validation(format!(
                    "unknown task status filter {:?}",
                    raw
                )))
            })?),
            None => None,
        };

        Ok(self.tasks.list_tasks(filter).await)
    }

    /// reconcile.schedule.v1
    pub async fn schedule_reconcile(
        &self,
        params: ScheduleReconcileRequest,
    ) -> Result<ScheduleReconcileResponse, ErrorObjectOwned> {
        let reason = params.reason.unwrap_or_else(|| "api request".to_string());
        self.service.schedule_reconcile(&reason).await;
        Ok(ScheduleReconcileResponse { scheduled: true })
    }
}
