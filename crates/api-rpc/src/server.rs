//! JSON-RPC Server
//!
//! Serves the control-plane API on localhost TCP. Task-update streaming is
//! a JSON-RPC subscription whose sink is registered as a broadcast-hub
//! listener; the hub drops the subscriber as soon as delivery fails.

use crate::error::to_rpc_error;
use crate::handler::RpcHandler;
use crate::types::{
    ClusterNameRequest, ClusterOperationsRequest, DeclareClusterRequest, ListTasksRequest,
    ScheduleReconcileRequest, TaskIdRequest,
};
use async_trait::async_trait;
use corral_core::application::{BroadcastHub, ClusterService, ListenerId, TaskListener, TaskManager};
use corral_core::domain::TaskEvent;
use corral_core::error::AppError;
use jsonrpsee::core::SubscriptionResult;
use jsonrpsee::server::{
    PendingSubscriptionSink, Server, ServerHandle, SubscriptionMessage, SubscriptionSink,
};
use jsonrpsee::types::Params;
use jsonrpsee::RpcModule;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9630;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        service: Arc<ClusterService>,
        tasks: Arc<TaskManager>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(service, tasks, hub)),
        }
    }

    /// Start the JSON-RPC server
    ///
    /// Security: binds to localhost only; there is no external access.
    pub async fn start(self) -> Result<ServerHandle, String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server on TCP (localhost only)"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;

        let mut module = RpcModule::new(());

        // Cluster boundary
        let handler = self.handler.clone();
        module
            .register_async_method("cluster.declare.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: DeclareClusterRequest = params.parse()?;
                    handler.declare_cluster(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("cluster.get.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ClusterNameRequest = params.parse()?;
                    handler.get_cluster(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("cluster.list.v1", move |_params, _, _| {
                let handler = handler.clone();
                async move { handler.list_clusters().await }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("cluster.delete.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ClusterNameRequest = params.parse()?;
                    handler.delete_cluster(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("cluster.start.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ClusterNameRequest = params.parse()?;
                    handler.start_cluster(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("cluster.stop.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ClusterNameRequest = params.parse()?;
                    handler.stop_cluster(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("cluster.operations.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ClusterOperationsRequest = params.parse()?;
                    handler.cluster_operations(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Task observation boundary
        let handler = self.handler.clone();
        module
            .register_async_method("task.get.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: TaskIdRequest = params.parse()?;
                    handler.get_task(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("task.list.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ListTasksRequest = params.parse().unwrap_or_default();
                    handler.list_tasks(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Reconcile trigger boundary
        let handler = self.handler.clone();
        module
            .register_async_method("reconcile.schedule.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ScheduleReconcileRequest = params.parse()?;
                    handler.schedule_reconcile(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Live task updates
        let handler = self.handler.clone();
        module
            .register_subscription(
                "task.subscribe.v1",
                "task.update.v1",
                "task.unsubscribe.v1",
                move |params, pending, _, _| {
                    let handler = handler.clone();
                    subscribe_task(handler, params, pending)
                },
            )
            .map_err(|e| e.to_string())?;

        info!("JSON-RPC server started successfully");

        let handle = server.start(module);
        Ok(handle)
    }
}

/// task.subscribe.v1 - attach a subscription sink to one task's updates
async fn subscribe_task(
    handler: Arc<RpcHandler>,
    params: Params<'static>,
    pending: PendingSubscriptionSink,
) -> SubscriptionResult {
    let req: TaskIdRequest = match params.parse() {
        Ok(req) => req,
        Err(e) => {
            pending.reject(e).await;
            return Ok(());
        }
    };

    let Some(task) = handler.tasks().get_task(&req.task_id).await else {
        pending
            .reject(to_rpc_error(AppError::NotFound(format!(
                "task {} not found",
                req.task_id
            ))))
            .await;
        return Ok(());
    };

    let sink = match pending.accept().await {
        Ok(sink) => sink,
        Err(e) => {
            debug!(task_id = %req.task_id, error = %e, "Subscription not accepted");
            return Ok(());
        }
    };

    let hub = Arc::clone(handler.hub());
    let listener_id = hub.next_listener_id();
    let listener = Arc::new(SubscriptionListener {
        id: listener_id,
        sink: sink.clone(),
    });

    // Current snapshot first, then live updates through the hub
    let _ = listener.deliver(&task.event()).await;
    hub.subscribe(listener, &req.task_id).await;

    debug!(task_id = %req.task_id, listener_id, "Task subscription attached");

    // Keep the subscription alive until the client goes away, then make
    // sure the hub forgets it even if no publish failed in the meantime.
    sink.closed().await;
    hub.disconnect(listener_id).await;

    Ok(())
}

/// Bridges hub deliveries into a JSON-RPC subscription sink
struct SubscriptionListener {
    id: ListenerId,
    sink: SubscriptionSink,
}

#[async_trait]
impl TaskListener for SubscriptionListener {
    fn id(&self) -> ListenerId {
        self.id
    }

    async fn deliver(&self, event: &TaskEvent) -> corral_core::Result<()> {
        let msg = SubscriptionMessage::from_json(event)?;
        self.sink
            .send(msg)
            .await
            .map_err(|e| AppError::Internal(format!("subscriber disconnected: {}", e)))
    }
}
