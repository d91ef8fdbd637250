//! corrald - control plane for disposable Kubernetes clusters

mod config;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use corral_api_rpc::{RpcServer, RpcServerConfig};
use corral_core::application::{
    BroadcastHub, ClusterService, ClusterServiceConfig, DebouncedReconciler, ReconcilerConfig,
    TaskManager,
};
use corral_core::port::id_provider::UuidProvider;
use corral_core::port::time_provider::SystemTimeProvider;
use corral_core::port::{ClusterRepository, ScriptRunner, TaskRepository};
use corral_infra_sqlite::{create_pool, run_migrations, SqliteClusterRepository, SqliteTaskRepository};
use corral_infra_system::ProcessRunner;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often the retention sweeper looks for expired terminal tasks
const TASK_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging (JSON for production, pretty for development)
    let log_format = std::env::var("CORRAL_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("corral=info,corrald=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("corrald v{} starting...", VERSION);

    // 2. Load configuration
    let cfg = Config::from_env();
    info!(db_path = %cfg.db_path, scripts_dir = %cfg.scripts_dir.display(), "Configuration loaded");

    // 3. Initialize database
    let pool = create_pool(&cfg.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);

    let registry: Arc<dyn ClusterRepository> = Arc::new(SqliteClusterRepository::new(
        pool.clone(),
        time_provider.clone(),
    ));
    registry
        .connect()
        .await
        .map_err(|e| anyhow::anyhow!("Registry connectivity check failed: {}", e))?;

    let task_mirror: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let runner: Arc<dyn ScriptRunner> = Arc::new(ProcessRunner::new(time_provider.clone()));

    let hub = Arc::new(BroadcastHub::new());
    let tasks = Arc::new(TaskManager::new(
        hub.clone(),
        Some(task_mirror),
        id_provider,
        time_provider.clone(),
    ));

    // 5. Restore persisted tasks, then fail the ones whose work died with
    // the previous process
    match tasks.restore().await {
        Ok(count) => info!(restored = count, "Task restore completed"),
        Err(e) => tracing::error!(error = %e, "Task restore failed"),
    }
    match tasks.fail_orphaned().await {
        Ok(count) => info!(orphaned = count, "Orphaned task recovery completed"),
        Err(e) => tracing::error!(error = %e, "Orphaned task recovery failed"),
    }

    // 6. Reconciler and cluster service
    let reconciler = Arc::new(DebouncedReconciler::new(
        ReconcilerConfig {
            debounce: cfg.reconcile_debounce,
            enabled: cfg.auto_reconcile,
            scripts_dir: cfg.scripts_dir.clone(),
            timeout: cfg.operation_timeout,
        },
        runner.clone(),
    ));

    let service = Arc::new(ClusterService::new(
        registry.clone(),
        runner,
        tasks.clone(),
        reconciler,
        time_provider,
        ClusterServiceConfig {
            scripts_dir: cfg.scripts_dir.clone(),
            operation_timeout: cfg.operation_timeout,
            protected_clusters: cfg.protected_clusters.clone(),
        },
    ));

    // 7. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_config = RpcServerConfig {
        port: cfg.rpc_port,
        ..Default::default()
    };
    let rpc_server = RpcServer::new(rpc_config, service, tasks.clone(), hub);
    let rpc_handle = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    // 8. Start the task retention sweeper
    let retention = cfg.task_retention;
    let sweeper_tasks = tasks.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TASK_SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let removed = sweeper_tasks.cleanup_old_tasks(retention).await;
            if removed > 0 {
                info!(removed, "Task retention sweep");
            }
        }
    });

    info!("System ready. Waiting for requests...");
    info!("Press Ctrl+C to shutdown");

    // 9. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 10. Graceful shutdown
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    rpc_handle.stopped().await;
    registry
        .disconnect()
        .await
        .map_err(|e| anyhow::anyhow!("Registry disconnect failed: {}", e))?;

    info!("Shutdown complete.");

    Ok(())
}
