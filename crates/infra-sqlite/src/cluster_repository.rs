// SQLite ClusterRepository Implementation
// Resource registry plus the append-only operation ledger

use async_trait::async_trait;
use corral_core::domain::{
    Cluster, ClusterUpdate, DesiredState, OperationKind, OperationRecord, OperationStatus,
    Provider,
};
use corral_core::error::{AppError, Result};
use corral_core::port::{ClusterRepository, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;

// Helper to convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => {
                        // UNIQUE constraint failed - surface as Conflict
                        AppError::Conflict(format!(
                            "Unique constraint violation: {} ({})",
                            db_err.message(),
                            code_str
                        ))
                    }
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteClusterRepository {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteClusterRepository {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl ClusterRepository for SqliteClusterRepository {
    async fn connect(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn insert(&self, cluster: &Cluster) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clusters (
                name, provider, node_port, pf_port, http_port, https_port,
                subnet, desired_state, actual_state, reconcile_error,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cluster.name)
        .bind(cluster.provider.to_string())
        .bind(cluster.node_port as i64)
        .bind(cluster.pf_port.map(|p| p as i64))
        .bind(cluster.http_port.map(|p| p as i64))
        .bind(cluster.https_port.map(|p| p as i64))
        .bind(&cluster.subnet)
        .bind(cluster.desired_state.to_string())
        .bind(&cluster.actual_state)
        .bind(&cluster.reconcile_error)
        .bind(cluster.created_at)
        .bind(cluster.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Cluster>> {
        let row = sqlx::query_as::<_, ClusterRow>("SELECT * FROM clusters WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.into_cluster()))
    }

    async fn list(&self) -> Result<Vec<Cluster>> {
        let rows: Vec<ClusterRow> =
            sqlx::query_as("SELECT * FROM clusters ORDER BY created_at ASC, name ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|r| r.into_cluster()).collect())
    }

    async fn update(&self, name: &str, update: &ClusterUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(false);
        }

        // Dynamic SET clause over the recognized fields only; identity and
        // created_at are not representable in ClusterUpdate. Binds are
        // appended in the same order as the clauses.
        let mut set_clauses: Vec<&str> = Vec::new();
        if update.provider.is_some() {
            set_clauses.push("provider = ?");
        }
        if update.node_port.is_some() {
            set_clauses.push("node_port = ?");
        }
        if update.pf_port.is_some() {
            set_clauses.push("pf_port = ?");
        }
        if update.http_port.is_some() {
            set_clauses.push("http_port = ?");
        }
        if update.https_port.is_some() {
            set_clauses.push("https_port = ?");
        }
        if update.subnet.is_some() {
            set_clauses.push("subnet = ?");
        }
        if update.desired_state.is_some() {
            set_clauses.push("desired_state = ?");
        }
        if update.actual_state.is_some() {
            set_clauses.push("actual_state = ?");
        }
        if update.reconcile_error.is_some() {
            set_clauses.push("reconcile_error = ?");
        }
        set_clauses.push("updated_at = ?");

        let sql = format!(
            "UPDATE clusters SET {} WHERE name = ?",
            set_clauses.join(", ")
        );

        let mut query = sqlx::query(&sql);
        if let Some(provider) = update.provider {
            query = query.bind(provider.to_string());
        }
        if let Some(node_port) = update.node_port {
            query = query.bind(node_port as i64);
        }
        if let Some(pf_port) = update.pf_port {
            query = query.bind(pf_port as i64);
        }
        if let Some(http_port) = update.http_port {
            query = query.bind(http_port as i64);
        }
        if let Some(https_port) = update.https_port {
            query = query.bind(https_port as i64);
        }
        if let Some(subnet) = &update.subnet {
            query = query.bind(subnet.clone());
        }
        if let Some(desired_state) = update.desired_state {
            query = query.bind(desired_state.to_string());
        }
        if let Some(actual_state) = &update.actual_state {
            query = query.bind(actual_state.clone());
        }
        if let Some(reconcile_error) = &update.reconcile_error {
            // Some(None) clears the column
            query = query.bind(reconcile_error.clone());
        }
        query = query.bind(self.time_provider.now_millis());
        query = query.bind(name);

        let result = query
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM clusters WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM clusters WHERE name = ? LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.is_some())
    }

    async fn log_operation_start(&self, cluster_name: &str, kind: OperationKind) -> Result<i64> {
        let now = self.time_provider.now_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO operations (cluster_name, operation, status, started_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(cluster_name)
        .bind(kind.to_string())
        .bind(OperationStatus::Running.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.last_insert_rowid())
    }

    async fn log_operation_complete(
        &self,
        operation_id: i64,
        status: OperationStatus,
        log_output: Option<String>,
        error_message: Option<String>,
    ) -> Result<()> {
        let now = self.time_provider.now_millis();

        // Conditional update: completion fields are set exactly once
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET status = ?, completed_at = ?, log_output = ?, error_message = ?
            WHERE id = ? AND completed_at IS NULL
            "#,
        )
        .bind(status.to_string())
        .bind(now)
        .bind(log_output)
        .bind(error_message)
        .bind(operation_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM operations WHERE id = ? LIMIT 1")
                    .bind(operation_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

            return match exists {
                None => Err(AppError::NotFound(format!(
                    "operation {} not found",
                    operation_id
                ))),
                Some(_) => Err(AppError::Conflict(format!(
                    "operation {} already completed",
                    operation_id
                ))),
            };
        }

        Ok(())
    }

    async fn operations_for(&self, cluster_name: &str, limit: i64) -> Result<Vec<OperationRecord>> {
        let rows: Vec<OperationRow> = sqlx::query_as(
            r#"
            SELECT * FROM operations
            WHERE cluster_name = ?
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(cluster_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|r| r.into_record()).collect())
    }
}

/// SQLite row representation of a cluster
#[derive(Debug, sqlx::FromRow)]
struct ClusterRow {
    name: String,
    provider: String,
    node_port: i64,
    pf_port: Option<i64>,
    http_port: Option<i64>,
    https_port: Option<i64>,
    subnet: Option<String>,
    desired_state: String,
    actual_state: String,
    reconcile_error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl ClusterRow {
    fn into_cluster(self) -> Cluster {
        Cluster {
            name: self.name,
            // Default fallbacks for rows written by older tooling
            provider: Provider::parse(&self.provider).unwrap_or(Provider::K3d),
            node_port: self.node_port as u16,
            pf_port: self.pf_port.map(|p| p as u16),
            http_port: self.http_port.map(|p| p as u16),
            https_port: self.https_port.map(|p| p as u16),
            subnet: self.subnet,
            desired_state: DesiredState::parse(&self.desired_state)
                .unwrap_or(DesiredState::Present),
            actual_state: self.actual_state,
            reconcile_error: self.reconcile_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// SQLite row representation of a ledger entry
#[derive(Debug, sqlx::FromRow)]
struct OperationRow {
    id: i64,
    cluster_name: String,
    operation: String,
    status: String,
    log_output: Option<String>,
    error_message: Option<String>,
    started_at: i64,
    completed_at: Option<i64>,
}

impl OperationRow {
    fn into_record(self) -> OperationRecord {
        OperationRecord {
            id: self.id,
            cluster_name: self.cluster_name,
            operation: OperationKind::parse(&self.operation).unwrap_or(OperationKind::Reconcile),
            status: OperationStatus::parse(&self.status).unwrap_or(OperationStatus::Error),
            log_output: self.log_output,
            error_message: self.error_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}
