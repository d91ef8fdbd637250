// Corral Infrastructure - SQLite Adapter
// Implements: ClusterRepository (registry + operation ledger), TaskRepository

mod cluster_repository;
mod connection;
mod migration;
mod task_repository;

pub use cluster_repository::SqliteClusterRepository;
pub use connection::create_pool;
pub use migration::run_migrations;
pub use task_repository::SqliteTaskRepository;

// Note: sqlx::Error conversion is handled by a helper here
// (orphan rules: cannot implement From<sqlx::Error> for AppError in core)
