// Port Layer - Interfaces for external dependencies

pub mod cluster_repository;
pub mod id_provider;
pub mod script_runner;
pub mod task_repository;
pub mod time_provider;

// Re-exports
pub use cluster_repository::ClusterRepository;
pub use id_provider::IdProvider;
pub use script_runner::{
    OutputSink, ScriptError, ScriptInvocation, ScriptOutcome, ScriptRunner, ScriptStatus,
};
pub use task_repository::TaskRepository;
pub use time_provider::TimeProvider;
