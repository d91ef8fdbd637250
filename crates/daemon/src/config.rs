//! Daemon configuration, read once from CORRAL_* environment variables

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.corral/corral.db";
const DEFAULT_SCRIPTS_DIR: &str = "./scripts";
const DEFAULT_RPC_PORT: u16 = 9630;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RECONCILE_DEBOUNCE_SECS: u64 = 5;
const DEFAULT_TASK_RETENTION_SECS: u64 = 3600;
const DEFAULT_PROTECTED_CLUSTERS: &str = "devops";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub scripts_dir: PathBuf,
    pub rpc_port: u16,
    pub operation_timeout: Duration,
    pub reconcile_debounce: Duration,
    pub auto_reconcile: bool,
    pub task_retention: Duration,
    pub protected_clusters: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let db_path = std::env::var("CORRAL_DB_PATH")
            .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());

        let scripts_dir = std::env::var("CORRAL_SCRIPTS_DIR")
            .map(|s| shellexpand::tilde(&s).into_owned())
            .unwrap_or_else(|_| DEFAULT_SCRIPTS_DIR.to_string());

        Self {
            db_path,
            scripts_dir: PathBuf::from(scripts_dir),
            rpc_port: env_parsed("CORRAL_RPC_PORT", DEFAULT_RPC_PORT),
            operation_timeout: Duration::from_secs(env_parsed(
                "CORRAL_OPERATION_TIMEOUT_SECS",
                DEFAULT_OPERATION_TIMEOUT_SECS,
            )),
            reconcile_debounce: Duration::from_secs(env_parsed(
                "CORRAL_RECONCILE_DEBOUNCE_SECS",
                DEFAULT_RECONCILE_DEBOUNCE_SECS,
            )),
            // Set CORRAL_AUTO_RECONCILE=0 to disable convergence runs
            auto_reconcile: std::env::var("CORRAL_AUTO_RECONCILE").as_deref() != Ok("0"),
            task_retention: Duration::from_secs(env_parsed(
                "CORRAL_TASK_RETENTION_SECS",
                DEFAULT_TASK_RETENTION_SECS,
            )),
            protected_clusters: std::env::var("CORRAL_PROTECTED_CLUSTERS")
                .unwrap_or_else(|_| DEFAULT_PROTECTED_CLUSTERS.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
