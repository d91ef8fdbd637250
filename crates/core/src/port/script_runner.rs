// Script Runner Port
// Abstraction for executing one external command and streaming its output

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// One external command invocation
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Read timeout: if no output line arrives within this window the
    /// process is killed and the run reported as a timeout
    pub timeout: Duration,
}

/// Exit classification of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStatus {
    Success,
    Failed,
}

/// Result of a run that reached process exit
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub status: ScriptStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
}

/// Runner errors, distinct from a non-zero script exit
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("No output within {0:?}, process killed")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(String),
}

/// Receives each decoded output line as it arrives
///
/// Implementations must tolerate being called from the runner's drain task;
/// a slow sink backpressures the stream, it never loses lines.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn emit(&self, line: &str);
}

/// Script Runner trait
///
/// Implementations:
/// - ProcessRunner (infra-system): spawns the command via tokio::process
/// - mocks::MockScriptRunner: canned outcomes for tests
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run the command, feeding combined stdout/stderr line-by-line into
    /// `sink`, and return its exit classification.
    ///
    /// # Errors
    /// - `ScriptError::SpawnFailed` if the executable is missing or the
    ///   process cannot start (no lines delivered)
    /// - `ScriptError::Timeout` if no output arrives within the window
    ///   (process force-killed, no further lines delivered)
    async fn run(
        &self,
        invocation: ScriptInvocation,
        sink: Arc<dyn OutputSink>,
    ) -> Result<ScriptOutcome, ScriptError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Mock runner behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Emit the given lines, then exit 0
        Succeed(Vec<String>),
        /// Emit the given lines, then exit with the code
        ExitCode(Vec<String>, i32),
        /// Report a read timeout
        Timeout,
        /// Report a spawn failure
        SpawnError(String),
        /// Panic (for fault-isolation testing)
        Panic(String),
    }

    /// Mock Script Runner for testing
    pub struct MockScriptRunner {
        behavior: Mutex<MockBehavior>,
        invocations: Mutex<Vec<ScriptInvocation>>,
        /// Optional artificial run duration, to simulate in-flight work
        pub delay: Option<Duration>,
    }

    impl MockScriptRunner {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                invocations: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Succeed(vec!["done".to_string()]))
        }

        pub fn new_failure(exit_code: i32) -> Self {
            Self::new(MockBehavior::ExitCode(vec![], exit_code))
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        pub fn call_count(&self) -> usize {
            self.invocations.lock().unwrap().len()
        }

        pub fn invocations(&self) -> Vec<ScriptInvocation> {
            self.invocations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ScriptRunner for MockScriptRunner {
        async fn run(
            &self,
            invocation: ScriptInvocation,
            sink: Arc<dyn OutputSink>,
        ) -> Result<ScriptOutcome, ScriptError> {
            self.invocations.lock().unwrap().push(invocation);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                MockBehavior::Succeed(lines) => {
                    for line in &lines {
                        sink.emit(line).await;
                    }
                    Ok(ScriptOutcome {
                        status: ScriptStatus::Success,
                        exit_code: Some(0),
                        duration_ms: 10,
                    })
                }
                MockBehavior::ExitCode(lines, code) => {
                    for line in &lines {
                        sink.emit(line).await;
                    }
                    Ok(ScriptOutcome {
                        status: if code == 0 {
                            ScriptStatus::Success
                        } else {
                            ScriptStatus::Failed
                        },
                        exit_code: Some(code),
                        duration_ms: 10,
                    })
                }
                MockBehavior::Timeout => Err(ScriptError::Timeout(Duration::from_secs(1))),
                MockBehavior::SpawnError(msg) => Err(ScriptError::SpawnFailed(msg)),
                MockBehavior::Panic(msg) => panic!("{}", msg),
            }
        }
    }

    /// Sink that collects every line (for assertions)
    #[derive(Default)]
    pub struct CollectingSink {
        lines: Mutex<Vec<String>>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutputSink for CollectingSink {
        async fn emit(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }

    /// Sink that discards everything
    pub struct NullSink;

    #[async_trait]
    impl OutputSink for NullSink {
        async fn emit(&self, _line: &str) {}
    }
}
