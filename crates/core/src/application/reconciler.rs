// Debounced Reconciler - coalesces change signals into one convergence pass
//
// Every schedule() restarts the debounce window; the convergence script
// only runs after a quiet period with no new signals. A signal arriving
// while a run is in flight queues exactly one follow-up run behind it.

use crate::port::{OutputSink, ScriptInvocation, ScriptRunner, ScriptStatus};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::domain::OperationKind;

/// Reconciler tuning, read once at startup
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Quiet period before a convergence run fires
    pub debounce: Duration,
    /// When false, schedule() only logs
    pub enabled: bool,
    pub scripts_dir: PathBuf,
    /// Read timeout handed to the script runner
    pub timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(5),
            enabled: true,
            scripts_dir: PathBuf::from("./scripts"),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Debounced Reconciler
pub struct DebouncedReconciler {
    config: ReconcilerConfig,
    runner: Arc<dyn ScriptRunner>,
    /// Current debounce timer; aborted and replaced on every new signal
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Held for the duration of a convergence run: never two concurrent
    run_gate: Arc<Mutex<()>>,
}

impl DebouncedReconciler {
    pub fn new(config: ReconcilerConfig, runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            config,
            runner,
            timer: Mutex::new(None),
            run_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Request a future convergence run. Fire-and-forget: never blocks on
    /// the run itself, never fails.
    pub async fn schedule(&self, reason: &str) {
        if !self.config.enabled {
            info!(reason = %reason, "Auto-reconcile disabled; skipping schedule");
            return;
        }

        let mut timer = self.timer.lock().await;

        // Restart the debounce window
        if let Some(handle) = timer.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }

        let runner = Arc::clone(&self.runner);
        let run_gate = Arc::clone(&self.run_gate);
        let debounce = self.config.debounce;
        let invocation = self.convergence_invocation();

        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // The run itself lives on its own task: aborting a stale timer
            // must never kill an in-flight convergence. The gate serializes
            // runs, so a timer firing mid-run waits for the current one.
            let run = tokio::spawn(run_convergence(runner, run_gate, invocation));
            let _ = run.await;
        }));

        info!(
            debounce_secs = debounce.as_secs_f64(),
            reason = %reason,
            "Scheduled convergence run"
        );
    }

    fn convergence_invocation(&self) -> ScriptInvocation {
        ScriptInvocation {
            program: self
                .config
                .scripts_dir
                .join(OperationKind::Reconcile.script_name()),
            args: Vec::new(),
            working_dir: self.config.scripts_dir.clone(),
            timeout: self.config.timeout,
        }
    }
}

/// Execute the convergence script once, streaming its output to the log.
/// Failures are logged only: there is no caller to report to.
async fn run_convergence(
    runner: Arc<dyn ScriptRunner>,
    run_gate: Arc<Mutex<()>>,
    invocation: ScriptInvocation,
) {
    let _slot = run_gate.lock().await;

    info!(program = %invocation.program.display(), "Running convergence pass");

    match runner.run(invocation, Arc::new(ReconcileLogSink)).await {
        Ok(outcome) if outcome.status == ScriptStatus::Success => {
            info!(
                duration_ms = outcome.duration_ms,
                "Convergence pass completed"
            );
        }
        Ok(outcome) => {
            error!(
                exit_code = ?outcome.exit_code,
                "Convergence script exited with failure"
            );
        }
        Err(e) => {
            error!(error = %e, "Convergence script could not run");
        }
    }
}

/// Streams convergence output into the daemon log
struct ReconcileLogSink;

#[async_trait]
impl OutputSink for ReconcileLogSink {
    async fn emit(&self, line: &str) {
        info!(target: "reconcile", "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::script_runner::mocks::{MockBehavior, MockScriptRunner};

    fn config(debounce_ms: u64, enabled: bool) -> ReconcilerConfig {
        ReconcilerConfig {
            debounce: Duration::from_millis(debounce_ms),
            enabled,
            scripts_dir: PathBuf::from("/tmp/scripts"),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_burst_of_signals_coalesces_into_one_run() {
        let runner = Arc::new(MockScriptRunner::new_success());
        let reconciler = DebouncedReconciler::new(config(50, true), runner.clone());

        for _ in 0..5 {
            reconciler.schedule("cluster declared").await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_signals_separated_by_quiet_period_run_twice() {
        let runner = Arc::new(MockScriptRunner::new_success());
        let reconciler = DebouncedReconciler::new(config(30, true), runner.clone());

        reconciler.schedule("first").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        reconciler.schedule("second").await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_signal_during_inflight_run_queues_follow_up() {
        // Convergence takes 100ms; a signal arriving mid-run must produce
        // a second run after the first, never a dropped or concurrent one.
        let runner =
            Arc::new(MockScriptRunner::new_success().with_delay(Duration::from_millis(100)));
        let reconciler = DebouncedReconciler::new(config(20, true), runner.clone());

        reconciler.schedule("first").await;
        tokio::time::sleep(Duration::from_millis(50)).await; // first run in flight
        reconciler.schedule("second").await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_disabled_reconciler_never_runs() {
        let runner = Arc::new(MockScriptRunner::new_success());
        let reconciler = DebouncedReconciler::new(config(10, false), runner.clone());

        reconciler.schedule("ignored").await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_prevent_future_runs() {
        let runner = Arc::new(MockScriptRunner::new(MockBehavior::SpawnError(
            "missing script".to_string(),
        )));
        let reconciler = DebouncedReconciler::new(config(20, true), runner.clone());

        reconciler.schedule("first").await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        runner.set_behavior(MockBehavior::Succeed(vec![]));
        reconciler.schedule("second").await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_script_invoked_with_no_arguments() {
        let runner = Arc::new(MockScriptRunner::new_success());
        let reconciler = DebouncedReconciler::new(config(10, true), runner.clone());

        reconciler.schedule("check invocation").await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 1);
        assert!(invocations[0].program.ends_with("reconcile.sh"));
        assert!(invocations[0].args.is_empty());
    }
}
