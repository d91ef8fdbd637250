// Process runner implementation
// Spawns one child per invocation and streams its combined output

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use corral_core::port::{
    OutputSink, ScriptError, ScriptInvocation, ScriptOutcome, ScriptRunner, ScriptStatus,
    TimeProvider,
};

/// Capacity of the line channel between the drain tasks and the delivery
/// loop; a slow sink backpressures the drains rather than dropping lines.
const LINE_CHANNEL_CAPACITY: usize = 64;

/// Script runner backed by tokio::process
///
/// stdout and stderr are drained concurrently into one line stream so the
/// caller observes the combined output in arrival order. The timeout is
/// per read: a child that goes silent for the whole window is killed.
pub struct ProcessRunner {
    time_provider: Arc<dyn TimeProvider>,
}

impl ProcessRunner {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self { time_provider }
    }
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: ScriptInvocation,
        sink: Arc<dyn OutputSink>,
    ) -> Result<ScriptOutcome, ScriptError> {
        let started_at = self.time_provider.now_millis();

        info!(
            program = %invocation.program.display(),
            args = ?invocation.args,
            working_dir = %invocation.working_dir.display(),
            timeout_secs = invocation.timeout.as_secs_f64(),
            "Starting script execution"
        );

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScriptError::SpawnFailed(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScriptError::Io("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ScriptError::Io("stderr not captured".to_string()))?;

        let (tx, mut rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
        tokio::spawn(drain_lines(stdout, tx.clone()));
        tokio::spawn(drain_lines(stderr, tx));

        // Deliver lines as they arrive; the channel closes when both
        // streams hit EOF.
        loop {
            match timeout(invocation.timeout, rx.recv()).await {
                Ok(Some(line)) => sink.emit(&line).await,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        program = %invocation.program.display(),
                        timeout_secs = invocation.timeout.as_secs_f64(),
                        "No output within timeout window, killing process"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Could not kill timed-out process");
                    }
                    return Err(ScriptError::Timeout(invocation.timeout));
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ScriptError::Io(e.to_string()))?;

        let duration_ms = self.time_provider.now_millis() - started_at;
        let outcome = ScriptOutcome {
            status: if status.success() {
                ScriptStatus::Success
            } else {
                ScriptStatus::Failed
            },
            exit_code: status.code(),
            duration_ms,
        };

        info!(
            program = %invocation.program.display(),
            exit_code = ?outcome.exit_code,
            duration_ms = outcome.duration_ms,
            "Script execution completed"
        );

        Ok(outcome)
    }
}

/// Read one stream line-by-line into the shared channel, replacing
/// undecodable bytes rather than failing.
async fn drain_lines<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Error reading script output");
                break;
            }
        }
    }
}
