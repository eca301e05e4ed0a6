//! Bounded subprocess execution with combined output capture.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error as ThisError;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::command::Invocation;

/// Exit code produced by `timeout(1)` when its deadline is reached.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// How a run ended, after applying the exit-code policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Exit code 0.
    Success,
    /// The wall-clock budget expired, or the process exited with the
    /// conventional timeout-wrapper code 124. The partial output is kept
    /// and treated as valid.
    ToleratedTimeout,
    /// Any other non-zero exit, with the code.
    Failed(i32),
}

/// Captured result of one subprocess run.
#[derive(Debug)]
pub struct AnalysisOutput {
    /// stdout and stderr combined into one blob.
    pub text: String,
    pub status: RunStatus,
}

#[derive(ThisError, Debug)]
pub enum RunnerError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to capture output of {program}: {source}")]
    Capture {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run the invocation within `budget`, capturing stdout and stderr.
///
/// A run over budget is killed; whatever output it produced so far is
/// returned with [`RunStatus::ToleratedTimeout`].
pub async fn run(invocation: &Invocation, budget: Duration) -> Result<AnalysisOutput, RunnerError> {
    tracing::debug!(
        program = %invocation.program,
        args = ?invocation.args,
        "Launching analysis subprocess"
    );

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RunnerError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

    // Drain both pipes concurrently with the wait; a chatty process can
    // otherwise fill a pipe buffer and stall before it ever exits.
    let mut stdout = child.stdout.take().expect("stdout was piped");
    let mut stderr = child.stderr.take().expect("stderr was piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await.map(|_| buf)
    });

    let status = match tokio::time::timeout(budget, child.wait()).await {
        Ok(Ok(status)) => match status.code() {
            Some(0) => RunStatus::Success,
            Some(TIMEOUT_EXIT_CODE) => RunStatus::ToleratedTimeout,
            Some(code) => RunStatus::Failed(code),
            // Killed by a signal; no code to report
            None => RunStatus::Failed(-1),
        },
        Ok(Err(source)) => {
            return Err(RunnerError::Capture {
                program: invocation.program.clone(),
                source,
            });
        }
        Err(_) => {
            tracing::warn!(
                program = %invocation.program,
                budget = ?budget,
                "Analysis over budget, killing subprocess"
            );
            let _ = child.start_kill();
            let _ = child.wait().await;
            RunStatus::ToleratedTimeout
        }
    };

    // The kill above forces EOF on both pipes, so these always finish
    let stdout_buf = join_capture(stdout_task, &invocation.program).await?;
    let stderr_buf = join_capture(stderr_task, &invocation.program).await?;

    let mut text = String::from_utf8_lossy(&stdout_buf).into_owned();
    text.push_str(&String::from_utf8_lossy(&stderr_buf));

    match status {
        RunStatus::Success => {
            tracing::debug!(program = %invocation.program, bytes = text.len(), "Analysis subprocess finished")
        }
        RunStatus::ToleratedTimeout => {
            tracing::info!(program = %invocation.program, bytes = text.len(), "Analysis timed out, keeping partial output")
        }
        RunStatus::Failed(code) => {
            tracing::warn!(program = %invocation.program, code, "Analysis subprocess exited non-zero")
        }
    }

    Ok(AnalysisOutput { text, status })
}

async fn join_capture(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    program: &str,
) -> Result<Vec<u8>, RunnerError> {
    task.await
        .map_err(|e| RunnerError::Capture {
            program: program.to_string(),
            source: std::io::Error::other(e),
        })?
        .map_err(|source| RunnerError::Capture {
            program: program.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Invocation {
        Invocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[tokio::test]
    async fn captures_combined_output_on_success() {
        let output = run(&shell("echo to-stdout; echo to-stderr 1>&2"), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output.status, RunStatus::Success);
        assert!(output.text.contains("to-stdout"));
        assert!(output.text.contains("to-stderr"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_the_code() {
        let output = run(&shell("echo diagnostics; exit 7"), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output.status, RunStatus::Failed(7));
        // Output is retained for diagnostics even on failure
        assert!(output.text.contains("diagnostics"));
    }

    #[tokio::test]
    async fn exit_code_124_is_a_tolerated_timeout() {
        let output = run(&shell("echo partial; exit 124"), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output.status, RunStatus::ToleratedTimeout);
        assert!(output.text.contains("partial"));
    }

    #[tokio::test]
    async fn over_budget_run_is_killed_and_keeps_partial_output() {
        let output = run(
            &shell("echo early; exec sleep 30"),
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        assert_eq!(output.status, RunStatus::ToleratedTimeout);
        assert!(output.text.contains("early"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let invocation = Invocation {
            program: "definitely-not-a-real-binary".to_string(),
            args: vec![],
        };

        let err = run(&invocation, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }
}
