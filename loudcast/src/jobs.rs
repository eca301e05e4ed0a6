//! Supervised background analysis jobs.
//!
//! Each upload dispatches exactly one job. The job body runs the
//! subprocess and reduces its output; a supervisor converts a panic in
//! the body into a `Failed` outcome, so every dispatched job publishes
//! exactly one outcome. Server shutdown cancels in-flight jobs through
//! the shared token.

use std::path::PathBuf;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::analysis::command::Invocation;
use crate::analysis::runner::RunStatus;
use crate::analysis::{filter, runner};
use crate::notify::{AnalysisOutcome, Notifier};

/// One unit of background work: analyze a stored upload.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub file: PathBuf,
    pub invocation: Invocation,
}

/// Spawns and supervises analysis jobs.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    notifier: Notifier,
    budget: Duration,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(notifier: Notifier, budget: Duration, shutdown: CancellationToken) -> Self {
        Self {
            notifier,
            budget,
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    /// Launch a job without waiting for it.
    ///
    /// The returned handle resolves once the job's outcome has been
    /// published (or the job was cancelled by shutdown); callers are free
    /// to drop it.
    pub fn dispatch(&self, job: AnalysisJob) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        let budget = self.budget;
        let shutdown = self.shutdown.clone();

        self.tasks.spawn(async move {
            let file = job.file.clone();

            // The body runs in its own task so a panic surfaces at the
            // join instead of tearing the supervisor down with it.
            let worker = tokio::spawn(run_job(job, budget));
            let abort = worker.abort_handle();

            let outcome = tokio::select! {
                joined = worker => match joined {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_panic() => {
                        tracing::error!(file = %file.display(), "Analysis job panicked");
                        AnalysisOutcome::Failed {
                            reason: "analysis job panicked".to_string(),
                        }
                    }
                    // Runtime teardown aborted the body underneath us
                    Err(_) => return,
                },
                _ = shutdown.cancelled() => {
                    abort.abort();
                    tracing::info!(file = %file.display(), "Analysis job cancelled by shutdown");
                    return;
                }
            };

            match &outcome {
                AnalysisOutcome::Completed { summary } => {
                    tracing::info!(file = %file.display(), summary_bytes = summary.len(), "Analysis finished");
                }
                AnalysisOutcome::Failed { reason } => {
                    tracing::warn!(file = %file.display(), reason = %reason, "Analysis failed");
                }
            }
            notifier.publish(outcome);
        })
    }

    /// Cancel in-flight jobs and wait for their supervisors to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

async fn run_job(job: AnalysisJob, budget: Duration) -> AnalysisOutcome {
    match runner::run(&job.invocation, budget).await {
        Ok(output) => match output.status {
            RunStatus::Success | RunStatus::ToleratedTimeout => AnalysisOutcome::Completed {
                summary: filter::summary(&output.text),
            },
            RunStatus::Failed(code) => {
                tracing::warn!(
                    file = %job.file.display(),
                    code,
                    output = %output.text,
                    "Analysis subprocess failed"
                );
                AnalysisOutcome::Failed {
                    reason: format!("analysis exited with code {code}"),
                }
            }
        },
        Err(e) => {
            tracing::error!(file = %job.file.display(), error = %e, "Could not run analysis");
            AnalysisOutcome::Failed { reason: e.to_string() }
        }
    }
}
