//! Submit-and-poll driver for a single generation job

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::backend::traits::{GenerationResult, JobHandle, JobQueue, JobStatus};
use crate::error::{AppError, Result};

/// Drives one job from submission to a terminal state.
///
/// A job is `Pending` until a poll reports it completed or failed. Polls run
/// at a fixed interval with no backoff; a failed poll is terminal and is not
/// retried. The optional deadline bounds the whole wait.
pub struct JobPoller {
    queue: Arc<dyn JobQueue>,
    poll_interval: Duration,
    deadline: Option<Duration>,
}

impl JobPoller {
    /// Create a poller with the given interval and no deadline
    pub fn new(queue: Arc<dyn JobQueue>, poll_interval: Duration) -> Self {
        Self {
            queue,
            poll_interval,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Submit one job. No retry: a lost submission is reported to the caller.
    pub async fn submit(&self, job_spec: &Value) -> Result<JobHandle> {
        let job_id = self.queue.submit(job_spec).await.map_err(|e| match e {
            AppError::Submission(_) => e,
            other => AppError::Submission(other.to_string()),
        })?;

        info!(job_id = %job_id, "Job submitted");
        Ok(JobHandle::new(job_id))
    }

    /// Poll until the job completes, fails, a poll errors or the deadline passes
    pub async fn await_completion(&self, handle: &JobHandle) -> Result<GenerationResult> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.poll_until_terminal(handle))
                .await
                .map_err(|_| {
                    error!(job_id = %handle.job_id, deadline_secs = deadline.as_secs(), "Job exceeded deadline");
                    AppError::Timeout(format!(
                        "job {} did not finish within {}s",
                        handle.job_id,
                        deadline.as_secs()
                    ))
                })?,
            None => self.poll_until_terminal(handle).await,
        }
    }

    async fn poll_until_terminal(&self, handle: &JobHandle) -> Result<GenerationResult> {
        let mut poll: u64 = 0;

        loop {
            poll += 1;
            let status = self.queue.fetch_status(&handle.job_id).await.map_err(|e| {
                error!(job_id = %handle.job_id, poll, error = %e, "Status poll failed");
                e
            })?;

            debug!(job_id = %handle.job_id, poll, status = ?status, "Polled job status");

            match status {
                JobStatus::Completed { artifact_reference } => {
                    info!(
                        job_id = %handle.job_id,
                        polls = poll,
                        elapsed_ms = handle.submitted_at.elapsed().as_millis() as u64,
                        artifact = %artifact_reference,
                        "Generation completed"
                    );
                    return Ok(GenerationResult { artifact_reference });
                }
                JobStatus::Failed { status } => {
                    error!(job_id = %handle.job_id, polls = poll, status = %status, "Generation failed");
                    return Err(AppError::Generation(status.to_string()));
                }
                JobStatus::Pending => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}
