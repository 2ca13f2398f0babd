//! Common traits and types for the generation job queue

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

use crate::error::Result;

/// A job accepted by the queue
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
    pub submitted_at: Instant,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            submitted_at: Instant::now(),
        }
    }
}

/// Status of a job as reported by one poll
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Not finished yet (or not visible in the history yet)
    Pending,
    /// Finished; carries the reference of the first output artifact
    Completed { artifact_reference: String },
    /// The queue reported an error; carries its status payload
    Failed { status: Value },
}

/// Output of a successfully completed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Path of the artifact relative to the backend output directory
    pub artifact_reference: String,
}

/// Trait for asynchronous generation job queues
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue a job specification, returning the id assigned by the queue.
    /// Failures surface as `AppError::Submission`.
    async fn submit(&self, job_spec: &Value) -> Result<String>;

    /// Fetch the current status of a job.
    /// Failures surface as `AppError::PollTransport`.
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus>;
}
