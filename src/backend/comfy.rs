//! HTTP client for a ComfyUI-style prompt queue

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::traits::{JobQueue, JobStatus};
use crate::config::BackendConfig;
use crate::error::{AppError, Result};

/// Job queue reached over HTTP (`POST /prompt`, `GET /history/{id}`)
pub struct ComfyJobQueue {
    base_url: String,
    client: Client,
    client_id: Uuid,
}

#[derive(Debug, Serialize)]
struct QueuePromptRequest<'a> {
    prompt: &'a Value,
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct QueuePromptResponse {
    prompt_id: String,
    #[serde(default)]
    number: Option<u64>,
}

impl ComfyJobQueue {
    /// Create a new queue client from configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            client_id: Uuid::new_v4(),
        })
    }
}

#[async_trait]
impl JobQueue for ComfyJobQueue {
    async fn submit(&self, job_spec: &Value) -> Result<String> {
        let url = format!("{}/prompt", self.base_url);
        let body = QueuePromptRequest {
            prompt: job_spec,
            client_id: self.client_id.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Submission(format!("{} unreachable: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %text, "Job queue rejected submission");
            return Err(AppError::Submission(format!(
                "Job queue returned {}: {}",
                status, text
            )));
        }

        let queued: QueuePromptResponse = response
            .json()
            .await
            .map_err(|e| AppError::Submission(format!("Failed to parse response: {}", e)))?;

        debug!(job_id = %queued.prompt_id, position = ?queued.number, "Job queued");
        Ok(queued.prompt_id)
    }

    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus> {
        let url = format!("{}/history/{}", self.base_url, job_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::PollTransport(format!("{} unreachable: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::PollTransport(format!(
                "History endpoint returned {}",
                response.status()
            )));
        }

        let history: Value = response
            .json()
            .await
            .map_err(|e| AppError::PollTransport(format!("Failed to parse history: {}", e)))?;

        parse_history(job_id, &history)
    }
}

/// Interpret a history document for one job
pub fn parse_history(job_id: &str, history: &Value) -> Result<JobStatus> {
    let Some(entry) = history.get(job_id) else {
        return Ok(JobStatus::Pending);
    };

    let status = entry.get("status").cloned().unwrap_or(Value::Null);

    if status.get("completed").and_then(Value::as_bool) == Some(true) {
        let artifact_reference = first_image(entry).ok_or_else(|| {
            AppError::ArtifactMissing(format!("job {} completed without image outputs", job_id))
        })?;
        return Ok(JobStatus::Completed { artifact_reference });
    }

    if status.get("status_str").and_then(Value::as_str) == Some("error") {
        return Ok(JobStatus::Failed { status });
    }

    Ok(JobStatus::Pending)
}

/// Relative path of the first image in the first output node that has one
fn first_image(entry: &Value) -> Option<String> {
    let outputs = entry.get("outputs")?.as_object()?;

    outputs.values().find_map(|node| {
        let image = node.get("images")?.as_array()?.first()?;
        let filename = image.get("filename")?.as_str()?;
        match image.get("subfolder").and_then(Value::as_str) {
            Some(subfolder) if !subfolder.is_empty() => Some(format!("{}/{}", subfolder, filename)),
            _ => Some(filename.to_string()),
        }
    })
}
