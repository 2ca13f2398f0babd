//! Request lifecycle: validate, run the job, classify, account, announce

pub mod params;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backend::workflow::{build_workflow, JobParams};
use crate::backend::JobPoller;
use crate::config::WorkflowConfig;
use crate::error::Result;
use crate::node::{LivenessReporter, NodeState};
use crate::response::{base64, ArtifactStore};
use crate::safety::SafetyClassifier;

pub use params::GenerationParams;

/// Largest seed drawn for requests without one (fits a JSON double exactly)
const MAX_RANDOM_SEED: u64 = (1 << 53) - 1;

/// Successful generation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Base64 encoded image bytes
    pub image: String,
    pub has_nsfw_concept: bool,
    pub concept: String,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub prompt: String,
}

/// Single entry point for generation requests.
///
/// Requests are processed one at a time. While one is processed the node is
/// "in flight"; every processed request, successful or not, is recorded in
/// the load accountant and followed by a liveness announcement.
pub struct RequestOrchestrator {
    state: Arc<NodeState>,
    poller: JobPoller,
    artifacts: ArtifactStore,
    classifier: Arc<dyn SafetyClassifier>,
    liveness: Arc<LivenessReporter>,
    workflow: WorkflowConfig,
    processing: Mutex<()>,
}

impl RequestOrchestrator {
    pub fn new(
        state: Arc<NodeState>,
        poller: JobPoller,
        artifacts: ArtifactStore,
        classifier: Arc<dyn SafetyClassifier>,
        liveness: Arc<LivenessReporter>,
        workflow: WorkflowConfig,
    ) -> Self {
        Self {
            state,
            poller,
            artifacts,
            classifier,
            liveness,
            workflow,
            processing: Mutex::new(()),
        }
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    /// Handle one raw request body
    pub async fn handle(&self, body: &[u8]) -> Result<GenerationResponse> {
        let params = GenerationParams::from_slice(body).map_err(|e| {
            warn!(error = %e, "Rejected generation payload");
            e
        })?;

        let _turn = self.processing.lock().await;
        let cycle = InFlightCycle::begin(&self.state, &self.liveness);

        let result = self.generate(&params).await;
        cycle.finish().await;

        if let Err(e) = &result {
            error!(
                error = %e,
                prompt = %params.prompt,
                width = params.width,
                height = params.height,
                steps = params.steps,
                "Generation request failed"
            );
        }
        result
    }

    async fn generate(&self, params: &GenerationParams) -> Result<GenerationResponse> {
        let seed = params.seed.unwrap_or_else(random_seed);
        info!(
            prompt = %params.prompt,
            width = params.width,
            height = params.height,
            seed,
            random_seed = params.seed.is_none(),
            steps = params.steps,
            "Submitting generation job"
        );

        let job_spec = build_workflow(
            &JobParams {
                prompt: &params.prompt,
                width: params.width,
                height: params.height,
                seed,
                steps: params.steps,
            },
            &self.workflow,
        );

        let handle = self.poller.submit(&job_spec).await?;
        let output = self.poller.await_completion(&handle).await?;
        let image = self.artifacts.read(&output.artifact_reference).await?;

        let check_started = Instant::now();
        let verdict = self.classifier.classify(&image).await?;
        info!(
            elapsed_ms = check_started.elapsed().as_millis() as u64,
            has_nsfw_concept = verdict.has_nsfw_concept,
            "Safety check finished"
        );

        Ok(GenerationResponse {
            image: base64::encode(&image),
            has_nsfw_concept: verdict.has_nsfw_concept,
            concept: verdict.concept,
            width: params.width,
            height: params.height,
            seed: params.echoed_seed(),
            prompt: params.prompt.clone(),
        })
    }
}

fn random_seed() -> u64 {
    rand::thread_rng().gen_range(1..=MAX_RANDOM_SEED)
}

/// Marks the node in flight for the lifetime of one request.
///
/// `finish` records the timing, announces and clears the flag. If the request
/// future is dropped first, `Drop` completes whatever is left and hands the
/// announcement to a background task.
struct InFlightCycle<'a> {
    state: &'a NodeState,
    liveness: &'a Arc<LivenessReporter>,
    started: Instant,
    recorded: bool,
    announced: bool,
}

impl<'a> InFlightCycle<'a> {
    fn begin(state: &'a NodeState, liveness: &'a Arc<LivenessReporter>) -> Self {
        state.set_in_flight(true);
        Self {
            state,
            liveness,
            started: Instant::now(),
            recorded: false,
            announced: false,
        }
    }

    fn record(&mut self) {
        let duration = self.started.elapsed();
        let load = self.state.load();
        load.record_completion(self.started, duration);
        self.recorded = true;

        info!(
            elapsed_ms = duration.as_millis() as u64,
            request_count = load.request_count(),
            percent_busy_since_start = load.percent_busy_since_start(),
            current_load = load.current_load(),
            "Request finished"
        );
    }

    async fn finish(mut self) {
        self.record();
        self.liveness.announce_now().await;
        self.announced = true;
    }
}

impl Drop for InFlightCycle<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.record();
        }
        if !self.announced {
            let liveness = self.liveness.clone();
            tokio::spawn(async move { liveness.announce_now().await });
        }
        self.state.set_in_flight(false);
    }
}
