//! Image Generation Worker Node
//!
//! Accepts generation requests, runs them through an asynchronous job queue,
//! checks the results with a safety classifier and keeps a registry informed
//! that the node is alive and how busy it is.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod node;
pub mod orchestrator;
pub mod response;
pub mod safety;

pub use error::{AppError, Result};

use std::sync::Arc;

use backend::{ComfyJobQueue, JobPoller};
use node::{LivenessReporter, NodeState};
use orchestrator::RequestOrchestrator;
use response::ArtifactStore;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub node: Arc<NodeState>,
    pub liveness: Arc<LivenessReporter>,
    pub orchestrator: Arc<RequestOrchestrator>,
}

impl AppState {
    /// Wire every component from settings
    pub fn from_settings(settings: config::Settings) -> Result<Self> {
        let node = Arc::new(NodeState::new(&settings.load));

        let liveness = Arc::new(LivenessReporter::new(
            &settings.liveness,
            settings.advertised_port(),
            node.clone(),
        )?);

        let queue = Arc::new(ComfyJobQueue::new(&settings.backend)?);
        let poller = JobPoller::new(queue, settings.backend.poll_interval())
            .with_deadline(settings.backend.poll_deadline());

        let orchestrator = Arc::new(RequestOrchestrator::new(
            node.clone(),
            poller,
            ArtifactStore::new(&settings.backend.output_dir),
            safety::from_config(&settings.safety)?,
            liveness.clone(),
            settings.workflow.clone(),
        ));

        Ok(Self {
            settings: Arc::new(settings),
            node,
            liveness,
            orchestrator,
        })
    }
}
