//! Backend module - Job queue trait, HTTP client, workflow construction and polling

pub mod comfy;
pub mod poller;
pub mod traits;
pub mod workflow;

pub use comfy::ComfyJobQueue;
pub use poller::JobPoller;
pub use traits::{GenerationResult, JobHandle, JobQueue, JobStatus};
