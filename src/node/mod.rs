//! Node module - Shared state, load accounting and liveness reporting

pub mod liveness;
pub mod load;
pub mod state;

pub use liveness::{HttpRegistry, LivenessReporter, Registry};
pub use load::{LoadAccountant, LoadSnapshot, RequestSample};
pub use state::NodeState;
