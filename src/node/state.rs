//! Process-wide node state shared by the orchestrator and the liveness task

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::LoadConfig;
use crate::node::load::LoadAccountant;

/// In-flight flag plus load accounting.
///
/// Written only on the orchestrator's request path, read by the liveness loop.
pub struct NodeState {
    in_flight: AtomicBool,
    load: LoadAccountant,
    started_at: DateTime<Utc>,
}

impl NodeState {
    pub fn new(config: &LoadConfig) -> Self {
        Self::with_windows(
            Duration::from_secs(config.window_secs),
            Duration::from_secs(config.recent_threshold_secs),
        )
    }

    pub fn with_windows(window: Duration, recent_threshold: Duration) -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            load: LoadAccountant::new(window, recent_threshold),
            started_at: Utc::now(),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::Release);
    }

    pub fn load(&self) -> &LoadAccountant {
        &self.load
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::with_windows(Duration::from_secs(60), Duration::from_secs(120))
    }
}
