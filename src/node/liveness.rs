//! Liveness announcements to the registry

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::LivenessConfig;
use crate::error::{AppError, Result};
use crate::node::state::NodeState;

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    url: &'a str,
}

/// Address discovery plus the registry the node announces itself to
#[async_trait]
pub trait Registry: Send + Sync {
    /// Externally reachable address of this host
    async fn discover_public_ip(&self) -> Result<IpAddr>;

    /// Register `url` as a live worker
    async fn register(&self, url: &str) -> Result<()>;
}

/// Registry reached over HTTP: a plain-text address service and a JSON
/// `{"url": ...}` registration endpoint
pub struct HttpRegistry {
    client: Client,
    registry_url: String,
    ip_discovery_url: String,
}

impl HttpRegistry {
    pub fn new(config: &LivenessConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            registry_url: config.registry_url.clone(),
            ip_discovery_url: config.ip_discovery_url.clone(),
        })
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn discover_public_ip(&self) -> Result<IpAddr> {
        let response = self
            .client
            .get(&self.ip_discovery_url)
            .send()
            .await
            .map_err(|e| AppError::LivenessAnnounce(format!("address discovery failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::LivenessAnnounce(format!(
                "address discovery returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::LivenessAnnounce(format!("address discovery failed: {}", e)))?;

        body.trim().parse().map_err(|_| {
            AppError::LivenessAnnounce(format!("address discovery returned '{}'", body.trim()))
        })
    }

    async fn register(&self, url: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.registry_url)
            .json(&RegisterRequest { url })
            .send()
            .await
            .map_err(|e| AppError::LivenessAnnounce(format!("registry unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::LivenessAnnounce(format!(
                "registry returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Announces this node's public address to the registry.
///
/// Announcements happen on a fixed timer (skipped while a request is in
/// flight, with no catch-up) and after every handled request. Failures are
/// logged and dropped; the next tick or request is the retry.
pub struct LivenessReporter {
    registry: Arc<dyn Registry>,
    enabled: bool,
    scheme: String,
    port: u16,
    state: Arc<NodeState>,
    last_announcement: parking_lot::RwLock<Option<DateTime<Utc>>>,
    loop_task: RwLock<Option<JoinHandle<()>>>,
}

impl LivenessReporter {
    /// Create a reporter advertising `port` through the HTTP registry
    pub fn new(config: &LivenessConfig, port: u16, state: Arc<NodeState>) -> Result<Self> {
        let registry = Arc::new(HttpRegistry::new(config)?);
        Ok(Self::with_registry(registry, config, port, state))
    }

    pub fn with_registry(
        registry: Arc<dyn Registry>,
        config: &LivenessConfig,
        port: u16,
        state: Arc<NodeState>,
    ) -> Self {
        Self {
            registry,
            enabled: config.enabled,
            scheme: config.scheme.clone(),
            port,
            state,
            last_announcement: parking_lot::RwLock::new(None),
            loop_task: RwLock::new(None),
        }
    }

    /// Time of the last accepted announcement
    pub fn last_announcement(&self) -> Option<DateTime<Utc>> {
        *self.last_announcement.read()
    }

    /// Send one announcement now. Never fails; errors are logged.
    pub async fn announce_now(&self) {
        if !self.enabled {
            debug!("Liveness reporting disabled, skipping announcement");
            return;
        }

        match self.try_announce().await {
            Ok(url) => {
                *self.last_announcement.write() = Some(Utc::now());
                info!(url = %url, "Liveness announcement sent");
            }
            Err(e) => error!(error = %e, "Liveness announcement failed"),
        }
    }

    async fn try_announce(&self) -> Result<String> {
        let ip = self.registry.discover_public_ip().await?;
        let url = advertised_url(&self.scheme, ip, self.port);
        self.registry.register(&url).await?;
        Ok(url)
    }

    /// Start the periodic announcement task
    pub async fn start(self: &Arc<Self>, interval: Duration) {
        let reporter = self.clone();
        let handle = tokio::spawn(async move { reporter.run_loop(interval).await });

        *self.loop_task.write().await = Some(handle);
        info!(interval_secs = interval.as_secs(), "Started liveness reporting task");
    }

    /// Stop the periodic announcement task
    pub async fn stop(&self) {
        if let Some(handle) = self.loop_task.write().await.take() {
            handle.abort();
            info!("Stopped liveness reporting task");
        }
    }

    /// Announce on every tick unless a request is in flight
    pub async fn run_loop(&self, interval: Duration) {
        loop {
            if self.state.is_in_flight() {
                debug!("Request in flight, skipping liveness announcement");
            } else {
                self.announce_now().await;
            }

            tokio::time::sleep(interval).await;
        }
    }
}

/// `<scheme>://<ip>:<port>`, bracketing IPv6 addresses
pub fn advertised_url(scheme: &str, ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}://{}:{}", scheme, v4, port),
        IpAddr::V6(v6) => format!("{}://[{}]:{}", scheme, v6, port),
    }
}
