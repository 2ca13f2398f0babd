//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    pub liveness: LivenessConfig,
    pub load: LoadConfig,
    pub safety: SafetyConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5002
}

/// Job queue backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Overall deadline for one job; 0 waits forever
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8188".to_string()
}

fn default_output_dir() -> String {
    match std::env::var("HOME") {
        Ok(home) => Path::new(&home)
            .join("ComfyUI")
            .join("output")
            .to_string_lossy()
            .to_string(),
        Err(_) => "./output".to_string(),
    }
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_poll_timeout() -> u64 {
    600
}

fn default_request_timeout() -> u64 {
    30000
}

impl BackendConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_deadline(&self) -> Option<Duration> {
        (self.poll_timeout_secs > 0).then(|| Duration::from_secs(self.poll_timeout_secs))
    }
}

/// Model files and sampler settings embedded in every submitted job
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_unet")]
    pub unet_name: String,
    #[serde(default = "default_weight_dtype")]
    pub weight_dtype: String,
    #[serde(default = "default_clip1")]
    pub clip_name1: String,
    #[serde(default = "default_clip2")]
    pub clip_name2: String,
    #[serde(default = "default_clip_type")]
    pub clip_type: String,
    #[serde(default = "default_vae")]
    pub vae_name: String,
    #[serde(default = "default_sampler")]
    pub sampler_name: String,
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
    #[serde(default = "default_cfg")]
    pub cfg: f64,
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,
}

fn default_unet() -> String {
    "flux1-schnell-fp8-e4m3fn.safetensors".to_string()
}

fn default_weight_dtype() -> String {
    "fp8_e4m3fn".to_string()
}

fn default_clip1() -> String {
    "t5xxl_fp8_e4m3fn.safetensors".to_string()
}

fn default_clip2() -> String {
    "ViT-L-14-TEXT-detail-improved-hiT-GmP-TE-only-HF.safetensors".to_string()
}

fn default_clip_type() -> String {
    "flux".to_string()
}

fn default_vae() -> String {
    "ae.safetensors".to_string()
}

fn default_sampler() -> String {
    "euler".to_string()
}

fn default_scheduler() -> String {
    "simple".to_string()
}

fn default_cfg() -> f64 {
    1.0
}

fn default_filename_prefix() -> String {
    "ComfyUI".to_string()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            unet_name: default_unet(),
            weight_dtype: default_weight_dtype(),
            clip_name1: default_clip1(),
            clip_name2: default_clip2(),
            clip_type: default_clip_type(),
            vae_name: default_vae(),
            sampler_name: default_sampler(),
            scheduler: default_scheduler(),
            cfg: default_cfg(),
            filename_prefix: default_filename_prefix(),
        }
    }
}

/// Liveness announcement configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LivenessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    #[serde(default = "default_ip_discovery_url")]
    pub ip_discovery_url: String,
    #[serde(default = "default_liveness_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Port advertised to the registry; the listening port when unset
    #[serde(default)]
    pub advertised_port: Option<u16>,
}

fn default_true() -> bool {
    true
}

fn default_registry_url() -> String {
    "https://image.pollinations.ai/register".to_string()
}

fn default_ip_discovery_url() -> String {
    "https://api.ipify.org".to_string()
}

fn default_liveness_interval() -> u64 {
    30
}

fn default_scheme() -> String {
    "http".to_string()
}

/// Load accounting windows
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoadConfig {
    #[serde(default = "default_window")]
    pub window_secs: u64,
    #[serde(default = "default_recent_threshold")]
    pub recent_threshold_secs: u64,
}

fn default_window() -> u64 {
    60
}

fn default_recent_threshold() -> u64 {
    120
}

/// Safety classifier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("backend.url", default_backend_url())?
            .set_default("backend.output_dir", default_output_dir())?
            .set_default("liveness.enabled", true)?
            .set_default("load.window_secs", default_window())?
            .set_default("safety.enabled", false)?
            .set_default("logging.level", default_log_level())?
            // Load from configuration file
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with GEN_WORKER__)
            .add_source(
                Environment::with_prefix("GEN_WORKER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            // Flat variables understood by existing deployments
            .set_override_option("server.port", std::env::var("PORT").ok())?
            .set_override_option("backend.output_dir", std::env::var("OUTPUT_DIR").ok())?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }
        if self.backend.poll_interval_ms == 0 {
            return Err(invalid("backend.poll_interval_ms must be positive"));
        }
        if self.liveness.interval_secs == 0 {
            return Err(invalid("liveness.interval_secs must be positive"));
        }
        if self.load.window_secs == 0 {
            return Err(invalid("load.window_secs must be positive"));
        }
        if !["http", "https"].contains(&self.liveness.scheme.as_str()) {
            return Err(invalid(&format!(
                "liveness.scheme '{}' must be 'http' or 'https'",
                self.liveness.scheme
            )));
        }
        if self.safety.enabled && self.safety.endpoint.is_none() {
            return Err(invalid("safety.endpoint is required when safety is enabled"));
        }

        Ok(())
    }

    /// Port announced to the registry
    pub fn advertised_port(&self) -> u16 {
        self.liveness.advertised_port.unwrap_or(self.server.port)
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
            backend: BackendConfig {
                url: default_backend_url(),
                output_dir: default_output_dir(),
                poll_interval_ms: default_poll_interval(),
                poll_timeout_secs: default_poll_timeout(),
                request_timeout_ms: default_request_timeout(),
            },
            workflow: WorkflowConfig::default(),
            liveness: LivenessConfig {
                enabled: true,
                registry_url: default_registry_url(),
                ip_discovery_url: default_ip_discovery_url(),
                interval_secs: default_liveness_interval(),
                scheme: default_scheme(),
                advertised_port: None,
            },
            load: LoadConfig {
                window_secs: default_window(),
                recent_threshold_secs: default_recent_threshold(),
            },
            safety: SafetyConfig {
                enabled: false,
                endpoint: None,
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
        }
    }
}
