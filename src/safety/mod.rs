//! Content-safety classification of generated images

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SafetyConfig;
use crate::error::{AppError, Result};
use crate::response::base64;

/// Verdict for one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub concept: String,
    pub has_nsfw_concept: bool,
}

/// Trait for safety classifiers
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    async fn classify(&self, image: &[u8]) -> Result<Classification>;
}

/// Classifier used when safety checking is switched off
#[derive(Debug, Default, Clone)]
pub struct PassthroughClassifier;

#[async_trait]
impl SafetyClassifier for PassthroughClassifier {
    async fn classify(&self, _image: &[u8]) -> Result<Classification> {
        Ok(Classification {
            concept: String::new(),
            has_nsfw_concept: false,
        })
    }
}

#[derive(Serialize)]
struct ClassifyRequest {
    image: String,
}

/// Classifier served by an external HTTP endpoint
pub struct HttpSafetyClassifier {
    client: Client,
    endpoint: String,
}

impl HttpSafetyClassifier {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SafetyClassifier for HttpSafetyClassifier {
    async fn classify(&self, image: &[u8]) -> Result<Classification> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ClassifyRequest {
                image: base64::encode(image),
            })
            .send()
            .await
            .map_err(|e| AppError::Classification(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Classification(format!(
                "classifier returned {}",
                response.status()
            )));
        }

        response
            .json::<Classification>()
            .await
            .map_err(|e| AppError::Classification(format!("Failed to parse verdict: {}", e)))
    }
}

/// Build the classifier selected by configuration
pub fn from_config(config: &SafetyConfig) -> Result<Arc<dyn SafetyClassifier>> {
    match (config.enabled, config.endpoint.as_deref()) {
        (true, Some(endpoint)) => Ok(Arc::new(HttpSafetyClassifier::new(endpoint)?)),
        (true, None) => Err(AppError::Config(config::ConfigError::Message(
            "safety.endpoint is required when safety is enabled".to_string(),
        ))),
        (false, _) => Ok(Arc::new(PassthroughClassifier)),
    }
}
