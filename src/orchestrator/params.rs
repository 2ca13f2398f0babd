//! Validation and coercion of inbound generation payloads

use serde_json::Value;

use crate::error::{AppError, Result};

pub const DEFAULT_DIMENSION: i64 = 1024;
pub const MIN_DIMENSION: i64 = 32;
pub const DEFAULT_STEPS: i64 = 2;
pub const DEFAULT_PROMPT: &str = "children";

/// Validated generation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationParams {
    pub prompt: String,
    /// At least 32 and a multiple of 8
    pub width: u32,
    /// At least 32 and a multiple of 8
    pub height: u32,
    /// `None` when no positive seed was supplied
    pub seed: Option<u64>,
    pub steps: u32,
}

impl GenerationParams {
    /// Parse a raw request body
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let payload: Value =
            serde_json::from_slice(body).map_err(|e| AppError::PayloadParse(e.to_string()))?;
        Self::from_value(&payload)
    }

    /// Coerce a parsed payload, falling back to defaults field by field
    pub fn from_value(payload: &Value) -> Result<Self> {
        let fields = payload
            .as_object()
            .ok_or_else(|| AppError::PayloadParse("expected a JSON object".to_string()))?;

        let prompt = match fields.get("prompts") {
            Some(Value::Array(prompts)) => match prompts.first() {
                Some(Value::String(prompt)) => prompt.clone(),
                Some(other) => {
                    return Err(AppError::InvalidRequest(format!(
                        "prompts[0] must be a string, got {}",
                        other
                    )))
                }
                None => {
                    return Err(AppError::InvalidRequest(
                        "prompts must contain at least one entry".to_string(),
                    ))
                }
            },
            _ => DEFAULT_PROMPT.to_string(),
        };

        let seed = fields
            .get("seed")
            .and_then(coerce_int)
            .filter(|seed| *seed > 0)
            .map(|seed| seed as u64);

        let steps = fields
            .get("steps")
            .and_then(coerce_int)
            .unwrap_or(DEFAULT_STEPS)
            .clamp(1, u32::MAX as i64) as u32;

        Ok(Self {
            prompt,
            width: dimension(fields.get("width")),
            height: dimension(fields.get("height")),
            seed,
            steps,
        })
    }

    /// Seed as reported back to the client; -1 means "unset"
    pub fn echoed_seed(&self) -> i64 {
        self.seed.map(|seed| seed as i64).unwrap_or(-1)
    }
}

/// Integer conversion with the usual loose rules: integers as-is, finite
/// floats truncated, numeric strings parsed, booleans as 1/0.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Default 1024, floor of 32, then rounded down to a multiple of 8
fn dimension(value: Option<&Value>) -> u32 {
    let raw = value
        .and_then(coerce_int)
        .unwrap_or(DEFAULT_DIMENSION)
        .clamp(MIN_DIMENSION, u32::MAX as i64) as u32;
    raw / 8 * 8
}
