//! Reads generated images from the backend output directory

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{AppError, Result};

/// Read-only view of the directory the job queue writes outputs to
pub struct ArtifactStore {
    output_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Resolve a backend-assigned reference inside the output directory
    pub fn resolve(&self, reference: &str) -> Result<PathBuf> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

        if reference.is_empty() || escapes {
            return Err(AppError::ArtifactMissing(format!(
                "refusing artifact reference '{}'",
                reference
            )));
        }

        Ok(self.output_dir.join(relative))
    }

    /// Read the artifact bytes
    pub async fn read(&self, reference: &str) -> Result<Vec<u8>> {
        let path = self.resolve(reference)?;

        let data = fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => AppError::ArtifactMissing(path.display().to_string()),
            _ => AppError::Io(e),
        })?;

        debug!(
            path = ?path,
            size = data.len(),
            format = detect_image_format(&data).unwrap_or("unknown"),
            "Read generated image"
        );

        Ok(data)
    }
}

/// Detect image format from binary data using magic bytes
pub fn detect_image_format(data: &[u8]) -> Option<&'static str> {
    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    if data.starts_with(PNG) {
        Some("png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}
