//! Response handling module - Base64 encoding and artifact retrieval

pub mod artifact;
pub mod base64;

pub use artifact::ArtifactStore;
