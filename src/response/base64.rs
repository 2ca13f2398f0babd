//! Base64 encoding of generated images

use base64::{engine::general_purpose::STANDARD, Engine};

/// Encode binary data to a standard, padded base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}
