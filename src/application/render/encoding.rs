use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Encode a captured document for the JSON response boundary.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
