//! Image payload encoding: file bytes → base64 inline data.
//!
//! The vision endpoint takes images inline in the JSON request body. The
//! bytes are sent exactly as they sit on disk (already JPEG/PNG encoded by
//! the enhancer), so no re-encoding happens here.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use tracing::debug;

/// Base64 image plus its declared MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineImage {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

/// Encode raw image bytes for the request body.
pub fn encode_image(bytes: &[u8], mime_type: &str) -> InlineImage {
    let data = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64", data.len());
    InlineImage {
        mime_type: mime_type.to_string(),
        data,
    }
}
