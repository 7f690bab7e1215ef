//! Decoding of media attachments sent as base64 in publish requests.

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Largest accepted image, in bytes.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
/// Largest accepted GIF, in bytes.
pub const MAX_ANIMATED_BYTES: usize = 15 * 1024 * 1024;

const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// A decoded media payload.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for MediaAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaAttachment")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl MediaAttachment {
    /// The upload category the X API expects for this type.
    pub fn category(&self) -> &'static str {
        if self.mime_type == "image/gif" {
            "tweet_gif"
        } else {
            "tweet_image"
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

/// Parses a `data:<mime>;base64,<payload>` URL or a bare base64 payload.
///
/// Bare payloads are assumed to be JPEG images. Only images are accepted:
/// video needs the chunked upload flow, which is not supported.
pub fn parse_media(input: &str) -> Result<MediaAttachment, String> {
    let input = input.trim();

    let (mime_type, payload) = match input.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| "data URL has no ',' separator".to_string())?;
            let mut parts = header.split(';');
            let mime_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
            if !parts.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
                return Err("data URL must be base64 encoded".to_string());
            }
            let mime_type = if mime_type.is_empty() {
                DEFAULT_MIME_TYPE.to_string()
            } else {
                mime_type
            };
            (mime_type, payload)
        }
        None => (DEFAULT_MIME_TYPE.to_string(), input),
    };

    if mime_type.starts_with("video/") {
        return Err(format!(
            "video uploads are not supported ('{}'), only images",
            mime_type
        ));
    }
    if !mime_type.starts_with("image/") {
        return Err(format!("unsupported media type '{}'", mime_type));
    }

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let data = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| format!("invalid base64: {}", e))?;

    if data.is_empty() {
        return Err("media payload is empty".to_string());
    }

    let limit = if mime_type == "image/gif" {
        MAX_ANIMATED_BYTES
    } else {
        MAX_IMAGE_BYTES
    };
    if data.len() > limit {
        return Err(format!(
            "media is {} bytes, the limit for {} is {} bytes",
            data.len(),
            mime_type,
            limit
        ));
    }

    Ok(MediaAttachment { mime_type, data })
}
