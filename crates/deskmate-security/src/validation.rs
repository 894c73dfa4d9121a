use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use deskmate_common::{Error, ImageAttachment, Result};

const MAX_MESSAGE_CHARS: usize = 4000;
const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const MAX_USER_ID_CHARS: usize = 64;
const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/heic"];

/// Checks applied to chat input before it reaches the agent.
pub struct InputValidator;

impl InputValidator {
    pub fn user_id(raw: &str) -> Result<&str> {
        static PATTERN: std::sync::LazyLock<Option<regex::Regex>> =
            std::sync::LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9_.@\-]+$").ok());

        let user_id = raw.trim();
        let valid_chars = PATTERN.as_ref().is_some_and(|p| p.is_match(user_id));
        if user_id.is_empty() || user_id.chars().count() > MAX_USER_ID_CHARS || !valid_chars {
            return Err(Error::Gateway(format!("invalid user_id: '{raw}'")));
        }
        Ok(user_id)
    }

    /// Trimmed message text. Control characters other than newlines and tabs are dropped.
    pub fn message(raw: &str) -> Result<String> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect();
        if cleaned.is_empty() {
            return Err(Error::Gateway("message must not be empty".into()));
        }
        if cleaned.chars().count() > MAX_MESSAGE_CHARS {
            return Err(Error::Gateway(format!(
                "message is longer than {MAX_MESSAGE_CHARS} characters"
            )));
        }
        Ok(cleaned)
    }

    /// Accepts a `data:` URL or bare base64 (treated as JPEG).
    pub fn image(raw: &str) -> Result<ImageAttachment> {
        let raw = raw.trim();
        let (mime_type, data) = match raw.strip_prefix("data:") {
            Some(rest) => {
                let (mime, data) = rest
                    .split_once(";base64,")
                    .ok_or_else(|| Error::Gateway("image data URL must be base64".into()))?;
                (mime.to_ascii_lowercase(), data)
            }
            None => ("image/jpeg".to_string(), raw),
        };

        if !IMAGE_TYPES.contains(&mime_type.as_str()) {
            return Err(Error::Gateway(format!("unsupported image type: {mime_type}")));
        }
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| Error::Gateway(format!("image is not valid base64: {e}")))?;
        if bytes.is_empty() {
            return Err(Error::Gateway("image is empty".into()));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(Error::Gateway(format!(
                "image is larger than {} MB",
                MAX_IMAGE_BYTES / (1024 * 1024)
            )));
        }

        Ok(ImageAttachment {
            mime_type,
            data: data.to_string(),
        })
    }
}
