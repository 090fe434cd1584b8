//! Synchronous checks run before any network call.
//!
//! Validation failures are never retried.

use chat_types::{Attachment, AttachmentUpload, ChatError};

/// Default attachment size limit (10 MiB).
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

/// Reject messages with no text (after trimming) and no attachment.
pub fn validate_outgoing(content: &str, attachment: Option<&Attachment>) -> Result<(), ChatError> {
    if content.trim().is_empty() && attachment.is_none() {
        return Err(ChatError::EmptyMessage);
    }
    Ok(())
}

/// Size and type limits for uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRules {
    /// Largest accepted file.
    pub max_size_bytes: usize,
    /// Accepted MIME types; `type/*` matches a whole family.
    pub allowed_types: Vec<String>,
}

impl Default for AttachmentRules {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            allowed_types: vec!["image/*".to_string(), "application/pdf".to_string()],
        }
    }
}

impl AttachmentRules {
    /// Check an upload against the limits.
    pub fn check(&self, upload: &AttachmentUpload) -> Result<(), ChatError> {
        if upload.bytes.is_empty() {
            return Err(ChatError::InvalidAttachment(format!(
                "{} is empty",
                upload.file_name
            )));
        }
        if upload.bytes.len() > self.max_size_bytes {
            return Err(ChatError::InvalidAttachment(format!(
                "{} is {} bytes (limit: {} bytes)",
                upload.file_name,
                upload.bytes.len(),
                self.max_size_bytes
            )));
        }
        if !self.allows_type(&upload.content_type) {
            return Err(ChatError::InvalidAttachment(format!(
                "type {} is not allowed",
                upload.content_type
            )));
        }
        Ok(())
    }

    /// Whether a MIME type is accepted.
    pub fn allows_type(&self, content_type: &str) -> bool {
        let content_type = content_type.to_ascii_lowercase();
        self.allowed_types.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            match pattern.strip_suffix("/*") {
                Some(family) => content_type
                    .split_once('/')
                    .is_some_and(|(f, _)| f == family),
                None => pattern == content_type,
            }
        })
    }
}
