//! Attachment resolution.
//!
//! Attachments arrive as `{name, url}` pairs where `url` is normally an inline
//! `data:` URI. Each one is decoded independently; a malformed attachment is
//! logged and skipped so the rest of the task can still proceed.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::TaskError;
use crate::task::AttachmentRef;

/// Coarse content classification used when building the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Csv,
    Markdown,
    Json,
    Text,
    Image,
    Binary,
    /// Non-inline http(s) reference, passed to the model as-is
    Link,
}

impl AttachmentKind {
    /// Whether the content can be shown to the model as text.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            AttachmentKind::Csv | AttachmentKind::Markdown | AttachmentKind::Json | AttachmentKind::Text
        )
    }

    fn from_media_type(media_type: &str) -> Option<Self> {
        let media_type = media_type.trim().to_ascii_lowercase();
        let kind = match media_type.as_str() {
            "text/csv" | "application/csv" => AttachmentKind::Csv,
            "text/markdown" | "text/x-markdown" => AttachmentKind::Markdown,
            "application/json" | "text/json" => AttachmentKind::Json,
            t if t.starts_with("image/") => AttachmentKind::Image,
            t if t.starts_with("text/") => AttachmentKind::Text,
            "application/xml" | "application/javascript" => AttachmentKind::Text,
            "" | "application/octet-stream" => return None,
            _ => AttachmentKind::Binary,
        };
        Some(kind)
    }

    fn from_file_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        let kind = match ext.as_str() {
            "csv" => AttachmentKind::Csv,
            "md" | "markdown" => AttachmentKind::Markdown,
            "json" => AttachmentKind::Json,
            "txt" | "html" | "css" | "js" | "xml" | "svg" | "tsv" => AttachmentKind::Text,
            "png" | "jpg" | "jpeg" | "gif" | "webp" => AttachmentKind::Image,
            _ => return None,
        };
        Some(kind)
    }
}

/// A decoded attachment, alive for one run only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    pub name: String,
    pub media_type: String,
    pub kind: AttachmentKind,
    pub content: Vec<u8>,
}

impl ResolvedAttachment {
    /// Lossy UTF-8 view of the content.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Lazily resolve attachments, dropping (and logging) the ones that fail.
pub fn resolve_attachments(
    attachments: &[AttachmentRef],
) -> impl Iterator<Item = ResolvedAttachment> + '_ {
    attachments.iter().filter_map(|attachment| match resolve(attachment) {
        Ok(resolved) => Some(resolved),
        Err(e) => {
            tracing::warn!("Dropping attachment: {}", e);
            None
        }
    })
}

/// Resolve one attachment.
///
/// # Errors
/// `TaskError::AttachmentDecode` when the URL is neither a well-formed data
/// URI nor an http(s) link.
pub fn resolve(attachment: &AttachmentRef) -> Result<ResolvedAttachment, TaskError> {
    let decode_error = |reason: String| TaskError::AttachmentDecode {
        name: attachment.name.clone(),
        reason,
    };

    let url = attachment.url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(ResolvedAttachment {
            name: attachment.name.clone(),
            media_type: String::new(),
            kind: AttachmentKind::Link,
            content: url.as_bytes().to_vec(),
        });
    }

    let (media_type, content) = decode_data_uri(url).map_err(decode_error)?;
    let kind = AttachmentKind::from_media_type(&media_type)
        .or_else(|| AttachmentKind::from_file_name(&attachment.name))
        .unwrap_or(AttachmentKind::Binary);

    Ok(ResolvedAttachment {
        name: attachment.name.clone(),
        media_type,
        kind,
        content,
    })
}

/// Decode `data:[<media type>][;param=value]*[;base64],<data>`.
///
/// Returns the bare media type (parameters stripped) and the payload bytes.
fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>), String> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| "not a data URI".to_string())?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| "data URI has no ',' separator".to_string())?;

    let mut params = header.split(';');
    let media_type = params.next().unwrap_or("").trim().to_string();
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let content = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        BASE64
            .decode(compact.as_bytes())
            .map_err(|e| format!("invalid base64 payload: {}", e))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };

    Ok((media_type, content))
}
