//! Parsing model output into files.
//!
//! Expected format:
//!
//! ````text
//! FILE: index.html
//! ```html
//! <!DOCTYPE html>...
//! ```
//! ````
//!
//! Headers may be decorated with markdown (`**FILE: x**`, `### FILE: x`).
//! When no `index.html` header is present, the first complete HTML document
//! in the text is taken as the entry point.

use std::sync::LazyLock;

use regex::Regex;

use super::files::{GeneratedFileSet, ENTRY_POINT};

static FILE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t#>*]*FILE:[ \t]*(?P<path>[^\r\n*]+?)[ \t*]*\r?$")
        .expect("file header regex is valid")
});

/// Split a model response into files.
///
/// Sections whose path fails normalization are skipped with a warning.
pub fn parse_response(text: &str) -> GeneratedFileSet {
    let mut files = GeneratedFileSet::new();

    let headers: Vec<_> = FILE_HEADER.captures_iter(text).collect();
    for (i, caps) in headers.iter().enumerate() {
        let (Some(whole), Some(path)) = (caps.get(0), caps.name("path")) else {
            continue;
        };
        let body_end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let body = strip_fence(&text[whole.end()..body_end]);

        if let Err(e) = files.insert(path.as_str(), body) {
            tracing::warn!("Skipping generated file with unusable path: {}", e);
        }
    }

    if !files.has_entry_point() {
        if let Some(html) = extract_html_document(text) {
            // Cannot fail: constant path.
            let _ = files.insert(ENTRY_POINT, html);
        }
    }

    files
}

/// Body of a file section.
///
/// A fenced section ends at the first line that is only a closing fence;
/// anything after it (model commentary) is dropped.
fn strip_fence(section: &str) -> String {
    let trimmed = section.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag line.
    let Some((_, body)) = after_open.split_once('\n') else {
        return String::new();
    };
    let mut kept = Vec::new();
    for line in body.lines() {
        if line.trim_end() == "```" {
            break;
        }
        kept.push(line);
    }
    kept.join("\n").trim_end().to_string()
}

/// First `<!DOCTYPE html>` (or `<html`) through the last `</html>`.
fn extract_html_document(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let start = lower.find("<!doctype html").or_else(|| lower.find("<html"))?;
    let end = lower.rfind("</html>")? + "</html>".len();
    (end > start).then(|| text[start..end].to_string())
}
