//! Shared utility functions used across the codebase.

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// everything else maps to `false`, and an unset variable maps to `default`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Truncate `text` to at most `max_chars` characters, appending `marker` when cut.
///
/// Operates on `char` boundaries so multi-byte input never panics.
pub fn truncate_chars(text: &str, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], marker),
        None => text.to_string(),
    }
}

/// Compare two secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a_bytes.len() {
        diff |= a_bytes[i] ^ b_bytes[i];
    }
    diff == 0
}

/// Convert a task identifier into a repository-safe slug.
///
/// Lowercases, maps whitespace to `-`, keeps `[a-z0-9._-]`, collapses runs of
/// `-` and trims separators from both ends.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = false;
    for ch in input.trim().chars().flat_map(|c| c.to_lowercase()) {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' {
            Some(ch)
        } else if ch == '-' || ch.is_whitespace() || ch == '/' {
            Some('-')
        } else {
            None
        };
        match mapped {
            Some('-') if last_dash => {}
            Some('-') => {
                out.push('-');
                last_dash = true;
            }
            Some(c) => {
                out.push(c);
                last_dash = false;
            }
            None => {}
        }
    }
    out.trim_matches(|c| c == '-' || c == '.').to_string()
}
