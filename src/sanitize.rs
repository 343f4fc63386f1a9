//! Content sanitization shared by campaign scheduling and dispatch.
//!
//! Message templates and bodies are checked for script/HTML injection markers
//! before anything is persisted or transmitted. Stored copies are HTML-entity
//! encoded; the gateway always receives plain text.

use crate::errors::AppError;

/// Maximum accepted length for a template or message body, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Substrings (matched case-insensitively) that reject a payload outright.
pub const INJECTION_MARKERS: [&str; 5] =
    ["<script", "javascript:", "onerror=", "onclick=", "<iframe"];

/// Returns the first injection marker found in `text`, if any.
pub fn find_injection_marker(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    INJECTION_MARKERS
        .iter()
        .copied()
        .find(|marker| lowered.contains(marker))
}

/// Validates a message template or body for the given field.
///
/// Rejects empty content, content over [`MAX_MESSAGE_CHARS`] and content
/// carrying an injection marker.
pub fn check_message_content(field: &str, text: &str) -> Result<(), AppError> {
    if text.trim().is_empty() {
        return Err(AppError::invalid_field(field, "must not be empty"));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::invalid_field(
            field,
            format!("must be at most {} characters", MAX_MESSAGE_CHARS),
        ));
    }
    if let Some(marker) = find_injection_marker(text) {
        tracing::warn!("Rejected {} containing injection marker '{}'", field, marker);
        return Err(AppError::invalid_field(field, "contains disallowed content"));
    }
    Ok(())
}

/// Validates and encodes a template for storage.
pub fn sanitize_for_storage(field: &str, text: &str) -> Result<String, AppError> {
    check_message_content(field, text)?;
    Ok(html_encode(text))
}

/// HTML-entity encodes the characters significant to HTML.
pub fn html_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`html_encode`]. Unknown entities are left untouched.
pub fn html_decode(text: &str) -> String {
    const ENTITIES: [(&str, char); 6] = [
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&#x27;", '\''),
        ("&#x2F;", '/'),
        ("&amp;", '&'),
    ];

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, c)) => {
                out.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
