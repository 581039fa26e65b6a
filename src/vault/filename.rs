//! Filename sanitization for ciphertext blobs
//!
//! Encrypted files carry no embedded metadata; the blob's filesystem name is
//! a sanitized version of the original name. Sanitization removes path
//! traversal material, characters rejected by common filesystems, and
//! reserved device names, and bounds the result to 255 bytes while keeping
//! the final extension.

use chrono::Utc;

/// Maximum filename length in bytes
const MAX_NAME_BYTES: usize = 255;

/// Characters rejected by common filesystems
const FORBIDDEN: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

/// Sanitize an untrusted filename for use as a storage path component
///
/// Any run of `/` or `\` collapses to a single `_`, literal `..` substrings
/// become `_`, control characters and `<>:"|?*` are stripped, and leading or
/// trailing dots and spaces are trimmed. An empty result or a reserved
/// device name is replaced with a generated `file_<timestamp>` name.
pub fn sanitize_file_name(name: &str) -> String {
    let mut collapsed = String::with_capacity(name.len());
    let mut in_separator_run = false;
    for c in name.chars() {
        if c == '/' || c == '\\' {
            if !in_separator_run {
                collapsed.push('_');
                in_separator_run = true;
            }
        } else {
            in_separator_run = false;
            collapsed.push(c);
        }
    }

    let no_traversal = collapsed.replace("..", "_");

    let cleaned: String = no_traversal
        .chars()
        .filter(|c| !c.is_control() && !FORBIDDEN.contains(c))
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == ' ');

    if trimmed.is_empty() || is_reserved_name(trimmed) {
        return format!("file_{}", Utc::now().timestamp_millis());
    }

    truncate_preserving_extension(trimmed, MAX_NAME_BYTES)
}

/// Check for Windows reserved device names, extension-stripped
fn is_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name);
    let upper = stem.to_ascii_uppercase();
    if matches!(upper.as_str(), "CON" | "PRN" | "AUX" | "NUL") {
        return true;
    }
    if upper.len() == 4 && (upper.starts_with("COM") || upper.starts_with("LPT")) {
        let digit = upper.as_bytes()[3];
        return (b'1'..=b'9').contains(&digit);
    }
    false
}

/// Truncate to a byte budget, keeping the final extension when possible
fn truncate_preserving_extension(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }

    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot < max_bytes => {
            let ext = &name[dot..];
            let stem_budget = max_bytes - ext.len();
            let stem = truncate_at_char_boundary(&name[..dot], stem_budget);
            format!("{}{}", stem, ext)
        }
        _ => truncate_at_char_boundary(name, max_bytes).to_string(),
    }
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
