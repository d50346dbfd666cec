//! Client-supplied file name cleanup.

use filevault_core::{VaultError, VaultResult};

const MAX_NAME_CHARS: usize = 255;

const RESERVED_STEMS: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters with no visible rendering that still count as part of a name.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FEFF}'
    )
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
}

/// Turn a user-supplied name into a single safe path segment.
///
/// Control and invisible characters are stripped, reserved punctuation is
/// replaced with `_` and the result is capped at 255 characters.
pub fn sanitize_filename(name: &str, allow_hidden: bool) -> VaultResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(VaultError::bad_request("filename cannot be empty"));
    }
    if trimmed.contains('\0') {
        return Err(VaultError::bad_request("filename contains null bytes"));
    }

    let replaced: String = trimmed
        .chars()
        .filter(|c| !c.is_control() && !is_invisible(*c))
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();

    let mut cleaned = replaced.trim().to_string();
    if cleaned.is_empty() {
        return Err(VaultError::bad_request("filename is invalid after sanitization"));
    }

    if cleaned.chars().count() > MAX_NAME_CHARS {
        cleaned = cleaned.chars().take(MAX_NAME_CHARS).collect();
    }

    if cleaned == "." || cleaned == ".." {
        return Err(VaultError::bad_request(
            "filename cannot be current or parent directory",
        ));
    }

    if cleaned.starts_with('.') && !allow_hidden {
        return Err(VaultError::bad_request("hidden filenames are not allowed"));
    }

    let stem = cleaned.split('.').next().unwrap_or_default().to_uppercase();
    if RESERVED_STEMS.contains(&stem.as_str()) {
        return Err(VaultError::bad_request("reserved filename is not allowed"));
    }

    Ok(cleaned)
}
