/// Title budget in bytes, so multi-byte titles stay under filename limits.
const MAX_TITLE_BYTES: usize = 140;

fn is_allowed(character: char) -> bool {
    character.is_alphanumeric() || matches!(character, ' ' | '-' | '_' | '.')
}

/// Drops every character outside letters, digits, space, `-`, `_` and `.`,
/// then trims surrounding whitespace. Path separators never survive.
pub fn sanitize_filename(value: &str) -> String {
    let kept: String = value.chars().filter(|character| is_allowed(*character)).collect();
    kept.trim().to_string()
}

/// Filesystem-safe `"{title} - {video_id}.{extension}"`.
///
/// A title with no allowed characters falls back to `"{video_id}.{extension}"`.
pub fn safe_filename(title: &str, video_id: &str, extension: &str) -> String {
    let title = sanitize_filename(truncate_to_bytes(title, MAX_TITLE_BYTES));

    let candidate = if title.is_empty() {
        format!("{video_id}.{extension}")
    } else {
        format!("{title} - {video_id}.{extension}")
    };

    sanitize_filename(&candidate)
}

/// Longest prefix of `value` that fits in `max_bytes` without splitting a char.
fn truncate_to_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }

    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

pub fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

/// ASCII-only variant for header values; non-ASCII characters become `_`.
pub fn sanitize_ascii_filename(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());

    for character in value.chars() {
        if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_' | ' ') {
            sanitized.push(character);
        } else {
            sanitized.push('_');
        }
    }

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}
