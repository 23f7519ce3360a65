use std::borrow::Cow;

/// Removes control characters (other than tab, newline and carriage return) from a string.
///
/// Folder names and feed titles end up in OPML attributes and terminal output, so
/// ESC sequences and NUL bytes are dropped before they reach storage.
///
/// Returns the input unchanged (borrowed) when nothing needs stripping.
///
/// # Examples
///
/// ```
/// use feedvault::util::strip_control_chars;
///
/// assert_eq!(strip_control_chars("Tech"), "Tech");
/// assert_eq!(strip_control_chars("Te\x1bch\0"), "Tech");
/// ```
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !is_stripped(*c)).collect())
}

fn is_stripped(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

/// Sanitizes a user-supplied label: strips control characters and trims whitespace.
///
/// Returns `None` when nothing meaningful is left, which callers treat as a missing field.
pub fn clean_label(raw: &str) -> Option<String> {
    let stripped = strip_control_chars(raw);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
