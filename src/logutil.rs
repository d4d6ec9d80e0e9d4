//! Keep player-typed text on one log line.

/// Longest preview of user input that ends up in a log line.
const MAX_PREVIEW: usize = 200;

/// Render `s` for a log line: ESC shows as `\e` so terminal sequences stay
/// readable, other control characters and backslashes use Rust escapes, and
/// anything past [`MAX_PREVIEW`] characters is replaced by `…`.
pub fn escape_log(s: &str) -> String {
    let mut chars = s.chars();
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for ch in chars.by_ref().take(MAX_PREVIEW) {
        match ch {
            '\x1b' => out.push_str("\\e"),
            c if c.is_control() || c == '\\' => out.extend(c.escape_default()),
            c => out.push(c),
        }
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}
