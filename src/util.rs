//! Shared utility functions for the townmig crate.

/// Bound `s` to at most `max_len` characters for display or logging.
///
/// Strings that already fit are returned unchanged. Longer strings keep their
/// first `max_len - 3` characters followed by `...`. When `max_len` leaves no
/// room for the ellipsis (`max_len < 4`) the string is simply cut.
///
/// Lengths are counted in `char`s so a cut never lands inside a code point.
pub fn truncate_output(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len < 4 {
        return s.chars().take(max_len).collect();
    }
    let mut out: String = s.chars().take(max_len - 3).collect();
    out.push_str("...");
    out
}
