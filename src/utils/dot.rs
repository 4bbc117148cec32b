//! Graphviz DOT helpers.

/// Escapes a string for use inside a quoted DOT label.
///
/// Quotes, backslashes and angle brackets are escaped, newlines become `\n` and
/// carriage returns are dropped.
///
/// ```rust
/// use ssaopt::utils::escape_dot;
///
/// assert_eq!(escape_dot("v1: Int32 = \"x\""), "v1: Int32 = \\\"x\\\"");
/// ```
#[must_use]
pub fn escape_dot(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            '<' => escaped.push_str("\\<"),
            '>' => escaped.push_str("\\>"),
            other => escaped.push(other),
        }
    }
    escaped
}
