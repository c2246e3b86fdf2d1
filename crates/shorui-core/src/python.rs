//! Helpers for emitting Python source text

/// Quote `value` as a single-quoted Python string literal.
///
/// Backticks are escaped too so the literal can sit inside a fenced block.
///
/// ```
/// use shorui_core::python::string_literal;
///
/// assert_eq!(string_literal("it's"), r"'it\'s'");
/// ```
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '`' => out.push_str("\\x60"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
