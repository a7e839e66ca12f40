//! XML text helpers for the experiment database.
//!
//! The document is assembled from pre-rendered tag fragments, so escaping
//! happens here, once, when a fragment is first built.

/// Escape the five standard markup special characters
///
/// **Public** - used whenever external text lands in the document
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape and wrap in double quotes, ready to sit after `n=`
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", escape(s))
}

/// Hexadecimal rendering for offsets: the `0x` prefix is omitted only
/// when the value is zero.
pub fn hex(v: u64) -> String {
    if v == 0 {
        "0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_all_five() {
        assert_eq!(escape("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&apos;");
    }

    #[test]
    fn test_escape_passthrough() {
        assert_eq!(escape("plain text 123"), "plain text 123");
    }

    #[test]
    fn test_quoted() {
        assert_eq!(quoted("x<y"), "\"x&lt;y\"");
    }

    #[test]
    fn test_hex_zero_has_no_prefix() {
        assert_eq!(hex(0), "0");
        assert_eq!(hex(0x2a), "0x2a");
        assert_eq!(hex(255), "0xff");
    }
}
