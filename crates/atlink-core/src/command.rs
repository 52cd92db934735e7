//! RouterOS `at-chat` command builder.
//!
//! The remote shell is single-line, so the AT string is flattened and then
//! embedded in a double-quoted `input=` argument:
//!
//! ```
//! use atlink_core::command::build;
//!
//! assert_eq!(
//!     build("lte1", "AT+CSQ"),
//!     r#"/interface lte at-chat lte1 input="AT+CSQ""#
//! );
//! ```

/// Build the vendor invocation relaying `at_command` to `interface`.
pub fn build(interface: &str, at_command: &str) -> String {
    let flat = flatten(at_command);
    format!(
        "/interface lte at-chat {interface} input=\"{}\"",
        escape_argument(&flat)
    )
}

/// Drop carriage returns and collapse each run of newlines into one space.
pub fn flatten(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;
    for c in text.chars() {
        match c {
            '\r' => {}
            '\n' => {
                if !in_break {
                    out.push(' ');
                    in_break = true;
                }
            }
            other => {
                out.push(other);
                in_break = false;
            }
        }
    }
    out
}

/// Escape for a RouterOS double-quoted string.
///
/// `$` is escaped as well because RouterOS substitutes `$name` inside
/// double quotes.
pub fn escape_argument(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape_argument`]: what the remote shell sees.
pub fn unescape_argument(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Interface names are placed unquoted on the command line.
pub fn is_valid_interface(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_command() {
        assert_eq!(
            build("lte1", "ati"),
            "/interface lte at-chat lte1 input=\"ati\""
        );
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        let cmd = build("lte1", "AT^TEST=\"x\"");
        assert_eq!(
            cmd,
            "/interface lte at-chat lte1 input=\"AT^TEST=\\\"x\\\"\""
        );
        assert_eq!(cmd.matches("lte1").count(), 1);
    }

    #[test]
    fn backslash_and_dollar_are_escaped() {
        assert_eq!(escape_argument(r"a\b"), r"a\\b");
        assert_eq!(escape_argument("$x"), r"\$x");
    }

    #[test]
    fn newlines_collapse_to_one_space() {
        assert_eq!(flatten("AT+A\r\nAT+B"), "AT+A AT+B");
        assert_eq!(flatten("AT+A\n\n\nAT+B"), "AT+A AT+B");
        assert_eq!(flatten("AT+A\r\n\r\nAT+B"), "AT+A AT+B");
        assert!(!build("lte1", "a\nb\r").contains('\n'));
        assert!(!build("lte1", "a\nb\r").contains('\r'));
    }

    #[test]
    fn unescape_reverses_escape() {
        let raw = r#"AT^X="a\b" $v"#;
        assert_eq!(unescape_argument(&escape_argument(raw)), raw);
    }

    #[test]
    fn interface_validation() {
        assert!(is_valid_interface("lte1"));
        assert!(is_valid_interface("lte-wan_2.0"));
        assert!(!is_valid_interface(""));
        assert!(!is_valid_interface("lte 1"));
        assert!(!is_valid_interface("lte1\""));
        assert!(!is_valid_interface("lte1;reboot"));
    }
}
