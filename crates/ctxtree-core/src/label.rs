//! Label prefixes in raw user input.
//!
//! Users can tag a turn with a short label that ends up in the node's
//! `metadata.label`:
//!
//! - `[label: My Label] actual message`
//! - `{label: My Label} actual message`
//! - `label: My Label | actual message`

use std::sync::OnceLock;

use regex::Regex;

fn bracketed() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^\s*[\[{]\s*label\s*:\s*(.*?)\s*[\]}]\s*(.*)$").ok())
        .as_ref()
}

fn piped() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^\s*label\s*:\s*(.*?)\s*\|\s*(.*)$").ok())
        .as_ref()
}

/// Split an optional label prefix off `input`.
///
/// Returns `(label, message)`. Input without a recognised prefix comes back
/// unchanged with no label; a blank label is reported as `None`.
pub fn parse_user_label(input: &str) -> (Option<String>, String) {
    for re in [bracketed(), piped()].into_iter().flatten() {
        if let Some(caps) = re.captures(input) {
            let label = caps.get(1).map_or("", |m| m.as_str()).trim();
            let rest = caps.get(2).map_or("", |m| m.as_str()).trim();
            let label = (!label.is_empty()).then(|| label.to_string());
            return (label, rest.to_string());
        }
    }
    (None, input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_brackets() {
        let (label, msg) = parse_user_label("[label: Setup] install deps");
        assert_eq!(label.as_deref(), Some("Setup"));
        assert_eq!(msg, "install deps");
    }

    #[test]
    fn test_braces_case_insensitive() {
        let (label, msg) = parse_user_label("  {LABEL:  Fix bug }   patch parser");
        assert_eq!(label.as_deref(), Some("Fix bug"));
        assert_eq!(msg, "patch parser");
    }

    #[test]
    fn test_pipe_form() {
        let (label, msg) = parse_user_label("label: Refactor | split module");
        assert_eq!(label.as_deref(), Some("Refactor"));
        assert_eq!(msg, "split module");
    }

    #[test]
    fn test_no_prefix_passes_through() {
        let (label, msg) = parse_user_label("  just a message ");
        assert_eq!(label, None);
        assert_eq!(msg, "  just a message ");
    }

    #[test]
    fn test_blank_label_is_none() {
        let (label, msg) = parse_user_label("[label: ] hello");
        assert_eq!(label, None);
        assert_eq!(msg, "hello");
    }

    #[test]
    fn test_multiline_message_kept() {
        let (label, msg) = parse_user_label("[label: L] first\nsecond");
        assert_eq!(label.as_deref(), Some("L"));
        assert_eq!(msg, "first\nsecond");
    }
}
