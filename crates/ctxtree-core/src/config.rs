//! Render configuration.
//!
//! A [`RenderConfig`] is built once (from defaults, a host config file or the
//! environment) and passed explicitly to every render call.

use serde::{Deserialize, Serialize};

use crate::render::{StructureOptions, SummaryOptions};

pub const ENV_INCLUDE_LABELS: &str = "CTXTREE_INCLUDE_LABELS";
pub const ENV_MAX_LABEL_WORDS: &str = "CTXTREE_MAX_LABEL_WORDS";
pub const ENV_MAX_LABEL_LEN: &str = "CTXTREE_MAX_LABEL_LEN";
pub const ENV_SUMMARY_MAX_LEN: &str = "CTXTREE_SUMMARY_MAX_LEN";
pub const ENV_SUMMARY_MAX_KEYS: &str = "CTXTREE_SUMMARY_MAX_KEYS";
pub const ENV_PROMPT_HARD_MAX: &str = "CTXTREE_PROMPT_HARD_MAX";

/// Size limits and toggles for the text views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Append short labels to structure lines.
    pub include_labels: bool,
    pub max_label_words: usize,
    pub max_label_len: usize,
    /// Label limits for root → node path lines.
    pub path_label_words: usize,
    pub path_label_len: usize,
    pub summary_max_len: usize,
    pub summary_max_keys: usize,
    /// Character count above which the prompt view asks for compaction.
    pub prompt_hard_max: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            include_labels: false,
            max_label_words: 10,
            max_label_len: 32,
            path_label_words: 5,
            path_label_len: 24,
            summary_max_len: 120,
            summary_max_keys: 5,
            prompt_hard_max: 600_000,
        }
    }
}

impl RenderConfig {
    /// Defaults overridden by `CTXTREE_*` environment variables.
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`RenderConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_INCLUDE_LABELS).and_then(|v| parse_flag(&v)) {
            config.include_labels = v;
        }
        let numbers: [(&str, &mut usize); 5] = [
            (ENV_MAX_LABEL_WORDS, &mut config.max_label_words),
            (ENV_MAX_LABEL_LEN, &mut config.max_label_len),
            (ENV_SUMMARY_MAX_LEN, &mut config.summary_max_len),
            (ENV_SUMMARY_MAX_KEYS, &mut config.summary_max_keys),
            (ENV_PROMPT_HARD_MAX, &mut config.prompt_hard_max),
        ];
        for (key, slot) in numbers {
            if let Some(v) = lookup(key).and_then(|v| v.trim().parse().ok()) {
                *slot = v;
            }
        }
        config
    }

    /// Enable or disable structure labels.
    #[must_use]
    pub fn with_labels(mut self, include_labels: bool) -> Self {
        self.include_labels = include_labels;
        self
    }

    pub fn structure(&self) -> StructureOptions {
        StructureOptions {
            include_labels: self.include_labels,
            max_words: self.max_label_words,
            max_label_len: self.max_label_len,
        }
    }

    pub fn summary(&self) -> SummaryOptions {
        SummaryOptions {
            max_len: self.summary_max_len,
            max_keys: self.summary_max_keys,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_view_defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.structure(), StructureOptions::default());
        assert_eq!(config.summary(), SummaryOptions::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = RenderConfig::from_lookup(lookup(&[
            (ENV_INCLUDE_LABELS, "1"),
            (ENV_MAX_LABEL_LEN, "12"),
            (ENV_PROMPT_HARD_MAX, " 5000 "),
        ]));
        assert!(config.include_labels);
        assert_eq!(config.max_label_len, 12);
        assert_eq!(config.prompt_hard_max, 5000);
        assert_eq!(config.summary_max_len, 120);
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = RenderConfig::from_lookup(lookup(&[
            (ENV_INCLUDE_LABELS, "maybe"),
            (ENV_SUMMARY_MAX_KEYS, "lots"),
        ]));
        assert_eq!(config, RenderConfig::default());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: RenderConfig =
            serde_json::from_str(r#"{"include_labels": true, "summary_max_len": 40}"#).unwrap();
        assert!(config.include_labels);
        assert_eq!(config.summary_max_len, 40);
        assert_eq!(config.max_label_words, 10);
    }

    #[test]
    fn test_with_labels() {
        assert!(RenderConfig::default().with_labels(true).structure().include_labels);
    }
}
