// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalogue: static map from agent-facing aliases to provider endpoints.

use serde::{Deserialize, Serialize};

/// How a model family activates its reasoning channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingStyle {
    /// No separate reasoning channel.
    #[default]
    None,
    /// `enable_thinking` flag in the request body (Qwen3, DeepSeek-R1, QwQ).
    Qwen,
    /// `thinking` directive with an explicit token budget.
    Claude,
}

/// Metadata for a single catalogue entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    /// Stable alias used by agents and sessions (e.g. "qwen-local").
    pub alias: String,
    /// Provider family id: "openai_compat" | "anthropic" | "mock".
    pub provider: String,
    /// Provider-specific model identifier forwarded on the wire.
    pub model: String,
    #[serde(default)]
    pub thinking: ThinkingStyle,
    #[serde(default)]
    pub description: String,
}

impl ModelCatalogEntry {
    pub fn supports_thinking(&self) -> bool {
        self.thinking != ThinkingStyle::None
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelCatalogEntry>,
}

/// Return all entries from the bundled static catalogue.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    let yaml = include_str!("../models.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    catalog.models
}

/// Look up a single entry by alias.  Returns `None` for unknown aliases.
pub fn resolve(alias: &str) -> Option<ModelCatalogEntry> {
    static_catalog().into_iter().find(|e| e.alias == alias)
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_catalog_is_non_empty() {
        assert!(!static_catalog().is_empty());
    }

    #[test]
    fn aliases_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for e in static_catalog() {
            assert!(seen.insert(e.alias.clone()), "duplicate alias: {}", e.alias);
        }
    }

    #[test]
    fn qwen_alias_resolves_with_thinking() {
        let e = resolve("qwen-local").expect("qwen-local must be in catalogue");
        assert_eq!(e.provider, "openai_compat");
        assert_eq!(e.thinking, ThinkingStyle::Qwen);
        assert!(e.supports_thinking());
    }

    #[test]
    fn claude_alias_uses_claude_style() {
        let e = resolve("claude-fast").expect("claude-fast must be in catalogue");
        assert_eq!(e.provider, "anthropic");
        assert_eq!(e.thinking, ThinkingStyle::Claude);
    }

    #[test]
    fn mock_alias_is_registered_for_tests() {
        let e = resolve("mock").unwrap();
        assert_eq!(e.provider, "mock");
        assert!(!e.supports_thinking());
    }

    #[test]
    fn unknown_alias_returns_none() {
        assert!(resolve("no-such-model-xyz").is_none());
    }

    #[test]
    fn every_entry_names_a_known_provider_family() {
        for e in static_catalog() {
            assert!(
                matches!(e.provider.as_str(), "openai_compat" | "anthropic" | "mock"),
                "{} references unknown provider {}",
                e.alias,
                e.provider,
            );
        }
    }
}
