// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Skill manifests: one `manifest.yaml` per skill directory.
//!
//! ```yaml
//! slug: search
//! description: Web and knowledge search
//! tools:
//!   - method: web
//!     description: Search the public web
//!     parameters:
//!       type: object
//!       properties:
//!         q: { type: string, description: Query text }
//!       required: [q]
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

fn default_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestTool {
    pub method: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the argument object, recorded verbatim.
    #[serde(default = "default_parameters")]
    pub parameters: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkillManifest {
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<ManifestTool>,
}

/// Qualified tool name as exposed to the model.
pub fn qualified_name(skill: &str, method: &str) -> String {
    format!("{skill}__{method}")
}

pub fn load_manifest(path: &Path) -> anyhow::Result<SkillManifest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
