// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System-prompt assembly.
//!
//! The prompt is a priority-ordered stack of sections: identity and soul
//! files (read-only), agent-specific instructions, active goals, the
//! current time, and tool descriptions.  File reads are cached with a short
//! TTL so edits show up without restarts; fully assembled prompts are
//! cached only when no per-call dynamic data was supplied.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Local;
use hive_tools::ToolSchema;
use tracing::debug;

const FILE_CACHE_TTL: Duration = Duration::from_secs(60);
const PROMPT_CACHE_TTL: Duration = Duration::from_secs(60);
const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Per-call assembly input.
#[derive(Debug, Clone, Default)]
pub struct AssembleRequest {
    pub agent_id: String,
    /// Agent-specific instruction fragment.
    pub agent_prompt: Option<String>,
    /// Active goals, rendered as a 1-based enumerated list.
    pub goals: Vec<String>,
    /// Tool schemas to describe; empty when tools are disabled.
    pub tools: Vec<ToolSchema>,
    pub include_tools: bool,
    pub include_goals: bool,
    /// When set, returned unchanged as the sole prompt (testing hook).
    pub override_prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub prompt: String,
    pub section_names: Vec<&'static str>,
    pub char_count: usize,
    pub cached: bool,
}

pub struct PromptAssembler {
    identity_file: PathBuf,
    soul_file: PathBuf,
    file_cache: Mutex<HashMap<PathBuf, (Instant, String)>>,
    prompt_cache: Mutex<HashMap<(String, bool, bool), (Instant, AssembledPrompt)>>,
}

impl PromptAssembler {
    pub fn new(identity_file: impl Into<PathBuf>, soul_file: impl Into<PathBuf>) -> Self {
        Self {
            identity_file: identity_file.into(),
            soul_file: soul_file.into(),
            file_cache: Mutex::new(HashMap::new()),
            prompt_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn assemble(&self, req: &AssembleRequest) -> AssembledPrompt {
        if let Some(override_prompt) = &req.override_prompt {
            return AssembledPrompt {
                prompt: override_prompt.clone(),
                section_names: vec!["override"],
                char_count: override_prompt.chars().count(),
                cached: false,
            };
        }

        // Cacheable only when the caller supplied no dynamic data.
        let cacheable = req.tools.is_empty() && req.goals.is_empty();
        let cache_key = (req.agent_id.clone(), req.include_tools, req.include_goals);
        if cacheable {
            let cache = self.prompt_cache.lock().unwrap();
            if let Some((at, cached)) = cache.get(&cache_key) {
                if at.elapsed() < PROMPT_CACHE_TTL {
                    let mut hit = cached.clone();
                    hit.cached = true;
                    return hit;
                }
            }
        }

        // Sections in priority order, highest first.
        let mut sections: Vec<(&'static str, String)> = Vec::new();

        if let Some(identity) = self.read_cached(&self.identity_file) {
            sections.push(("identity", identity));
        }
        if let Some(soul) = self.read_cached(&self.soul_file) {
            sections.push(("soul", soul));
        }
        if let Some(agent_prompt) = req.agent_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            sections.push(("agent", agent_prompt.trim().to_string()));
        }
        if req.include_goals && !req.goals.is_empty() {
            let list = req
                .goals
                .iter()
                .enumerate()
                .map(|(i, g)| format!("{}. {g}", i + 1))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(("goals", format!("Active goals:\n{list}")));
        }
        sections.push(("time", time_context()));
        if req.include_tools && !req.tools.is_empty() {
            sections.push(("tools", render_tools(&req.tools)));
        }

        let prompt = sections
            .iter()
            .map(|(_, body)| body.as_str())
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR);
        let assembled = AssembledPrompt {
            char_count: prompt.chars().count(),
            section_names: sections.iter().map(|(name, _)| *name).collect(),
            prompt,
            cached: false,
        };

        if cacheable {
            self.prompt_cache
                .lock()
                .unwrap()
                .insert(cache_key, (Instant::now(), assembled.clone()));
        }
        debug!(agent = %req.agent_id, sections = assembled.section_names.len(), chars = assembled.char_count, "prompt assembled");
        assembled
    }

    /// TTL-cached file read.  Missing or empty files yield no section.
    fn read_cached(&self, path: &Path) -> Option<String> {
        {
            let cache = self.file_cache.lock().unwrap();
            if let Some((at, content)) = cache.get(path) {
                if at.elapsed() < FILE_CACHE_TTL {
                    return if content.is_empty() { None } else { Some(content.clone()) };
                }
            }
        }
        let content = std::fs::read_to_string(path).unwrap_or_default().trim().to_string();
        self.file_cache
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), (Instant::now(), content.clone()));
        if content.is_empty() {
            None
        } else {
            Some(content)
        }
    }
}

fn time_context() -> String {
    let now = Local::now();
    format!(
        "Current time: {} {} at {} ({})",
        now.format("%A"),
        now.format("%Y-%m-%d"),
        now.format("%H:%M:%S"),
        now.format("%Z"),
    )
}

/// Tool section: name, description, and a parameter table with type and
/// required-marker, rendered from each tool's JSON schema.
fn render_tools(tools: &[ToolSchema]) -> String {
    let mut out = String::from("Available tools:\n");
    for tool in tools {
        out.push_str(&format!("\n### {}\n{}\n", tool.name, tool.description));
        let required: Vec<&str> = tool
            .parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if let Some(props) = tool.parameters.get("properties").and_then(|p| p.as_object()) {
            if !props.is_empty() {
                out.push_str("| parameter | type | required |\n|---|---|---|\n");
                for (name, schema) in props {
                    let ptype = schema.get("type").and_then(|t| t.as_str()).unwrap_or("any");
                    let marker = if required.contains(&name.as_str()) { "yes" } else { "no" };
                    out.push_str(&format!("| {name} | {ptype} | {marker} |\n"));
                }
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
