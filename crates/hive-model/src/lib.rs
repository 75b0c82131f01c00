// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
pub mod thinking;
pub(crate) mod openai_compat;
mod anthropic;
mod breaker;
mod error;
mod gateway;
mod mock;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use breaker::{BreakerState, CircuitBreaker};
pub use catalog::{resolve, static_catalog, ModelCatalogEntry, ThinkingStyle};
pub use error::LlmError;
pub use gateway::LlmGateway;
pub use mock::{FlakyMockProvider, ScriptedMockProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{EventStream, ModelProvider, ProviderRequest, ProviderResponse};
pub use types::*;

use std::collections::HashMap;
use std::sync::Arc;

use hive_config::ModelsConfig;

/// Build the provider driver set from configuration and wrap it in a gateway.
///
/// Every provider family named in the bundled catalogue gets a driver;
/// connection details (base URL, key env) come from `cfg.providers`.  The
/// mock driver is always registered so tests and the `mock` alias work
/// without network access.
pub fn gateway_from_config(cfg: &ModelsConfig) -> LlmGateway {
    let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();

    let compat = cfg.providers.get("openai_compat").cloned().unwrap_or_default();
    providers.insert(
        "openai_compat".into(),
        Arc::new(OpenAiCompatProvider::new(
            compat
                .base_url
                .unwrap_or_else(|| "http://localhost:8080/v1".into()),
            resolve_api_key(&compat.api_key, &compat.api_key_env, "OPENAI_API_KEY"),
            compat.driver_options,
        )),
    );

    let anthropic = cfg.providers.get("anthropic").cloned().unwrap_or_default();
    providers.insert(
        "anthropic".into(),
        Arc::new(AnthropicProvider::new(
            anthropic.base_url,
            resolve_api_key(&anthropic.api_key, &anthropic.api_key_env, "ANTHROPIC_API_KEY"),
        )),
    );

    providers.insert("mock".into(), Arc::new(ScriptedMockProvider::echo()));

    LlmGateway::new(providers, cfg.fallbacks.clone())
}

/// Resolve an API key: explicit value wins, then the configured env var,
/// then the provider's canonical env var.  `None` means unauthenticated
/// (local servers).
fn resolve_api_key(
    explicit: &Option<String>,
    env_name: &Option<String>,
    default_env: &str,
) -> Option<String> {
    if let Some(k) = explicit {
        return Some(k.clone());
    }
    let var = env_name.as_deref().unwrap_or(default_env);
    std::env::var(var).ok()
}
