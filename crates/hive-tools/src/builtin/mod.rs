// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Built-in tool handlers shipped with the runtime.
//!
//! Skills are declared by manifests on disk; this module only provides the
//! callables bound to them during discovery.  Deployments add their own
//! handlers to the map before calling `ToolRegistry::discover`.

mod clock;
mod echo;

use std::collections::HashMap;

use crate::ToolHandler;

pub use clock::ClockNow;

/// Handler set for the skills bundled with the runtime.
pub fn builtin_handlers() -> HashMap<String, ToolHandler> {
    let mut handlers = HashMap::new();
    handlers.insert("clock__now".to_string(), clock::handler());
    handlers.insert("echo__say".to_string(), echo::handler());
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_contains_clock_and_echo() {
        let h = builtin_handlers();
        assert!(h.contains_key("clock__now"));
        assert!(h.contains_key("echo__say"));
    }
}
