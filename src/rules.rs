//! Reclassification of provider boilerplate as `system` messages.
//!
//! Providers inject scaffolding (command transcripts, environment dumps,
//! reminders) into the user/assistant stream. A small per-provider regex set
//! moves those to the `system` category after parsing so listings and search
//! facets reflect actual conversation.

use regex::Regex;
use std::collections::BTreeMap;

use crate::model::{CanonicalMessage, MessageCategory, Provider};

const DEFAULT_CLAUDE_RULES: &[&str] = &[
    r"^<command-name>",
    r"^<local-command-stdout>",
    r"^<local-command-stderr>",
    r"^<system-reminder>",
    r"^Caveat: the messages below were generated by the user",
];

const DEFAULT_CODEX_RULES: &[&str] = &[
    r"^<user_instructions>",
    r"^<environment_context>",
    r"^<turn_context>",
];

const DEFAULT_GEMINI_RULES: &[&str] = &[r"^<context_summary>", r"^Please continue\.$"];

/// Raw rule overrides, keyed by provider name. A present key replaces that
/// provider's defaults wholesale; an empty list disables the provider.
pub type RuleOverrides = BTreeMap<String, Vec<String>>;

/// Compiled per-provider rule sets.
#[derive(Debug)]
pub struct SystemMessageRules {
    claude: Vec<Regex>,
    codex: Vec<Regex>,
    gemini: Vec<Regex>,
}

impl Default for SystemMessageRules {
    fn default() -> Self {
        Self::with_overrides(&RuleOverrides::new())
    }
}

impl SystemMessageRules {
    pub fn with_overrides(overrides: &RuleOverrides) -> Self {
        Self {
            claude: compile(Provider::Claude, DEFAULT_CLAUDE_RULES, overrides),
            codex: compile(Provider::Codex, DEFAULT_CODEX_RULES, overrides),
            gemini: compile(Provider::Gemini, DEFAULT_GEMINI_RULES, overrides),
        }
    }

    fn rules_for(&self, provider: Provider) -> &[Regex] {
        match provider {
            Provider::Claude => &self.claude,
            Provider::Codex => &self.codex,
            Provider::Gemini => &self.gemini,
        }
    }

    /// Reclassify matching `user`/`assistant` messages as `system`, in place.
    pub fn apply(&self, messages: &mut [CanonicalMessage]) {
        for msg in messages.iter_mut() {
            if !matches!(
                msg.category,
                MessageCategory::User | MessageCategory::Assistant
            ) {
                continue;
            }
            let rules = self.rules_for(msg.provider);
            if rules.iter().any(|re| re.is_match(&msg.content)) {
                msg.category = MessageCategory::System;
            }
        }
    }
}

fn compile(provider: Provider, defaults: &[&str], overrides: &RuleOverrides) -> Vec<Regex> {
    let patterns: Vec<String> = match overrides.get(provider.as_str()) {
        Some(patterns) => patterns.clone(),
        None => defaults.iter().map(|p| p.to_string()).collect(),
    };

    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("skipping invalid {provider} system rule {pattern:?}: {e}");
                None
            }
        })
        .collect()
}
