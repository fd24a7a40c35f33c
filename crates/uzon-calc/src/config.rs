use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::context::ContextOptions;

/// Settings shared by every context and by the executor service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Whole-run limit for one execution.
    pub execution_timeout_secs: u64,
    /// How long a run may wait at a `UI` prompt between two requests.
    pub idle_ttl_secs: u64,
    pub suppress_private_assignments: bool,
    pub enable_substitution: bool,
    pub enable_fstring_equation: bool,
    /// Display names seeded into every context.
    pub aliases: IndexMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            execution_timeout_secs: 300,
            idle_ttl_secs: 600,
            suppress_private_assignments: true,
            enable_substitution: true,
            enable_fstring_equation: true,
            aliases: IndexMap::new(),
        }
    }
}

impl Config {
    #[inline]
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    #[inline]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn context_options(&self) -> ContextOptions {
        let mut options = ContextOptions::empty();
        options.set(
            ContextOptions::SUPPRESS_PRIVATE_ASSIGNMENTS,
            self.suppress_private_assignments,
        );
        options.set(ContextOptions::ENABLE_SUBSTITUTION, self.enable_substitution);
        options.set(
            ContextOptions::ENABLE_FSTRING_EQUATION,
            self.enable_fstring_equation,
        );
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_context_defaults() {
        let config = Config::default();
        assert_eq!(config.context_options(), ContextOptions::default());
        assert_eq!(config.execution_timeout(), Duration::from_secs(300));
        assert_eq!(config.idle_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn kebab_case_keys() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "enable-substitution": false,
            "aliases": {"v_car": "v_auto"},
        }))
        .unwrap();
        assert!(!config.enable_substitution);
        assert!(config.suppress_private_assignments);
        assert_eq!(config.aliases["v_car"], "v_auto");
    }
}
