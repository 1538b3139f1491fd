//! Runtime configuration
//!
//! Two switches change the core's behavior, both off by default:
//!
//! - `add_missing_measures`: permissive measure registry. Unknown or
//!   level-mismatched measure keys are registered/promoted with a warning
//!   instead of rejecting the submission. This mutates the experiment design
//!   after data collection started; keep it off in production.
//! - `unprotected_runs`: lock acquisition always succeeds and replaces any
//!   existing token. Development only, it defeats run mutual exclusion.

use serde::{Deserialize, Serialize};

/// Environment variable enabling permissive measure registration.
pub const ENV_ADD_MISSING_MEASURES: &str = "LIGHTMILL_ADD_MISSING_MEASURES";

/// Environment variable enabling unprotected (always-lockable) runs.
pub const ENV_UNPROTECTED_RUNS: &str = "LIGHTMILL_UNPROTECTED_RUNS";

/// Core configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Auto-register unknown measures and promote missing levels.
    pub add_missing_measures: bool,
    /// Let `lock` replace an existing token (unsafe).
    pub unprotected_runs: bool,
}

impl Config {
    /// Create a config builder
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Read the configuration from `LIGHTMILL_*` environment variables.
    ///
    /// Missing variables fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).is_some_and(|raw| is_truthy(&raw));
        Self {
            add_missing_measures: flag(ENV_ADD_MISSING_MEASURES),
            unprotected_runs: flag(ENV_UNPROTECTED_RUNS),
        }
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Config builder
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Enable or disable permissive measure registration
    #[must_use]
    pub const fn add_missing_measures(mut self, enabled: bool) -> Self {
        self.config.add_missing_measures = enabled;
        self
    }

    /// Enable or disable unprotected runs (development only)
    #[must_use]
    pub const fn unprotected_runs(mut self, enabled: bool) -> Self {
        self.config.unprotected_runs = enabled;
        self
    }

    /// Build the config
    #[must_use]
    pub const fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_is_strict_and_protected() {
        let config = Config::default();
        assert!(!config.add_missing_measures);
        assert!(!config.unprotected_runs);
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .add_missing_measures(true)
            .unprotected_runs(true)
            .build();
        assert!(config.add_missing_measures);
        assert!(config.unprotected_runs);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_ADD_MISSING_MEASURES, "Yes"),
            (ENV_UNPROTECTED_RUNS, "0"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|key| vars.get(key).map(ToString::to_string));
        assert!(config.add_missing_measures);
        assert!(!config.unprotected_runs);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: Config = serde_json::from_str(r#"{"unprotectedRuns": true}"#).unwrap();
        assert!(config.unprotected_runs);
        assert!(!config.add_missing_measures);
    }
}
