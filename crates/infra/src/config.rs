//! Engine configuration.
//!
//! Values come from the process environment:
//!
//! - `STOCKLEDGER_DEDUCTION_POLICY`: `floor` (default) or `reject`
//! - `STOCKLEDGER_MAX_APPEND_RETRIES`: re-reads allowed after a concurrency conflict (default 3)
//! - `DATABASE_URL`: only read when the Postgres store is used

use serde::Deserialize;
use thiserror::Error;

use stockledger_inventory::DeductionPolicy;

pub const DEDUCTION_POLICY_ENV: &str = "STOCKLEDGER_DEDUCTION_POLICY";
pub const MAX_APPEND_RETRIES_ENV: &str = "STOCKLEDGER_MAX_APPEND_RETRIES";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

const DEFAULT_MAX_APPEND_RETRIES: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{key} must be set")]
    Missing { key: &'static str },
}

/// Connection string for the Postgres store.
pub fn database_url_from_env() -> Result<String, ConfigError> {
    database_url(|key| std::env::var(key).ok())
}

fn database_url(lookup: impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    lookup(DATABASE_URL_ENV)
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or(ConfigError::Missing {
            key: DATABASE_URL_ENV,
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// What job deduction does when a line asks for more than is on hand.
    pub deduction_policy: DeductionPolicy,
    /// How many times an append re-reads the part after a concurrency conflict.
    pub max_append_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deduction_policy: DeductionPolicy::Floor,
            max_append_retries: DEFAULT_MAX_APPEND_RETRIES,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(DEDUCTION_POLICY_ENV) {
            config.deduction_policy = raw.parse().map_err(|e| ConfigError::Invalid {
                key: DEDUCTION_POLICY_ENV,
                reason: format!("{e}"),
            })?;
        }

        if let Some(raw) = lookup(MAX_APPEND_RETRIES_ENV) {
            config.max_append_retries = raw.trim().parse().map_err(|e| ConfigError::Invalid {
                key: MAX_APPEND_RETRIES_ENV,
                reason: format!("{e}"),
            })?;
        }

        Ok(config)
    }

    pub fn with_deduction_policy(mut self, policy: DeductionPolicy) -> Self {
        self.deduction_policy = policy;
        self
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
    fn defaults_keep_floor_policy() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.deduction_policy, DeductionPolicy::Floor);
        assert_eq!(config.max_append_retries, 3);
    }

    #[test]
    fn reads_policy_and_retries() {
        let config = EngineConfig::from_lookup(lookup(&[
            (DEDUCTION_POLICY_ENV, "reject"),
            (MAX_APPEND_RETRIES_ENV, " 7 "),
        ]))
        .unwrap();
        assert_eq!(config.deduction_policy, DeductionPolicy::Reject);
        assert_eq!(config.max_append_retries, 7);
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = EngineConfig::from_lookup(lookup(&[(DEDUCTION_POLICY_ENV, "backorder")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == DEDUCTION_POLICY_ENV));
    }

    #[test]
    fn rejects_non_numeric_retries() {
        let err = EngineConfig::from_lookup(lookup(&[(MAX_APPEND_RETRIES_ENV, "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == MAX_APPEND_RETRIES_ENV));
    }

    #[test]
    fn database_url_must_be_present() {
        assert_eq!(
            database_url(lookup(&[(DATABASE_URL_ENV, " postgres://localhost/stock ")])).unwrap(),
            "postgres://localhost/stock"
        );
        assert_eq!(
            database_url(lookup(&[(DATABASE_URL_ENV, "  ")])).unwrap_err(),
            ConfigError::Missing {
                key: DATABASE_URL_ENV
            }
        );
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "deduction_policy": "reject" }"#).unwrap();
        assert_eq!(config.deduction_policy, DeductionPolicy::Reject);
        assert_eq!(config.max_append_retries, 3);
    }
}
