//! Configuration for the GROUP BY check.
//!
//! The server-side equivalent is a pair of session switches; here they live
//! in a plain serde struct so the driver can load them from JSON, from a
//! `sql_mode` string, or from the environment. Environment variables are
//! prefixed with `FDCHECK_`.

use serde::{Deserialize, Serialize};

use crate::error::FdCheckError;

/// Environment variable overriding [`CheckConfig::only_full_group_by`].
pub const ENV_ONLY_FULL_GROUP_BY: &str = "FDCHECK_ONLY_FULL_GROUP_BY";

/// Environment variable overriding [`CheckConfig::key_propagation`].
pub const ENV_KEY_PROPAGATION: &str = "FDCHECK_KEY_PROPAGATION";

/// The `sql_mode` flag that turns the check on.
const MODE_ONLY_FULL_GROUP_BY: &str = "ONLY_FULL_GROUP_BY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Master switch. When false, [`crate::check_statement`] accepts every
    /// statement without looking at it.
    pub only_full_group_by: bool,

    /// Promote a whole table to allowed once one of its PRIMARY or UNIQUE
    /// keys is fully allowed.
    ///
    /// Disabling this only makes the check stricter; it exists to compare
    /// diagnostics with and without key information.
    pub key_propagation: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            only_full_group_by: true,
            key_propagation: true,
        }
    }
}

impl CheckConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, FdCheckError> {
        serde_json::from_str(json)
            .map_err(|e| FdCheckError::InvalidArgument(format!("invalid check config: {e}")))
    }

    /// Derive a configuration from a comma-separated `sql_mode` value.
    ///
    /// Only `ONLY_FULL_GROUP_BY` is significant; other flags are ignored.
    /// Matching is case-insensitive and tolerates surrounding whitespace.
    pub fn from_sql_mode(sql_mode: &str) -> Self {
        let only_full_group_by = sql_mode
            .split(',')
            .map(str::trim)
            .any(|flag| flag.eq_ignore_ascii_case(MODE_ONLY_FULL_GROUP_BY));
        Self {
            only_full_group_by,
            ..Self::default()
        }
    }

    /// Apply `FDCHECK_*` environment overrides on top of `self`.
    pub fn apply_env_overrides(self) -> Result<Self, FdCheckError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, FdCheckError> {
        if let Some(raw) = lookup(ENV_ONLY_FULL_GROUP_BY) {
            self.only_full_group_by = parse_bool(ENV_ONLY_FULL_GROUP_BY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_KEY_PROPAGATION) {
            self.key_propagation = parse_bool(ENV_KEY_PROPAGATION, &raw)?;
        }
        Ok(self)
    }
}

/// Accepts the spellings a `bool` GUC accepts.
fn parse_bool(name: &str, raw: &str) -> Result<bool, FdCheckError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Ok(true),
        "0" | "off" | "false" | "no" => Ok(false),
        other => Err(FdCheckError::InvalidArgument(format!(
            "{name}: expected a boolean, got '{other}'"
        ))),
    }
}
