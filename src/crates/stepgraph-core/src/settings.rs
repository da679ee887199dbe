//! Engine settings
//!
//! [`EngineSettings`] holds the knobs that apply to every run of a compiled
//! graph. They can be written in YAML and overridden from the environment:
//!
//! ```yaml
//! recursion_limit: 50
//! stream_mode: [values, updates]
//! checkpoint_ns: demo
//! ```
//!
//! | Variable | Field |
//! |----------|-------|
//! | `STEPGRAPH_RECURSION_LIMIT` | `recursion_limit` |
//! | `STEPGRAPH_STREAM_MODE` | `stream_mode` (comma separated) |
//! | `STEPGRAPH_CHECKPOINT_NS` | `checkpoint_ns` |
//!
//! Run-scoped settings (thread id, user keys) travel in
//! [`CheckpointConfig`](stepgraph_checkpoint::CheckpointConfig) instead.

use crate::error::{GraphError, Result};
use crate::stream::StreamMode;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

pub const ENV_RECURSION_LIMIT: &str = "STEPGRAPH_RECURSION_LIMIT";
pub const ENV_STREAM_MODE: &str = "STEPGRAPH_STREAM_MODE";
pub const ENV_CHECKPOINT_NS: &str = "STEPGRAPH_CHECKPOINT_NS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum supersteps per invocation
    pub recursion_limit: usize,

    /// Modes used by `stream` when the caller does not pick any
    pub stream_mode: Vec<StreamMode>,

    /// Namespace applied to run configs that do not set one
    pub checkpoint_ns: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            recursion_limit: 25,
            stream_mode: vec![StreamMode::Values],
            checkpoint_ns: None,
        }
    }
}

impl EngineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_stream_mode(mut self, modes: Vec<StreamMode>) -> Self {
        self.stream_mode = modes;
        self
    }

    pub fn with_checkpoint_ns(mut self, ns: impl Into<String>) -> Self {
        self.checkpoint_ns = Some(ns.into());
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Apply `STEPGRAPH_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(get_env)
    }

    /// Apply overrides looked up through `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        if let Some(limit) = parse_var::<usize>(ENV_RECURSION_LIMIT, lookup(ENV_RECURSION_LIMIT)?)? {
            self.recursion_limit = limit;
        }
        if let Some(modes) = lookup(ENV_STREAM_MODE)? {
            self.stream_mode = modes
                .split(',')
                .filter(|mode| !mode.trim().is_empty())
                .map(StreamMode::from_str)
                .collect::<Result<_>>()?;
        }
        if let Some(ns) = lookup(ENV_CHECKPOINT_NS)? {
            self.checkpoint_ns = Some(ns).filter(|ns| !ns.is_empty());
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.recursion_limit == 0 {
            return Err(GraphError::Configuration(
                "recursion_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read an environment variable, treating absence as `None`
fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(GraphError::Configuration(format!(
            "environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

fn parse_var<T>(key: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                GraphError::Configuration(format!("failed to parse {}: {}", key, e))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<Option<String>> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| Ok(vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.recursion_limit, 25);
        assert_eq!(settings.stream_mode, vec![StreamMode::Values]);
        assert!(settings.checkpoint_ns.is_none());
    }

    #[test]
    fn test_yaml_with_partial_fields() {
        let settings = EngineSettings::from_yaml_str("recursion_limit: 5\nstream_mode: [updates, custom]\n").unwrap();
        assert_eq!(settings.recursion_limit, 5);
        assert_eq!(settings.stream_mode, vec![StreamMode::Updates, StreamMode::Custom]);
        assert!(settings.checkpoint_ns.is_none());
    }

    #[test]
    fn test_yaml_rejects_zero_limit() {
        assert!(matches!(
            EngineSettings::from_yaml_str("recursion_limit: 0"),
            Err(GraphError::Configuration(_))
        ));
        assert!(matches!(
            EngineSettings::from_yaml_str("recursion_limit: [1"),
            Err(GraphError::Yaml(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let settings = EngineSettings::default()
            .with_overrides(lookup(&[
                (ENV_RECURSION_LIMIT, "40"),
                (ENV_STREAM_MODE, "values, checkpoints"),
                (ENV_CHECKPOINT_NS, "prod"),
            ]))
            .unwrap();
        assert_eq!(settings.recursion_limit, 40);
        assert_eq!(settings.stream_mode, vec![StreamMode::Values, StreamMode::Checkpoints]);
        assert_eq!(settings.checkpoint_ns.as_deref(), Some("prod"));
    }

    #[test]
    fn test_bad_override_is_reported() {
        let err = EngineSettings::default()
            .with_overrides(lookup(&[(ENV_RECURSION_LIMIT, "many")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_RECURSION_LIMIT));
    }
}
