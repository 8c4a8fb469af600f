//! File-based bridge configuration.
//!
//! A [`BridgeConfig`] is the serializable subset of
//! [`BridgeOptions`](crate::BridgeOptions): embedders that build options in
//! code never need it, the CLI reads it from a JSON file.
//!
//! ```json
//! { "hash_seed": 7, "console": "stdio", "globals": ["parseInt", "isNaN"] }
//! ```

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;

use crate::{
    dispatch::DispatchTable,
    error::{BridgeError, BridgeResult},
    hash::DEFAULT_HASH_SEED,
};

/// Where flushed guest console lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsoleMode {
    /// `tracing` events under the `tether::guest` target.
    #[default]
    Log,
    /// The process's stdout and stderr.
    Stdio,
    /// Dropped.
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Seed of the identity hash sequence.
    pub hash_seed: u32,
    pub console: ConsoleMode,
    /// Built-in globals reachable from a null-receiver `callMethod`.
    pub globals: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hash_seed: DEFAULT_HASH_SEED,
            console: ConsoleMode::default(),
            globals: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json(text: &str) -> BridgeResult<Self> {
        Self::default().overlay_json(text)
    }

    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        Self::default().overlay_file(path)
    }

    /// Applies the keys of a JSON object on top of `self`; keys the text
    /// leaves out keep their current value.
    pub fn overlay_json(self, text: &str) -> BridgeResult<Self> {
        let overrides: Map<String, Value> = serde_json::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        let mut merged = serde_json::to_value(self).map_err(|e| BridgeError::Config(e.to_string()))?;
        if let Value::Object(fields) = &mut merged {
            fields.extend(overrides);
        }
        let config: Self = serde_json::from_value(merged).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// [`overlay_json`](Self::overlay_json) with the contents of `path`.
    pub fn overlay_file(self, path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        self.overlay_json(&text)
    }

    /// Checks that every listed global is a known built-in.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.hash_seed == 0 {
            return Err(BridgeError::Config("hash_seed must be non-zero".to_owned()));
        }
        self.dispatch_table().map(|_| ())
    }

    pub(crate) fn dispatch_table(&self) -> BridgeResult<DispatchTable> {
        DispatchTable::with_builtins(&self.globals)
    }
}


#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        assert_eq!(BridgeConfig::from_json("{}").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn full_config() {
        let config =
            BridgeConfig::from_json(r#"{"hash_seed": 7, "console": "silent", "globals": ["isNaN"]}"#).unwrap();
        assert_eq!(
            config,
            BridgeConfig {
                hash_seed: 7,
                console: ConsoleMode::Silent,
                globals: vec!["isNaN".to_owned()],
            }
        );
        assert_eq!(config.console.to_string(), "silent");
    }

    #[test]
    fn overlay_keeps_fields_the_file_leaves_out() {
        let base = BridgeConfig {
            console: ConsoleMode::Stdio,
            ..BridgeConfig::default()
        };
        let config = base.clone().overlay_json(r#"{"globals": ["parseInt"]}"#).unwrap();
        assert_eq!(config.console, ConsoleMode::Stdio);
        assert_eq!(config.hash_seed, DEFAULT_HASH_SEED);
        assert_eq!(config.globals, vec!["parseInt".to_owned()]);

        let config = base.overlay_json(r#"{"console": "silent"}"#).unwrap();
        assert_eq!(config.console, ConsoleMode::Silent);
    }

    #[test]
    fn overlay_rejects_non_objects() {
        assert!(matches!(
            BridgeConfig::default().overlay_json("[1, 2]"),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(matches!(
            BridgeConfig::from_json(r#"{"console": "loud"}"#),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json(r#"{"globals": ["eval"]}"#),
            Err(BridgeError::Config(message)) if message.contains("eval")
        ));
        assert!(matches!(
            BridgeConfig::from_json(r#"{"hash_seed": 0}"#),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json(r#"{"seed": 1}"#),
            Err(BridgeError::Config(_))
        ));
    }
}
