//! Host-side per-plugin registration configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::info::PluginType;

/// Configuration the host records when registering a plugin.
///
/// The `config` blob is opaque to the host: it is handed to the plugin
/// verbatim on `init` and re-applied unchanged on every reload. The host
/// neither validates nor mutates it. `environment` entries are appended
/// verbatim to the child process environment; `task_id`, when present, is
/// exported for log correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimePluginConfig {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "type", default)]
    pub plugin_type: PluginType,
    /// Opaque JSON blob passed to the plugin on `init`.
    #[serde(default = "empty_object")]
    pub config: Value,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl RuntimePluginConfig {
    /// Creates the default registration record for `name`: empty-JSON
    /// config, no environment, no task correlation. Version and type are
    /// expected to come from the plugin itself on `get_info`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            plugin_type: PluginType::Unspecified,
            config: empty_object(),
            environment: HashMap::new(),
            task_id: None,
        }
    }

    /// Replaces the opaque config blob.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Adds one environment entry for the child process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Sets the task id used for log correlation.
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_an_empty_object() {
        let cfg = RuntimePluginConfig::new("shell");
        assert_eq!(cfg.config, serde_json::json!({}));
        assert!(cfg.environment.is_empty());
        assert_eq!(cfg.plugin_type, PluginType::Unspecified);
    }

    #[test]
    fn blob_survives_serde_untouched() {
        let blob = serde_json::json!({"shell": "/bin/sh", "nested": {"n": 1}});
        let cfg = RuntimePluginConfig::new("shell").with_config(blob.clone());
        let round: RuntimePluginConfig =
            serde_json::from_str(&serde_json::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(round.config, blob);
    }

    #[test]
    fn missing_fields_deserialise_to_defaults() {
        let cfg: RuntimePluginConfig = serde_json::from_str(r#"{"name":"git"}"#).unwrap();
        assert_eq!(cfg.name, "git");
        assert_eq!(cfg.config, serde_json::json!({}));
        assert!(cfg.task_id.is_none());
    }
}
