//! Plugin metrics snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::info::PluginType;

/// Coarse health of a plugin as reported in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Running,
    Error,
    #[default]
    Unknown,
}

/// Point-in-time metrics snapshot returned by `plugin.get_metrics`.
///
/// Counters are maintained by the plugin side: `call_count` increments on
/// every execute, `error_count` on every business error, and
/// `last_error`/`last_call_time` track the most recent of each. `uptime`
/// is seconds since a successful init. The host may poll this at any
/// frequency; producing a snapshot never blocks plugin work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetrics {
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub version: String,
    pub status: PluginStatus,
    /// Seconds since init; zero before the plugin initialised.
    pub uptime: u64,
    pub call_count: u64,
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_call_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_metrics: HashMap<String, Value>,
}

impl PluginMetrics {
    /// An all-zero snapshot for a plugin that has not initialised yet.
    pub fn empty(name: impl Into<String>, plugin_type: PluginType, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_type,
            version: version.into(),
            status: PluginStatus::Unknown,
            uptime: 0,
            call_count: 0,
            error_count: 0,
            last_error: None,
            last_call_time: None,
            custom_metrics: HashMap::new(),
        }
    }

    /// Synthetic `status: error` record the host substitutes when a metrics
    /// call fails, so observers always see the full plugin set.
    pub fn error_record(
        name: impl Into<String>,
        plugin_type: PluginType,
        version: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut metrics = Self::empty(name, plugin_type, version);
        metrics.status = PluginStatus::Error;
        metrics.last_error = Some(error.into());
        metrics
    }
}
