//! Plugin identity types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// PluginType
// =============================================================================

/// Functional kind of a plugin.
///
/// The kind is **advisory metadata**: it never changes the RPC surface, and
/// the host dispatches every plugin through the same uniform `execute`
/// contract regardless of kind. [`PluginType::Unspecified`] is a sentinel
/// for partially-populated records and must never appear in a healthy
/// plugin's [`PluginInfo`](crate::PluginInfo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Source,
    Build,
    Test,
    Deploy,
    Security,
    Notify,
    Approval,
    Storage,
    Analytics,
    Integration,
    Custom,
    #[default]
    Unspecified,
}

impl PluginType {
    /// Returns `true` unless this is the [`Unspecified`](Self::Unspecified)
    /// sentinel.
    pub fn is_specified(self) -> bool {
        self != PluginType::Unspecified
    }

    /// The lowercase wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            PluginType::Source => "source",
            PluginType::Build => "build",
            PluginType::Test => "test",
            PluginType::Deploy => "deploy",
            PluginType::Security => "security",
            PluginType::Notify => "notify",
            PluginType::Approval => "approval",
            PluginType::Storage => "storage",
            PluginType::Analytics => "analytics",
            PluginType::Integration => "integration",
            PluginType::Custom => "custom",
            PluginType::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = UnknownPluginType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(PluginType::Source),
            "build" => Ok(PluginType::Build),
            "test" => Ok(PluginType::Test),
            "deploy" => Ok(PluginType::Deploy),
            "security" => Ok(PluginType::Security),
            "notify" => Ok(PluginType::Notify),
            "approval" => Ok(PluginType::Approval),
            "storage" => Ok(PluginType::Storage),
            "analytics" => Ok(PluginType::Analytics),
            "integration" => Ok(PluginType::Integration),
            "custom" => Ok(PluginType::Custom),
            "unspecified" => Ok(PluginType::Unspecified),
            other => Err(UnknownPluginType(other.to_string())),
        }
    }
}

/// Parse error for [`PluginType`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown plugin type '{0}'")]
pub struct UnknownPluginType(pub String);

// =============================================================================
// PluginInfo
// =============================================================================

/// Identity record a plugin declares about itself.
///
/// Returned by the `plugin.get_info` RPC and immutable for the lifetime of a
/// given plugin process. `name` must be unique within one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
}

impl PluginInfo {
    /// Creates an info record with the required identity fields.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        plugin_type: PluginType,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            plugin_type,
            description: String::new(),
            author: String::new(),
            homepage: None,
        }
    }

    /// Sets the one-line description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the author field.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Sets the homepage URL.
    pub fn with_homepage(mut self, homepage: impl Into<String>) -> Self {
        self.homepage = Some(homepage.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_type_wire_names_round_trip() {
        for ty in [
            PluginType::Source,
            PluginType::Build,
            PluginType::Notify,
            PluginType::Custom,
            PluginType::Unspecified,
        ] {
            assert_eq!(ty.as_str().parse::<PluginType>().unwrap(), ty);
        }
    }

    #[test]
    fn plugin_type_serialises_lowercase() {
        let json = serde_json::to_string(&PluginType::Deploy).unwrap();
        assert_eq!(json, "\"deploy\"");
    }

    #[test]
    fn info_type_field_is_renamed() {
        let info = PluginInfo::new("shell", "1.0.0", PluginType::Build)
            .with_description("runs shell commands");
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["type"], "build");
        assert_eq!(value["name"], "shell");
        assert!(value.get("homepage").is_none());
    }

    #[test]
    fn unspecified_is_flagged() {
        assert!(!PluginType::Unspecified.is_specified());
        assert!(PluginType::Storage.is_specified());
    }
}
