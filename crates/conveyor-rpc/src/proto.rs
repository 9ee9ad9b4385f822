//! Envelope and payload types for the JSON-line protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use conveyor_core::RpcError;

/// Protocol marker carried on every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names spoken on the channel.
///
/// `plugin.*` methods flow host → plugin; `host.*` methods flow plugin →
/// host over the same established channel (the config capability is not a
/// separate endpoint).
pub mod methods {
    pub const PING: &str = "plugin.ping";
    pub const GET_INFO: &str = "plugin.get_info";
    pub const GET_METRICS: &str = "plugin.get_metrics";
    pub const INIT: &str = "plugin.init";
    pub const CLEANUP: &str = "plugin.cleanup";
    pub const EXECUTE: &str = "plugin.execute";

    pub const CONFIG_QUERY: &str = "host.config_query";
    pub const CONFIG_QUERY_BY_KEY: &str = "host.config_query_by_key";
    pub const CONFIG_LIST: &str = "host.config_list";
}

// =============================================================================
// Envelope
// =============================================================================

/// One newline-delimited frame.
///
/// A frame with a `method` is a request; a frame without one is the
/// response to the request with the same `id`. Business failures ride in
/// `error` — they complete the call like any response and never tear down
/// the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "jsonrpc", default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Envelope {
    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Self {
            version: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn response(id: u64, result: Value) -> Self {
        Self {
            version: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(id: u64, error: RpcError) -> Self {
        Self {
            version: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// Whether this frame asks the receiver to do something.
    pub fn is_request(&self) -> bool {
        self.method.is_some()
    }
}

// =============================================================================
// Method payloads
// =============================================================================

/// Parameters of `plugin.execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteParams {
    pub action: String,
    /// Opaque JSON the action interprets.
    #[serde(default)]
    pub params: Value,
    /// Opaque per-call options.
    #[serde(default)]
    pub opts: Value,
}

/// Parameters of `plugin.init`: the opaque config blob, verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitParams {
    #[serde(default)]
    pub config: Value,
}

/// Parameters of `host.config_query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigQueryParams {
    pub plugin_id: String,
}

/// Parameters of `host.config_query_by_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigQueryByKeyParams {
    pub plugin_id: String,
    pub key: String,
}
