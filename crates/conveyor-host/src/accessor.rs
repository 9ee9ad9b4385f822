//! The host-provided config capability.
//!
//! Plugins may read their persistent configuration back out of the host
//! instead of having it pushed on every call. The capability is three
//! read-only operations over the `t_plugin_config` table
//! (`plugin_id VARCHAR`, `params JSON`, `config JSON`), served to the
//! plugin over its own RPC channel. Lookups that find nothing yield empty
//! strings, not errors; nothing is cached — callers decide.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, json};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use conveyor_core::RpcError;
use conveyor_rpc::proto::{ConfigQueryByKeyParams, ConfigQueryParams};
use conveyor_rpc::{ServiceHandler, methods};

/// Failure inside a config backend (not a missing row — those are empty
/// strings by contract).
#[derive(Debug, thiserror::Error)]
#[error("config store error: {0}")]
pub struct ConfigSourceError(String);

impl ConfigSourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<sqlx::Error> for ConfigSourceError {
    fn from(err: sqlx::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigSourceError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Read-only view over per-plugin persistent configuration.
#[async_trait]
pub trait ConfigSource: Send + Sync + 'static {
    /// The `config` blob for `plugin_id` as a JSON string; `""` if the row
    /// is absent.
    async fn query_config(&self, plugin_id: &str) -> Result<String, ConfigSourceError>;

    /// One key inside the `config` blob, re-serialised; `""` if the row or
    /// the key is absent.
    async fn query_config_by_key(
        &self,
        plugin_id: &str,
        key: &str,
    ) -> Result<String, ConfigSourceError>;

    /// Every row as a JSON array string.
    async fn list_configs(&self) -> Result<String, ConfigSourceError>;
}

fn value_by_key(config_json: &str, key: &str) -> Result<String, ConfigSourceError> {
    if config_json.is_empty() {
        return Ok(String::new());
    }
    let blob: Value = serde_json::from_str(config_json)?;
    match blob.get(key) {
        Some(value) => Ok(serde_json::to_string(value)?),
        None => Ok(String::new()),
    }
}

// =============================================================================
// SqlConfigStore
// =============================================================================

/// [`ConfigSource`] over the `t_plugin_config` table. Issues only
/// `SELECT` statements; the core never writes this table.
pub struct SqlConfigStore {
    pool: SqlitePool,
}

impl SqlConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigSource for SqlConfigStore {
    async fn query_config(&self, plugin_id: &str) -> Result<String, ConfigSourceError> {
        let row = sqlx::query("SELECT config FROM t_plugin_config WHERE plugin_id = ?")
            .bind(plugin_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<String, _>("config").unwrap_or_default()),
            None => {
                debug!(plugin_id, "no config row");
                Ok(String::new())
            }
        }
    }

    async fn query_config_by_key(
        &self,
        plugin_id: &str,
        key: &str,
    ) -> Result<String, ConfigSourceError> {
        let config = self.query_config(plugin_id).await?;
        value_by_key(&config, key)
    }

    async fn list_configs(&self) -> Result<String, ConfigSourceError> {
        let rows = sqlx::query("SELECT plugin_id, params, config FROM t_plugin_config")
            .fetch_all(&self.pool)
            .await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let plugin_id: String = row.try_get("plugin_id").unwrap_or_default();
            let params: String = row.try_get("params").unwrap_or_default();
            let config: String = row.try_get("config").unwrap_or_default();
            entries.push(json!({
                "pluginId": plugin_id,
                "params": parse_or_null(&params),
                "config": parse_or_null(&config),
            }));
        }
        Ok(serde_json::to_string(&entries)?)
    }
}

fn parse_or_null(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or(Value::Null)
}

// =============================================================================
// MemoryConfigStore
// =============================================================================

/// In-memory [`ConfigSource`] for hosts without a database and for tests.
#[derive(Default)]
pub struct MemoryConfigStore {
    rows: RwLock<HashMap<String, (Value, Value)>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the row for `plugin_id`.
    pub fn insert(&self, plugin_id: impl Into<String>, params: Value, config: Value) {
        self.rows.write().insert(plugin_id.into(), (params, config));
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigStore {
    async fn query_config(&self, plugin_id: &str) -> Result<String, ConfigSourceError> {
        match self.rows.read().get(plugin_id) {
            Some((_, config)) => Ok(serde_json::to_string(config)?),
            None => Ok(String::new()),
        }
    }

    async fn query_config_by_key(
        &self,
        plugin_id: &str,
        key: &str,
    ) -> Result<String, ConfigSourceError> {
        let config = self.query_config(plugin_id).await?;
        value_by_key(&config, key)
    }

    async fn list_configs(&self) -> Result<String, ConfigSourceError> {
        let rows = self.rows.read();
        let mut ids: Vec<&String> = rows.keys().collect();
        ids.sort();
        let entries: Vec<Value> = ids
            .into_iter()
            .map(|id| {
                let (params, config) = &rows[id];
                json!({ "pluginId": id, "params": params, "config": config })
            })
            .collect();
        serde_json::to_string(&entries).map_err(ConfigSourceError::from)
    }
}

// =============================================================================
// RPC adapter
// =============================================================================

/// Serves the `host.*` methods on a plugin channel from a [`ConfigSource`].
pub(crate) struct HostCapability {
    source: Arc<dyn ConfigSource>,
}

impl HostCapability {
    pub(crate) fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ServiceHandler for HostCapability {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            methods::CONFIG_QUERY => {
                let query: ConfigQueryParams = serde_json::from_value(params)
                    .map_err(|err| RpcError::invalid_params(err.to_string()))?;
                let config = self
                    .source
                    .query_config(&query.plugin_id)
                    .await
                    .map_err(|err| RpcError::internal(err.to_string()))?;
                Ok(json!(config))
            }
            methods::CONFIG_QUERY_BY_KEY => {
                let query: ConfigQueryByKeyParams = serde_json::from_value(params)
                    .map_err(|err| RpcError::invalid_params(err.to_string()))?;
                let value = self
                    .source
                    .query_config_by_key(&query.plugin_id, &query.key)
                    .await
                    .map_err(|err| RpcError::internal(err.to_string()))?;
                Ok(json!(value))
            }
            methods::CONFIG_LIST => {
                let list = self
                    .source
                    .list_configs()
                    .await
                    .map_err(|err| RpcError::internal(err.to_string()))?;
                Ok(json!(list))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }
}
