//! In-plugin action table.
//!
//! The registry is the single dispatch point of a plugin: every `execute`
//! call resolves its action name here. Registration is last-wins so that a
//! plugin can swap a handler at runtime without a ceremony, and a miss
//! produces an error that enumerates the registered names — the cheapest
//! form of introspection a caller gets.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use conveyor_core::RpcError;

/// Boxed async action handler: `(params, opts) → result`.
///
/// Both arguments are opaque JSON; interpretation belongs to the handler.
/// Handlers must be reentrant-safe — the host may run several `execute`
/// calls concurrently.
pub type ActionHandler =
    Arc<dyn Fn(Value, Value) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Boxes a plain async closure into an [`ActionHandler`].
pub fn handler<F, Fut>(f: F) -> ActionHandler
where
    F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    Arc::new(move |params, opts| Box::pin(f(params, opts)))
}

// =============================================================================
// ActionInfo
// =============================================================================

/// Wire-safe metadata for one action (no handler attached).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Optional schema blob describing the expected params.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Optional schema blob describing the result shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Value>,
}

impl ActionInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: None,
            returns: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_returns(mut self, returns: Value) -> Self {
        self.returns = Some(returns);
        self
    }
}

struct ActionEntry {
    info: ActionInfo,
    handler: ActionHandler,
}

// =============================================================================
// ActionRegistry
// =============================================================================

/// Thread-safe map from action name to handler.
///
/// Names are case-sensitive and unique within one plugin; the same name may
/// mean something entirely different in another plugin.
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, ActionEntry>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action. Re-registering the same name replaces the prior
    /// entry without error so in-plugin code paths can be hot-swapped.
    pub fn register(&self, info: ActionInfo, handler: ActionHandler) {
        let name = info.name.clone();
        self.actions
            .write()
            .insert(name, ActionEntry { info, handler });
    }

    /// Removes an action; returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.actions.write().remove(name).is_some()
    }

    /// Removes every action.
    pub fn clear(&self) {
        self.actions.write().clear();
    }

    pub fn count(&self) -> usize {
        self.actions.read().len()
    }

    /// Sorted names of the registered actions.
    pub fn list_actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted metadata records, safe to return over the wire.
    pub fn action_infos(&self) -> Vec<ActionInfo> {
        let mut infos: Vec<ActionInfo> =
            self.actions.read().values().map(|e| e.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn get_info(&self, name: &str) -> Option<ActionInfo> {
        self.actions.read().get(name).map(|e| e.info.clone())
    }

    /// Updates an action's description in place; returns whether it existed.
    pub fn set_description(&self, name: &str, description: impl Into<String>) -> bool {
        match self.actions.write().get_mut(name) {
            Some(entry) => {
                entry.info.description = description.into();
                true
            }
            None => false,
        }
    }

    /// Updates an action's schema blobs in place; returns whether it existed.
    pub fn set_schemas(&self, name: &str, args: Option<Value>, returns: Option<Value>) -> bool {
        match self.actions.write().get_mut(name) {
            Some(entry) => {
                entry.info.args = args;
                entry.info.returns = returns;
                true
            }
            None => false,
        }
    }

    /// Dispatches `action`. A miss returns [`RpcError::unknown_action`]
    /// with the registered names in the message.
    pub async fn execute(
        &self,
        action: &str,
        params: Value,
        opts: Value,
    ) -> Result<Value, RpcError> {
        // Clone the handler out so the lock is not held across the await.
        let handler = {
            let actions = self.actions.read();
            match actions.get(action) {
                Some(entry) => Arc::clone(&entry.handler),
                None => {
                    let mut names: Vec<String> = actions.keys().cloned().collect();
                    names.sort();
                    return Err(RpcError::unknown_action(action, &names));
                }
            }
        };
        handler(params, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_registry() -> ActionRegistry {
        let registry = ActionRegistry::new();
        registry.register(
            ActionInfo::new("echo", "returns its params"),
            handler(|params, _opts| async move { Ok(params) }),
        );
        registry.register(
            ActionInfo::new("fail", "always fails"),
            handler(|_params, _opts| async move { Err(RpcError::new(1, "nope")) }),
        );
        registry
    }

    #[tokio::test]
    async fn dispatch_reaches_handler_verbatim() {
        let registry = echo_registry();
        let params = json!({"x": 1});
        let result = registry
            .execute("echo", params.clone(), Value::Null)
            .await
            .unwrap();
        assert_eq!(result, params);
    }

    #[tokio::test]
    async fn miss_enumerates_registered_names() {
        let registry = echo_registry();
        let err = registry
            .execute("missing", Value::Null, Value::Null)
            .await
            .unwrap_err();
        assert!(err.message.contains("unknown action"));
        assert!(err.message.contains("echo"));
        assert!(err.message.contains("fail"));
    }

    #[tokio::test]
    async fn reregistration_replaces_silently() {
        let registry = echo_registry();
        registry.register(
            ActionInfo::new("echo", "now constant"),
            handler(|_p, _o| async move { Ok(json!("replaced")) }),
        );
        assert_eq!(registry.count(), 2);
        let result = registry
            .execute("echo", json!("ignored"), Value::Null)
            .await
            .unwrap();
        assert_eq!(result, json!("replaced"));
        assert_eq!(
            registry.get_info("echo").unwrap().description,
            "now constant"
        );
    }

    #[test]
    fn infos_are_sorted_and_handler_free() {
        let registry = echo_registry();
        let infos = registry.action_infos();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].name, "echo");
        assert_eq!(infos[1].name, "fail");
        assert_eq!(registry.list_actions(), vec!["echo", "fail"]);
    }

    #[test]
    fn metadata_setters_report_existence() {
        let registry = echo_registry();
        assert!(registry.set_description("echo", "updated"));
        assert!(!registry.set_description("missing", "updated"));
        assert!(registry.set_schemas("echo", Some(json!({"type": "object"})), None));
        assert_eq!(
            registry.get_info("echo").unwrap().args,
            Some(json!({"type": "object"}))
        );
    }

    #[test]
    fn clear_empties_the_table() {
        let registry = echo_registry();
        registry.clear();
        assert_eq!(registry.count(), 0);
        assert!(registry.list_actions().is_empty());
    }
}
