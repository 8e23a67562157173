//! Client-side tools the remote agent may invoke mid-call.
//!
//! A tool receives a JSON-object parameter payload and answers with a short
//! natural-language acknowledgment, which the agent relays back into the
//! spoken conversation.

use crate::error::{SessionError, ToolError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Acknowledgment used when a tool answers with structured data.
const NEUTRAL_ACKNOWLEDGMENT: &str = "Done.";

/// A locally implemented capability the remote agent can call.
#[async_trait]
pub trait ClientTool: Send + Sync {
    async fn call(&self, parameters: Value) -> Result<String, ToolError>;
}

/// Adapts a plain closure into a [`ClientTool`].
pub struct FnTool<F>(F);

impl<F> FnTool<F>
where
    F: Fn(Value) -> Result<String, ToolError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> ClientTool for FnTool<F>
where
    F: Fn(Value) -> Result<String, ToolError> + Send + Sync,
{
    async fn call(&self, parameters: Value) -> Result<String, ToolError> {
        (self.0)(parameters)
    }
}

/// Name-to-implementation lookup and dispatch.
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn ClientTool>>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool` under `name`, replacing any previous implementation.
    pub fn register(&self, name: impl Into<String>, tool: Arc<dyn ClientTool>) {
        let name = name.into();
        info!(tool = %name, "Registering client tool");
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, tool);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn clear(&self) {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ClientTool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered tool names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatches an invocation to the named tool.
    pub async fn invoke(&self, name: &str, parameters: Value) -> Result<String, SessionError> {
        let tool = self
            .get(name)
            .ok_or_else(|| SessionError::UnknownTool(name.to_string()))?;

        info!(tool = %name, "Executing client tool");
        let acknowledgment = tool
            .call(parameters)
            .await
            .map_err(|e| SessionError::ToolFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(natural_language(name, acknowledgment))
    }
}

/// Replaces structured payloads with a neutral acknowledgment; the agent
/// would otherwise read raw JSON aloud.
fn natural_language(tool: &str, acknowledgment: String) -> String {
    let trimmed = acknowledgment.trim();
    let structured = matches!(
        serde_json::from_str::<Value>(trimmed),
        Ok(Value::Object(_)) | Ok(Value::Array(_))
    );
    if structured || trimmed.is_empty() {
        warn!(tool = %tool, "Tool returned a non-conversational acknowledgment; replacing it");
        return NEUTRAL_ACKNOWLEDGMENT.to_string();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool() -> Arc<dyn ClientTool> {
        Arc::new(FnTool::new(|params| {
            Ok(format!(
                "Got {}.",
                params["item"].as_str().unwrap_or("nothing")
            ))
        }))
    }

    #[tokio::test]
    async fn test_invoke_registered_tool() {
        let registry = ToolRegistry::new();
        registry.register("echo", echo_tool());

        let ack = registry
            .invoke("echo", json!({"item": "fries"}))
            .await
            .unwrap();
        assert_eq!(ack, "Got fries.");
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool_fails() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownTool(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_structured_acknowledgment_is_replaced() {
        let registry = ToolRegistry::new();
        registry.register(
            "leaky",
            Arc::new(FnTool::new(|_| Ok(r#"{"status":"ok"}"#.to_string()))),
        );
        assert_eq!(
            registry.invoke("leaky", json!({})).await.unwrap(),
            NEUTRAL_ACKNOWLEDGMENT
        );
    }

    #[tokio::test]
    async fn test_tool_failure_is_reported() {
        let registry = ToolRegistry::new();
        registry.register(
            "broken",
            Arc::new(FnTool::new(|_| Err(ToolError::Failed("boom".to_string())))),
        );
        let err = registry.invoke("broken", json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::ToolFailed { name, .. } if name == "broken"));
    }

    #[test]
    fn test_clones_share_registrations() {
        let registry = ToolRegistry::new();
        let clone = registry.clone();
        clone.register("echo", echo_tool());
        assert!(registry.contains("echo"));
        assert_eq!(registry.names(), vec!["echo".to_string()]);

        assert!(registry.unregister("echo"));
        assert!(clone.is_empty());
    }
}
