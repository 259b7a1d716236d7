use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

fn valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/'))
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, input: Value) -> Result<Value>;
}

pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

/// Registry of invocable tools exposed by orchestrators that offer an
/// RPC surface. Registration rejects duplicate or malformed names;
/// invocation validates input against the registered JSON Schema
/// before dispatch.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDefinition>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, tool: ToolDefinition) -> Result<()> {
        if !valid_tool_name(&tool.name) {
            return Err(OrchestratorError::invalid(format!(
                "invalid tool name: {}",
                tool.name
            )));
        }
        let mut tools = self.tools.write().await;
        if tools.contains_key(&tool.name) {
            return Err(OrchestratorError::invalid(format!(
                "tool '{}' already registered",
                tool.name
            )));
        }
        tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub async fn list(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    /// Validates `input` against the tool's schema, then dispatches to
    /// its handler. Schema validation failures surface as `InvalidInput`
    /// without invoking the handler.
    pub async fn invoke(&self, name: &str, input: Value) -> Result<Value> {
        let (schema, handler) = {
            let tools = self.tools.read().await;
            let tool = tools
                .get(name)
                .ok_or_else(|| OrchestratorError::not_found(format!("tool {name}")))?;
            (tool.input_schema.clone(), tool.handler.clone())
        };

        validate_against_schema(&schema, &input)?;
        handler.invoke(input).await
    }
}

/// A deliberately small JSON-Schema subset: object-with-required-fields
/// and declared property types. Sufficient for tool-input validation
/// without pulling in a full schema validator crate.
fn validate_against_schema(schema: &Value, input: &Value) -> Result<()> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if schema_obj.get("type").and_then(Value::as_str) == Some("object") && !input.is_object() {
        return Err(OrchestratorError::invalid("tool input must be an object"));
    }

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        let input_obj = input
            .as_object()
            .ok_or_else(|| OrchestratorError::invalid("tool input must be an object"))?;
        for field in required {
            let Some(field_name) = field.as_str() else { continue };
            if !input_obj.contains_key(field_name) {
                return Err(OrchestratorError::invalid(format!(
                    "missing required field '{field_name}'"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn invoke(&self, input: Value) -> Result<Value> {
            Ok(input)
        }
    }

    fn echo_tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: "echoes input".to_string(),
            input_schema: json!({"type": "object", "required": ["message"]}),
            handler: Arc::new(EchoTool),
        }
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).await.unwrap();
        let result = registry.register(echo_tool("echo")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invalid_name_is_rejected() {
        let registry = ToolRegistry::new();
        let result = registry.register(echo_tool("bad name!")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invoke_validates_required_fields_before_dispatch() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).await.unwrap();

        let result = registry.invoke("echo", json!({})).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidInput(_))));

        let ok = registry.invoke("echo", json!({"message": "hi"})).await.unwrap();
        assert_eq!(ok, json!({"message": "hi"}));
    }

    #[tokio::test]
    async fn invoking_unknown_tool_returns_not_found() {
        let registry = ToolRegistry::new();
        let result = registry.invoke("missing", json!({})).await;
        assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
    }
}
