//! Tool dispatch
//!
//! Routes a model-requested tool call to the right place: name
//! normalization, then local invocation or an MCP round trip with the
//! argument keys rewritten for the remote executor. Failures
//! never propagate as errors; they come back as speakable outcome text
//! so the model can relay them in the reply.

use serde_json::Value;

use crate::Error;
use crate::llm::ToolCall;

use super::{
    LocalTool, McpClient, ToolProvenance, ToolRegistry, normalize_arguments, normalize_tool_name,
};

/// Result of one tool call, always speakable
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(text: String) -> Self {
        Self {
            text,
            is_error: false,
        }
    }

    fn failed(text: String) -> Self {
        Self {
            text,
            is_error: true,
        }
    }
}

/// Executes tool calls against local tools and the MCP server
pub struct ToolExecutor {
    locals: Vec<Box<dyn LocalTool>>,
    mcp: Option<McpClient>,
}

impl ToolExecutor {
    #[must_use]
    pub fn new(locals: Vec<Box<dyn LocalTool>>, mcp: Option<McpClient>) -> Self {
        Self { locals, mcp }
    }

    /// Execute one call, normalizing the requested name first
    pub async fn execute(&self, registry: &ToolRegistry, call: &ToolCall) -> ToolOutcome {
        let known = registry.names();
        let Some(name) = normalize_tool_name(&call.name, &known) else {
            tracing::warn!(requested = %call.name, "unknown tool requested");
            return ToolOutcome::failed(format!(
                "There is no tool called {}.",
                call.name
            ));
        };

        let Some(definition) = registry.get(&name) else {
            return ToolOutcome::failed(format!("There is no tool called {name}."));
        };

        match definition.provenance {
            ToolProvenance::Local => self.run_local(&name, &call.arguments),
            ToolProvenance::Mcp => self.run_remote(&name, &call.arguments).await,
        }
    }

    fn run_local(&self, name: &str, arguments: &Value) -> ToolOutcome {
        let Some(tool) = self
            .locals
            .iter()
            .find(|tool| tool.definition().name == name)
        else {
            return ToolOutcome::failed(format!("The {name} tool is not available."));
        };

        match tool.invoke(arguments) {
            Ok(text) => ToolOutcome::ok(text),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "local tool failed");
                ToolOutcome::failed(speakable(name, &e))
            }
        }
    }

    async fn run_remote(&self, name: &str, arguments: &Value) -> ToolOutcome {
        let Some(mcp) = &self.mcp else {
            return ToolOutcome::failed(format!(
                "The {name} tool is currently unavailable."
            ));
        };

        // Discovered executors expect compact camel-style keys, not the
        // underscored names their schemas advertise
        let arguments = normalize_arguments(name, arguments);
        match mcp.call_tool(name, &arguments).await {
            Ok(text) => ToolOutcome::ok(text),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "MCP tool failed");
                ToolOutcome::failed(speakable(name, &e))
            }
        }
    }
}

/// Phrase a tool failure so it reads naturally when spoken aloud
fn speakable(name: &str, error: &Error) -> String {
    let detail = error.to_string();
    if detail.contains("timed out") {
        format!("The {name} tool took too long to respond.")
    } else {
        format!("The {name} tool ran into a problem and could not finish.")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tools::{CurrentTimeTool, ToolDefinition};

    fn registry_with_remote() -> ToolRegistry {
        let locals: Vec<Box<dyn LocalTool>> = vec![Box::new(CurrentTimeTool)];
        let mut registry = ToolRegistry::with_builtins(&locals);
        registry.extend_discovered(vec![ToolDefinition {
            name: "get_weather".to_string(),
            description: "weather".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
            provenance: ToolProvenance::Mcp,
        }]);
        registry
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: json!({}),
        }
    }

    #[tokio::test]
    async fn local_tool_executes() {
        let executor = ToolExecutor::new(vec![Box::new(CurrentTimeTool)], None);
        let outcome = executor
            .execute(&registry_with_remote(), &call("get_current_time"))
            .await;
        assert!(!outcome.is_error);
        assert!(!outcome.text.is_empty());
    }

    #[tokio::test]
    async fn mangled_name_still_dispatches() {
        let executor = ToolExecutor::new(vec![Box::new(CurrentTimeTool)], None);
        let outcome = executor
            .execute(&registry_with_remote(), &call("getcurrenttime"))
            .await;
        assert!(!outcome.is_error);
    }

    #[tokio::test]
    async fn unknown_tool_is_speakable_not_fatal() {
        let executor = ToolExecutor::new(vec![Box::new(CurrentTimeTool)], None);
        let outcome = executor
            .execute(&registry_with_remote(), &call("launch_rocket"))
            .await;
        assert!(outcome.is_error);
        assert!(outcome.text.contains("launch_rocket"));
    }

    #[tokio::test]
    async fn remote_tool_without_client_degrades() {
        let executor = ToolExecutor::new(vec![Box::new(CurrentTimeTool)], None);
        let outcome = executor
            .execute(&registry_with_remote(), &call("get_weather"))
            .await;
        assert!(outcome.is_error);
        assert!(outcome.text.contains("unavailable"));
    }
}
