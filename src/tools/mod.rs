//! Tool registry and execution
//!
//! Tools come from two places: built-in local tools and tools discovered
//! from an MCP server at startup. The registry unifies both behind one
//! name lookup so the model sees a single flat tool list.

mod executor;
mod mcp;
mod normalize;

pub use executor::{ToolExecutor, ToolOutcome};
pub use mcp::{McpClient, discover_with_retry};
pub use normalize::{normalize_arguments, normalize_tool_name};

use chrono::Local;
use serde_json::{Value, json};

use crate::Result;
use crate::llm::ToolSpec;

/// Where a tool is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolProvenance {
    /// Runs in-process
    Local,
    /// Forwarded to the MCP server
    Mcp,
}

/// A registered tool
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object
    pub parameters: Value,
    pub provenance: ToolProvenance,
}

/// In-process tool
pub trait LocalTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// # Errors
    ///
    /// Returns error if the arguments are invalid or execution fails
    fn invoke(&self, arguments: &Value) -> Result<String>;
}

/// Reports the current local date and time
pub struct CurrentTimeTool;

impl LocalTool for CurrentTimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_current_time".to_string(),
            description: "Get the current local date and time".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
            provenance: ToolProvenance::Local,
        }
    }

    fn invoke(&self, _arguments: &Value) -> Result<String> {
        Ok(Local::now().format("%A, %B %-d %Y, %H:%M").to_string())
    }
}

/// Unified lookup over local and discovered tools
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Create a registry seeded with the built-in local tools
    #[must_use]
    pub fn with_builtins(locals: &[Box<dyn LocalTool>]) -> Self {
        Self {
            tools: locals.iter().map(|tool| tool.definition()).collect(),
        }
    }

    /// Add tools discovered from the MCP server
    ///
    /// A discovered tool whose name collides with a local tool is skipped;
    /// local tools win.
    pub fn extend_discovered(&mut self, discovered: Vec<ToolDefinition>) {
        for tool in discovered {
            if self.get(&tool.name).is_some() {
                tracing::warn!(name = %tool.name, "discovered tool shadows existing tool, skipping");
                continue;
            }
            tracing::debug!(name = %tool.name, "registered discovered tool");
            self.tools.push(tool);
        }
    }

    /// Look up a tool by exact name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// All registered tool names
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name.clone()).collect()
    }

    /// The tool list in the shape chat backends expect
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            })
            .collect()
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
