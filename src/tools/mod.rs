//! Tool registry for model-initiated function calls.
//!
//! Tools are registered at startup, advertised to the upstream as part of the
//! session configuration, and invoked by the outbound dispatcher when the
//! model emits a function-call item.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::core::upstream::ToolDescriptor;

/// Errors raised by tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The arguments payload did not match the tool's schema
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran but failed
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// A callable tool the model may invoke mid-conversation.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    /// Name advertised to the model and matched on dispatch.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> Option<&str> {
        None
    }

    /// JSON schema of the arguments payload, if the tool declares one.
    fn parameters(&self) -> Option<Value> {
        None
    }

    /// Run the tool with the model-provided arguments.
    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Registry of tools available to a session.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name. Replaces any previous tool with
    /// the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!("Registered tool: {}", tool.name());
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors of every registered tool, for session configuration.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().map(str::to_string),
                parameters: tool.parameters(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
