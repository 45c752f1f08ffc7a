//! Tool System
//!
//! Uniform contract for data-source capabilities. A tool is a name, a
//! free-text description the model reads, and a single-string-argument
//! function returning text. Tools are registered up front and dispatched by
//! id from the research loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AgentError, Result};

/// Tool invocation decided by the model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool identifier
    pub tool_id: String,

    /// Raw argument string (may be empty)
    pub argument: String,

    /// Model reasoning that led to this call, replayed in the scratchpad
    #[serde(default)]
    pub log: String,
}

impl ToolInvocation {
    pub fn new(tool_id: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            argument: argument.into(),
            log: String::new(),
        }
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = log.into();
        self
    }
}

/// Tool trait - implement to add new capabilities
///
/// `invoke` never fails across this boundary: implementations catch their own
/// errors and describe them in the returned text.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique identifier, stable for the process lifetime
    fn name(&self) -> &str;

    /// Free-text description injected verbatim into prompts
    fn description(&self) -> &str;

    /// Run the tool with a single string argument
    async fn invoke(&self, argument: &str) -> String;
}

type ToolFn = dyn Fn(&str) -> String + Send + Sync;

/// Closure-backed tool for capabilities that need no async I/O
pub struct FnTool {
    name: String,
    description: String,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, argument: &str) -> String {
        (self.func)(argument)
    }
}

/// Ordered registry of available tools
///
/// Catalog order is registration order. Lookups go through an id index, so
/// dispatch is a table lookup rather than any runtime inspection. Cloning is
/// cheap: tools are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    ///
    /// A tool whose id is already present replaces the old one in place and
    /// keeps its catalog position.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_shared(Arc::new(tool));
    }

    /// Register a shared tool, replacing any tool with the same id
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Some(&pos) = self.index.get(&name) {
            tracing::warn!(tool = %name, "Replacing previously registered tool");
            self.tools[pos] = tool;
        } else {
            self.index.insert(name, self.tools.len());
            self.tools.push(tool);
        }
    }

    /// Register a shared tool, rejecting duplicate ids
    pub fn try_register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        if self.contains(tool.name()) {
            return Err(AgentError::DuplicateTool(tool.name().to_string()));
        }
        self.register_shared(tool);
        Ok(())
    }

    /// Get a tool by id
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&pos| Arc::clone(&self.tools[pos]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool ids in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Iterate tools in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}
