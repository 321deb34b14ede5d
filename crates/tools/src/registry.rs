//! Ordered tool registry.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::{Validator, validator_for};
use protocol::ToolDefinition;
use serde_json::Value;

use crate::error::{Result, ToolError};
use crate::handler::ToolHandler;

/// A definition paired with its compiled parameter schema and its handler.
pub struct RegisteredTool {
    definition: ToolDefinition,
    validator: Validator,
    handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    fn new(definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Result<Self> {
        let validator =
            validator_for(&definition.parameter_schema).map_err(|e| ToolError::InvalidSchema {
                tool: definition.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            definition,
            validator,
            handler,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    /// Check `arguments` against the parameter schema. Reports the first
    /// violation.
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        let mut errors = self.validator.iter_errors(arguments);
        if let Some(first) = errors.next() {
            return Err(ToolError::InvalidArguments {
                tool: self.definition.name.clone(),
                reason: first.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

/// The ordered set of tools exposed for a session.
///
/// Names are unique. Listing order is registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an ordered list, rejecting repeated names.
    pub fn from_tools(
        tools: impl IntoIterator<Item = (ToolDefinition, Arc<dyn ToolHandler>)>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for (definition, handler) in tools {
            registry.register(definition, handler)?;
        }
        Ok(registry)
    }

    /// Append a tool at the end of the listing order.
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        if self.index.contains_key(&definition.name) {
            return Err(ToolError::DuplicateTool(definition.name));
        }
        let tool = RegisteredTool::new(definition, handler)?;
        self.index.insert(tool.name().to_string(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Remove a tool. Later tools keep their relative order.
    pub fn unregister(&mut self, name: &str) -> Option<ToolDefinition> {
        let position = self.index.remove(name)?;
        let removed = self.tools.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(removed.definition)
    }

    pub fn list(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter().map(RegisteredTool::definition)
    }

    /// Owned copy of [`list`](Self::list), as sent over `tools/list`.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<&ToolDefinition> {
        self.resolve(name).map(RegisteredTool::definition)
    }

    pub fn resolve(&self, name: &str) -> Result<&RegisteredTool> {
        self.index
            .get(name)
            .map(|&position| &self.tools[position])
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(RegisteredTool::name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
