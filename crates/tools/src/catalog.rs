//! The builtin tools offered to the reasoning process.
//!
//! Each entry is a capability description only. Execution happens on the
//! IDE side; see the runtime crate's `IdeToolHandler`.

use std::sync::Arc;

use protocol::ToolDefinition;
use serde_json::{Value, json};

use crate::error::Result;
use crate::handler::ToolHandler;
use crate::registry::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    ReadFile,
    EditFile,
    CreateNewFile,
    RunTerminalCommand,
    ViewSubdirectory,
    ViewRepoMap,
    ExactSearch,
    SearchWeb,
    ViewDiff,
    ReadCurrentlyOpenFile,
}

impl BuiltinTool {
    /// Listing order.
    pub const ALL: [BuiltinTool; 10] = [
        BuiltinTool::ReadFile,
        BuiltinTool::EditFile,
        BuiltinTool::CreateNewFile,
        BuiltinTool::RunTerminalCommand,
        BuiltinTool::ViewSubdirectory,
        BuiltinTool::ViewRepoMap,
        BuiltinTool::ExactSearch,
        BuiltinTool::SearchWeb,
        BuiltinTool::ViewDiff,
        BuiltinTool::ReadCurrentlyOpenFile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinTool::ReadFile => "read-file",
            BuiltinTool::EditFile => "edit-file",
            BuiltinTool::CreateNewFile => "create-new-file",
            BuiltinTool::RunTerminalCommand => "run-terminal-command",
            BuiltinTool::ViewSubdirectory => "view-subdirectory",
            BuiltinTool::ViewRepoMap => "view-repo-map",
            BuiltinTool::ExactSearch => "exact-search",
            BuiltinTool::SearchWeb => "search-web",
            BuiltinTool::ViewDiff => "view-diff",
            BuiltinTool::ReadCurrentlyOpenFile => "read-currently-open-file",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    /// Whether the tool only observes the workspace.
    pub fn is_readonly(self) -> bool {
        !matches!(
            self,
            BuiltinTool::EditFile | BuiltinTool::CreateNewFile | BuiltinTool::RunTerminalCommand
        )
    }

    fn description(self) -> &'static str {
        match self {
            BuiltinTool::ReadFile => "Read the contents of a file in the workspace.",
            BuiltinTool::EditFile => {
                "Apply changes to an existing file. Describe the edit in full; unchanged \
                 regions may be elided."
            }
            BuiltinTool::CreateNewFile => "Create a new file with the given contents.",
            BuiltinTool::RunTerminalCommand => {
                "Run a shell command in the workspace root and return its output."
            }
            BuiltinTool::ViewSubdirectory => "List the files under a directory of the workspace.",
            BuiltinTool::ViewRepoMap => {
                "Show an outline of the repository: files and their top-level symbols."
            }
            BuiltinTool::ExactSearch => "Search the workspace for an exact string match.",
            BuiltinTool::SearchWeb => "Search the web and return the most relevant results.",
            BuiltinTool::ViewDiff => "Show the uncommitted changes in the workspace.",
            BuiltinTool::ReadCurrentlyOpenFile => "Read the file currently focused in the editor.",
        }
    }

    fn parameter_schema(self) -> Value {
        match self {
            BuiltinTool::ReadFile => object(
                json!({ "path": string("Workspace-relative path of the file to read.") }),
                &["path"],
            ),
            BuiltinTool::EditFile => object(
                json!({
                    "path": string("Workspace-relative path of the file to edit."),
                    "changes": string("The new contents, or the edited regions of the file."),
                }),
                &["path", "changes"],
            ),
            BuiltinTool::CreateNewFile => object(
                json!({
                    "path": string("Workspace-relative path of the file to create."),
                    "contents": string("Contents of the new file."),
                }),
                &["path", "contents"],
            ),
            BuiltinTool::RunTerminalCommand => object(
                json!({
                    "command": string("The command to run."),
                    "waitForCompletion": {
                        "type": "boolean",
                        "description": "Wait for the command to exit before returning.",
                    },
                }),
                &["command"],
            ),
            BuiltinTool::ViewSubdirectory => object(
                json!({ "directoryPath": string("Workspace-relative directory to list.") }),
                &["directoryPath"],
            ),
            BuiltinTool::ExactSearch => {
                object(json!({ "query": string("The text to search for.") }), &["query"])
            }
            BuiltinTool::SearchWeb => {
                object(json!({ "query": string("The web search query.") }), &["query"])
            }
            BuiltinTool::ViewRepoMap | BuiltinTool::ViewDiff | BuiltinTool::ReadCurrentlyOpenFile => {
                object(json!({}), &[])
            }
        }
    }

    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameter_schema: self.parameter_schema(),
            readonly_hint: Some(self.is_readonly()),
        }
    }
}

impl std::fmt::Display for BuiltinTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Definitions of every builtin, in listing order.
pub fn definitions() -> Vec<ToolDefinition> {
    BuiltinTool::ALL.map(BuiltinTool::definition).to_vec()
}

/// The standard registry: every builtin, all executed by `handler`.
pub fn standard_registry(handler: Arc<dyn ToolHandler>) -> Result<ToolRegistry> {
    ToolRegistry::from_tools(
        BuiltinTool::ALL.map(|tool| (tool.definition(), Arc::clone(&handler))),
    )
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn string(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, handler_fn};

    fn registry() -> ToolRegistry {
        standard_registry(handler_fn(|_, _| async { Ok::<_, HandlerError>(Value::Null) })).unwrap()
    }

    #[test]
    fn catalog_order_is_fixed() {
        assert_eq!(
            registry().names(),
            vec![
                "read-file",
                "edit-file",
                "create-new-file",
                "run-terminal-command",
                "view-subdirectory",
                "view-repo-map",
                "exact-search",
                "search-web",
                "view-diff",
                "read-currently-open-file",
            ]
        );
    }

    #[test]
    fn names_round_trip() {
        for tool in BuiltinTool::ALL {
            assert_eq!(BuiltinTool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(BuiltinTool::from_name("rm-rf"), None);
    }

    #[test]
    fn malformed_edit_file_is_rejected() {
        let registry = registry();
        let edit = registry.resolve("edit-file").unwrap();
        assert!(edit.validate(&json!({"path": "a.rs"})).is_err());
        assert!(edit.validate(&json!({"path": "a.rs", "changes": 3})).is_err());
        assert!(
            edit.validate(&json!({"path": "a.rs", "changes": "x", "extra": true}))
                .is_err()
        );
        assert!(edit.validate(&json!({"path": "a.rs", "changes": "x"})).is_ok());
    }

    #[test]
    fn argument_free_tools_accept_empty_object() {
        let registry = registry();
        for name in ["view-repo-map", "view-diff", "read-currently-open-file"] {
            assert!(registry.resolve(name).unwrap().validate(&json!({})).is_ok());
        }
    }

    #[test]
    fn mutating_tools_are_not_readonly() {
        let mutating: Vec<_> = definitions()
            .into_iter()
            .filter(|d| d.readonly_hint == Some(false))
            .map(|d| d.name)
            .collect();
        assert_eq!(mutating, vec!["edit-file", "create-new-file", "run-terminal-command"]);
    }
}
