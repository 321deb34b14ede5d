//! Typed message catalog.
//!
//! Each message is a zero-sized marker type binding a wire name to its
//! payload types. The router only accepts these markers, so a request can
//! never be sent with a payload of the wrong shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Protocol revision. Bumped whenever a name is removed or retyped.
pub const PROTOCOL_VERSION: u32 = 1;

/// A named message and the payload it carries.
pub trait Message: 'static {
    const NAME: &'static str;
    type Params: Serialize + DeserializeOwned + Send + 'static;
}

/// A message answered by exactly one response.
pub trait Request: Message {
    type Result: Serialize + DeserializeOwned + Send + 'static;
}

/// A one-way message. Never awaited.
pub trait Notification: Message {}

macro_rules! request {
    ($(#[$meta:meta])* $ty:ident, $name:literal, $params:ty => $result:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $ty;

        impl Message for $ty {
            const NAME: &'static str = $name;
            type Params = $params;
        }

        impl Request for $ty {
            type Result = $result;
        }
    };
}

macro_rules! notification {
    ($(#[$meta:meta])* $ty:ident, $name:literal, $params:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $ty;

        impl Message for $ty {
            const NAME: &'static str = $name;
            type Params = $params;
        }

        impl Notification for $ty {}
    };
}

request!(
    /// Liveness check. Either surface may ping the core; the core may ping the IDE.
    Ping, "ping", String => Pong
);
request!(
    /// The ordered tool catalog.
    ListTools, "tools/list", () => Vec<ToolDefinition>
);
request!(
    /// Invoke a tool and wait for its terminal outcome.
    CallTool, "tools/call", CallToolParams => ToolCallResult
);
notification!(
    /// Ask for a running tool call to stop.
    CancelToolCall, "tools/cancel", ToolCallRef
);
request!(
    /// Core asks the IDE to perform a tool's side effects.
    ExecuteTool, "tools/execute", ExecuteToolParams => Value
);
notification!(
    /// Incremental output for one tool call.
    ToolCallPartialOutput, "toolCallPartialOutput", PartialOutput
);
notification!(DidChangeSelectedProfile, "didChangeSelectedProfile", SelectedProfile);
notification!(DidChangeSelectedOrg, "didChangeSelectedOrg", SelectedOrg);
notification!(
    DidChangeAvailableProfiles,
    "didChangeAvailableProfiles",
    AvailableProfiles
);
notification!(ConfigError, "configError", ConfigErrorNotice);

// --- Payloads ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub message: String,
    pub protocol_version: u32,
}

/// A capability the reasoning process can invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema the call arguments must satisfy.
    pub parameter_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly_hint: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    /// Minted by the core when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub tool_name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRef {
    pub tool_call_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteToolParams {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialOutput {
    pub tool_call_id: String,
    pub context_items: Vec<ContextItem>,
}

/// One fragment of tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContextItem {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        content: String,
    },
    FileDiff {
        path: String,
        diff: String,
    },
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        items: Vec<String>,
    },
}

impl ContextItem {
    pub fn text(content: impl Into<String>) -> Self {
        ContextItem::Text {
            name: None,
            content: content.into(),
        }
    }

    pub fn file_diff(path: impl Into<String>, diff: impl Into<String>) -> Self {
        ContextItem::FileDiff {
            path: path.into(),
            diff: diff.into(),
        }
    }

    pub fn list(items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ContextItem::List {
            name: None,
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    /// Plain-text rendering of the fragment.
    pub fn display_text(&self) -> String {
        match self {
            ContextItem::Text { content, .. } => content.clone(),
            ContextItem::FileDiff { path, diff } => format!("{path}\n{diff}"),
            ContextItem::List { items, .. } => items.join("\n"),
        }
    }
}

/// Terminal result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    /// Every fragment emitted before the call ended, in emission order.
    #[serde(default)]
    pub context_items: Vec<ContextItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ToolOutcome {
    Succeeded { output: Value },
    Failed { error: ToolFailure },
    Cancelled,
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Succeeded { .. })
    }
}

/// Why a started tool call failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler reported a domain error.
    Handler,
    /// The call outlived its configured window.
    Timeout,
    /// The handler panicked.
    Panicked,
}

/// Display metadata for one configuration profile. Relayed, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDescription {
    pub id: String,
    pub title: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ProfileDescription {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            metadata: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedProfile {
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedOrg {
    pub id: Option<String>,
    /// Absent: leave the profile alone. `null`: clear it.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_id: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableProfiles {
    pub profiles: Vec<ProfileDescription>,
    pub selected_profile_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigErrorNotice {
    pub message: String,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Keeps an explicit `null` distinct from a missing field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
