//! Protocol schema registry.
//!
//! A [`Schema`] maps message names to their declared payload types for one
//! direction. Schemas are assembled once at startup and never change; the
//! webview and IDE schemas are built by extending the shared subsets so a
//! message both surfaces understand is declared in exactly one place.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::messages::{
    CallTool, CancelToolCall, ConfigError, DidChangeAvailableProfiles, DidChangeSelectedOrg,
    DidChangeSelectedProfile, ExecuteTool, ListTools, Notification, PROTOCOL_VERSION, Ping,
    Request, ToolCallPartialOutput,
};

/// One of the three cooperating processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Party {
    Core,
    Ide,
    Webview,
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Party::Core => "core",
            Party::Ide => "ide",
            Party::Webview => "webview",
        })
    }
}

/// Which way a message travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    CoreToIde,
    IdeToCore,
    CoreToWebview,
    WebviewToCore,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::CoreToIde,
        Direction::IdeToCore,
        Direction::CoreToWebview,
        Direction::WebviewToCore,
    ];

    /// The direction from `from` to `to`, if the two parties share a channel.
    pub fn between(from: Party, to: Party) -> Option<Self> {
        match (from, to) {
            (Party::Core, Party::Ide) => Some(Direction::CoreToIde),
            (Party::Ide, Party::Core) => Some(Direction::IdeToCore),
            (Party::Core, Party::Webview) => Some(Direction::CoreToWebview),
            (Party::Webview, Party::Core) => Some(Direction::WebviewToCore),
            _ => None,
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Direction::CoreToIde => Direction::IdeToCore,
            Direction::IdeToCore => Direction::CoreToIde,
            Direction::CoreToWebview => Direction::WebviewToCore,
            Direction::WebviewToCore => Direction::CoreToWebview,
        }
    }

    pub fn sender(self) -> Party {
        match self {
            Direction::CoreToIde | Direction::CoreToWebview => Party::Core,
            Direction::IdeToCore => Party::Ide,
            Direction::WebviewToCore => Party::Webview,
        }
    }

    pub fn receiver(self) -> Party {
        self.reverse().sender()
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-to-{}", self.sender(), self.receiver())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Direction::ALL
            .into_iter()
            .find(|d| d.to_string() == s)
            .ok_or_else(|| format!("unknown direction '{s}' (expected e.g. core-to-webview)"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Notification => "notification",
        }
    }
}

/// The declared shape of one message.
#[derive(Debug, Clone)]
pub struct MessageSpec {
    name: &'static str,
    kind: MessageKind,
    params_type: &'static str,
    result_type: Option<&'static str>,
    check_params: fn(&Value) -> serde_json::Result<()>,
}

impl MessageSpec {
    pub fn request<M: Request>() -> Self {
        Self {
            name: M::NAME,
            kind: MessageKind::Request,
            params_type: std::any::type_name::<M::Params>(),
            result_type: Some(std::any::type_name::<M::Result>()),
            check_params: conforms::<M::Params>,
        }
    }

    pub fn notification<N: Notification>() -> Self {
        Self {
            name: N::NAME,
            kind: MessageKind::Notification,
            params_type: std::any::type_name::<N::Params>(),
            result_type: None,
            check_params: conforms::<N::Params>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn params_type(&self) -> &'static str {
        self.params_type
    }

    /// `None` for notifications.
    pub fn result_type(&self) -> Option<&'static str> {
        self.result_type
    }

    /// Check a raw payload against the declared params type.
    pub fn check_params(&self, params: &Value) -> std::result::Result<(), String> {
        (self.check_params)(params).map_err(|e| e.to_string())
    }

    fn same_shape(&self, other: &MessageSpec) -> bool {
        self.kind == other.kind
            && self.params_type == other.params_type
            && self.result_type == other.result_type
    }
}

fn conforms<T: DeserializeOwned>(value: &Value) -> serde_json::Result<()> {
    T::deserialize(value).map(drop)
}

/// Immutable name → shape mapping for one direction.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entries: BTreeMap<&'static str, MessageSpec>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&MessageSpec> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &MessageSpec> {
        self.entries.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every entry of `other` is present here with the same shape.
    pub fn is_superset_of(&self, other: &Schema) -> bool {
        other
            .iter()
            .all(|spec| self.get(spec.name).is_some_and(|own| own.same_shape(spec)))
    }
}

/// Collects entries; conflicting re-declarations surface at [`build`](Self::build).
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entries: BTreeMap<&'static str, MessageSpec>,
    conflicts: Vec<&'static str>,
}

impl SchemaBuilder {
    pub fn request<M: Request>(self) -> Self {
        self.entry(MessageSpec::request::<M>())
    }

    pub fn notification<N: Notification>(self) -> Self {
        self.entry(MessageSpec::notification::<N>())
    }

    /// Union with an existing schema.
    pub fn extend(self, schema: &Schema) -> Self {
        schema.iter().cloned().fold(self, SchemaBuilder::entry)
    }

    pub fn entry(mut self, spec: MessageSpec) -> Self {
        match self.entries.get(spec.name) {
            Some(existing) if !existing.same_shape(&spec) => self.conflicts.push(spec.name),
            Some(_) => {}
            None => {
                self.entries.insert(spec.name, spec);
            }
        }
        self
    }

    pub fn build(self) -> Result<Schema> {
        if let Some(name) = self.conflicts.first() {
            return Err(Error::SchemaConflict {
                name: name.to_string(),
            });
        }
        Ok(Schema {
            entries: self.entries,
        })
    }
}

/// Messages either surface may send to the core.
pub fn shared_to_core() -> Result<Schema> {
    Schema::builder()
        .request::<Ping>()
        .request::<ListTools>()
        .request::<CallTool>()
        .notification::<CancelToolCall>()
        .build()
}

/// Messages the core (or IDE) may send to the webview.
pub fn shared_to_webview() -> Result<Schema> {
    Schema::builder().notification::<ConfigError>().build()
}

/// All four directional schemas, built once and shared read-only.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    version: u32,
    schemas: HashMap<Direction, Schema>,
}

impl SchemaRegistry {
    /// Assemble the standard core ↔ IDE and core ↔ webview protocol.
    pub fn standard() -> Result<Self> {
        let to_core = shared_to_core()?;
        let to_webview = shared_to_webview()?;

        let webview_to_core = Schema::builder()
            .extend(&to_core)
            .notification::<DidChangeSelectedProfile>()
            .notification::<DidChangeSelectedOrg>()
            .build()?;
        let ide_to_core = Schema::builder()
            .extend(&to_core)
            .notification::<ToolCallPartialOutput>()
            .build()?;
        let core_to_webview = Schema::builder()
            .extend(&to_webview)
            .notification::<DidChangeAvailableProfiles>()
            .notification::<ToolCallPartialOutput>()
            .build()?;
        let core_to_ide = Schema::builder()
            .request::<Ping>()
            .request::<ExecuteTool>()
            .notification::<CancelToolCall>()
            .build()?;

        Self::from_schemas(PROTOCOL_VERSION, [
            (Direction::WebviewToCore, webview_to_core),
            (Direction::IdeToCore, ide_to_core),
            (Direction::CoreToWebview, core_to_webview),
            (Direction::CoreToIde, core_to_ide),
        ])
    }

    /// Build from explicit schemas. A name used in several directions must
    /// keep the same shape in all of them.
    pub fn from_schemas(
        version: u32,
        schemas: impl IntoIterator<Item = (Direction, Schema)>,
    ) -> Result<Self> {
        let schemas: HashMap<_, _> = schemas.into_iter().collect();

        let mut seen: HashMap<&'static str, &MessageSpec> = HashMap::new();
        for schema in schemas.values() {
            for spec in schema.iter() {
                match seen.get(spec.name) {
                    Some(other) if !other.same_shape(spec) => {
                        return Err(Error::SchemaConflict {
                            name: spec.name.to_string(),
                        });
                    }
                    _ => {
                        seen.insert(spec.name, spec);
                    }
                }
            }
        }

        Ok(Self { version, schemas })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The schema for `direction` (empty if none was declared).
    pub fn schema(&self, direction: Direction) -> &Schema {
        static EMPTY: Schema = Schema {
            entries: BTreeMap::new(),
        };
        self.schemas.get(&direction).unwrap_or(&EMPTY)
    }

    /// Resolve a message name, or fail with `UnknownMessage`.
    pub fn lookup(&self, direction: Direction, name: &str) -> Result<&MessageSpec> {
        self.schema(direction)
            .get(name)
            .ok_or_else(|| Error::UnknownMessage {
                direction,
                name: name.to_string(),
            })
    }
}
