//! Types of events a connection can subscribe to with REGISTER.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Represents the type of a CQL event.
// All variants end with "Change", as the event names do.
#[allow(clippy::enum_variant_names)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Represents a change in the cluster topology, such as node addition or removal.
    TopologyChange,
    /// Represents a change in the status of a node, such as up or down.
    StatusChange,
    /// Represents a change in the schema, such as table creation or modification.
    SchemaChange,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match &self {
            Self::TopologyChange => "TOPOLOGY_CHANGE",
            Self::StatusChange => "STATUS_CHANGE",
            Self::SchemaChange => "SCHEMA_CHANGE",
        };

        write!(f, "{s}")
    }
}

/// An event name the server could send but this crate does not know.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventTypeError(pub String);

impl FromStr for EventType {
    type Err = UnknownEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TOPOLOGY_CHANGE" => Ok(Self::TopologyChange),
            "STATUS_CHANGE" => Ok(Self::StatusChange),
            "SCHEMA_CHANGE" => Ok(Self::SchemaChange),
            _ => Err(UnknownEventTypeError(s.to_string())),
        }
    }
}
