//! Observation events shipped to the model-checking oracle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The closed vocabulary of observation names.
///
/// The oracle's abstraction mapping matches on these names; adding a new
/// one requires a corresponding rule on the TLA⁺ side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    SendMessage,
    DeliverMessage,
    RandomBooleanChoice,
    RandomIntegerChoice,
    ClientRequest,
    BecomeLeader,
    Timeout,
    AdvanceCommitIndex,
    Add,
    Remove,
}

impl EventName {
    /// The wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "SendMessage",
            Self::DeliverMessage => "DeliverMessage",
            Self::RandomBooleanChoice => "RandomBooleanChoice",
            Self::RandomIntegerChoice => "RandomIntegerChoice",
            Self::ClientRequest => "ClientRequest",
            Self::BecomeLeader => "BecomeLeader",
            Self::Timeout => "Timeout",
            Self::AdvanceCommitIndex => "AdvanceCommitIndex",
            Self::Add => "Add",
            Self::Remove => "Remove",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observation recorded during execution.
///
/// The wire form is `{Name, Params, Reset}`. `node` is internal bookkeeping
/// (which replica the observation belongs to) used by the trace-coverage
/// guider to build per-node chains; it is never serialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(skip)]
    pub node: u64,
    #[serde(rename = "Params", default)]
    pub params: Value,
    #[serde(rename = "Reset", default)]
    pub reset: bool,
}

impl Event {
    /// Build an observation with the given name, owning node and params.
    pub fn new(name: EventName, node: u64, params: Value) -> Self {
        Self {
            name: name.as_str().to_string(),
            node,
            params,
            reset: false,
        }
    }

    /// The terminator appended to every trace before it is sent to the
    /// oracle. Carries no name and no params.
    pub fn reset_marker() -> Self {
        Self {
            name: String::new(),
            node: 0,
            params: Value::Null,
            reset: true,
        }
    }
}

/// An ordered sequence of events: the observation stream of one run.
///
/// Serialises as a plain JSON array, which is exactly the oracle wire body
/// (minus the terminator appended at send time).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTrace {
    events: Vec<Event>,
}

impl EventTrace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event in program order.
    pub fn append(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the trace holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The ordered events.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Iterate over the events in order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Hex-encoded SHA-256 over the canonical JSON form.
    pub fn sha256(&self) -> String {
        crate::sha256_json(self)
    }
}

impl From<Vec<Event>> for EventTrace {
    fn from(events: Vec<Event>) -> Self {
        Self { events }
    }
}
