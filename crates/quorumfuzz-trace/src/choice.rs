//! Scheduling choices — the unit of externalised nondeterminism.

use serde::{Deserialize, Serialize};

/// A single nondeterministic decision made while executing one run.
///
/// Every source of randomness the cluster can observe is reified as a
/// choice: message delivery order, boolean and integer draws, crash and
/// restart points, and client request injection. A run is fully determined
/// by its initial state plus the ordered sequence of these choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SchedulingChoice {
    /// Deliver up to `max_messages` pending messages on the `from -> to` link.
    Node {
        from: u64,
        to: u64,
        max_messages: usize,
    },
    /// A replayable boolean draw observed by the cluster.
    RandomBoolean { value: bool },
    /// A replayable bounded integer draw (election-timer jitter).
    RandomInteger { value: usize },
    /// Restart a previously crashed node at the given step index.
    StartNode { step: usize, node: u64 },
    /// Crash a node at the given step index. Its storage is retained.
    StopNode { step: usize, node: u64 },
    /// Inject a client proposal at the given step index.
    ClientRequest { step: usize, request_id: usize },
}

impl SchedulingChoice {
    /// Whether this is a message-delivery (`Node`) choice.
    pub fn is_node(&self) -> bool {
        matches!(self, SchedulingChoice::Node { .. })
    }

    /// Whether this is a boolean draw.
    pub fn is_boolean(&self) -> bool {
        matches!(self, SchedulingChoice::RandomBoolean { .. })
    }

    /// Whether this is an integer draw.
    pub fn is_integer(&self) -> bool {
        matches!(self, SchedulingChoice::RandomInteger { .. })
    }

    /// Whether this is a crash point.
    pub fn is_stop(&self) -> bool {
        matches!(self, SchedulingChoice::StopNode { .. })
    }
}

/// An ordered sequence of scheduling choices: the replay tape for one run.
///
/// Serialises as a plain JSON array of choices. That array is the canonical
/// serialisation; [`Schedule::sha256`] depends only on the ordered content,
/// never on how the schedule was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    choices: Vec<SchedulingChoice>,
}

impl Schedule {
    /// Create an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a choice in program order.
    pub fn push(&mut self, choice: SchedulingChoice) {
        self.choices.push(choice);
    }

    /// Number of choices.
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    /// Whether the schedule holds no choices.
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// The ordered choices.
    pub fn choices(&self) -> &[SchedulingChoice] {
        &self.choices
    }

    /// Iterate over the choices in order.
    pub fn iter(&self) -> impl Iterator<Item = &SchedulingChoice> {
        self.choices.iter()
    }

    /// Hex-encoded SHA-256 over the canonical JSON form.
    pub fn sha256(&self) -> String {
        crate::sha256_json(self)
    }
}

impl From<Vec<SchedulingChoice>> for Schedule {
    fn from(choices: Vec<SchedulingChoice>) -> Self {
        Self { choices }
    }
}

impl FromIterator<SchedulingChoice> for Schedule {
    fn from_iter<I: IntoIterator<Item = SchedulingChoice>>(iter: I) -> Self {
        Self {
            choices: iter.into_iter().collect(),
        }
    }
}
