//! Raft wire messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type tags, named after the upstream Raft wire vocabulary so the
/// oracle's abstraction mapping can match on them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Client proposal. Routed to the current leader by the environment.
    MsgProp,
    /// AppendEntries: replication and heartbeat.
    MsgApp,
    /// AppendEntries response.
    MsgAppResp,
    /// RequestVote.
    MsgVote,
    /// RequestVote response.
    MsgVoteResp,
}

impl MessageType {
    /// The wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MsgProp => "MsgProp",
            Self::MsgApp => "MsgApp",
            Self::MsgAppResp => "MsgAppResp",
            Self::MsgVote => "MsgVote",
            Self::MsgVoteResp => "MsgVoteResp",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single replicated log entry. Indexes are 1-based; index 0 means "no
/// entry".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entry {
    pub term: u64,
    pub index: u64,
    pub data: Vec<u8>,
}

impl Entry {
    /// An entry carrying a payload; term and index are assigned when the
    /// leader appends it.
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            term: 0,
            index: 0,
            data,
        }
    }
}

/// One Raft message travelling on a cluster link.
///
/// The field set mirrors the classic wire format; which fields are
/// meaningful depends on `msg_type`:
///
/// - `MsgApp`: `index`/`log_term` describe the entry preceding `entries`,
///   `commit` is the leader's commit index.
/// - `MsgAppResp`: `index` is the last matched index on success, or the
///   follower's last index as a hint on rejection.
/// - `MsgVote`: `index`/`log_term` describe the candidate's last entry.
/// - `MsgVoteResp`: `reject` is the vote outcome, `vote` the responder's
///   recorded vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub from: u64,
    pub to: u64,
    pub term: u64,
    pub log_term: u64,
    pub index: u64,
    pub entries: Vec<Entry>,
    pub commit: u64,
    pub vote: u64,
    pub reject: bool,
}

impl Message {
    /// A message with the routing header set and all payload fields zeroed.
    pub fn new(msg_type: MessageType, from: u64, to: u64, term: u64) -> Self {
        Self {
            msg_type,
            from,
            to,
            term,
            log_term: 0,
            index: 0,
            entries: Vec::new(),
            commit: 0,
            vote: 0,
            reject: false,
        }
    }

    /// A client proposal carrying one payload entry. `from` 0 marks the
    /// external client; the environment fills in `to`.
    pub fn propose(data: Vec<u8>) -> Self {
        let mut m = Self::new(MessageType::MsgProp, 0, 0, 0);
        m.entries.push(Entry::with_data(data));
        m
    }
}
