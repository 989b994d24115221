//! In-memory log storage, owned by the host rather than the node.
//!
//! A crash drops the node's volatile state but keeps its [`MemoryStorage`];
//! a restarted node is rebuilt from it. Within one fuzzing run storage is
//! never compacted.

use crate::message::Entry;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("requested entry range [{lo}, {hi}) is outside the log (last index {last})")]
    OutOfBounds { lo: u64, hi: u64, last: u64 },
}

/// The durable per-node Raft state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardState {
    pub term: u64,
    /// Node voted for in `term`; 0 if none.
    pub vote: u64,
    pub commit: u64,
}

/// Cluster membership, recorded in storage at bootstrap.
///
/// The environment seeds every replica's storage with the full voter set,
/// which is how the initial configuration joins all replicas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfState {
    pub voters: Vec<u64>,
}

/// Append-only in-memory log plus hard state and membership.
///
/// Entry indexes are 1-based: `entries[i].index == i + 1`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    hard_state: HardState,
    conf_state: ConfState,
    entries: Vec<Entry>,
}

impl MemoryStorage {
    /// Empty storage with no membership.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh storage bootstrapped with the given voter set.
    pub fn with_conf_state(voters: Vec<u64>) -> Self {
        Self {
            hard_state: HardState::default(),
            conf_state: ConfState { voters },
            entries: Vec::new(),
        }
    }

    pub fn hard_state(&self) -> HardState {
        self.hard_state
    }

    pub fn set_hard_state(&mut self, hs: HardState) {
        self.hard_state = hs;
    }

    pub fn conf_state(&self) -> &ConfState {
        &self.conf_state
    }

    /// Index of the last entry, or 0 for an empty log.
    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Term of the entry at `index`; 0 for index 0 or an absent entry.
    pub fn term(&self, index: u64) -> u64 {
        if index == 0 || index > self.last_index() {
            return 0;
        }
        self.entries[(index - 1) as usize].term
    }

    /// Entries in `[lo, hi)`, 1-based.
    pub fn entries(&self, lo: u64, hi: u64) -> Result<Vec<Entry>, StorageError> {
        if lo == 0 || hi < lo || hi > self.last_index() + 1 {
            return Err(StorageError::OutOfBounds {
                lo,
                hi,
                last: self.last_index(),
            });
        }
        Ok(self.entries[(lo - 1) as usize..(hi - 1) as usize].to_vec())
    }

    /// The whole log.
    pub fn all_entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Append entries, overwriting any conflicting suffix.
    ///
    /// The first incoming index must not leave a gap past the current last
    /// index; entries from that index on replace whatever was there.
    pub fn append(&mut self, entries: &[Entry]) {
        let Some(first) = entries.first() else {
            return;
        };
        debug_assert!(
            first.index >= 1 && first.index <= self.last_index() + 1,
            "append would leave a gap: first index {} after last {}",
            first.index,
            self.last_index()
        );
        self.entries.truncate((first.index - 1) as usize);
        self.entries.extend_from_slice(entries);
    }
}
