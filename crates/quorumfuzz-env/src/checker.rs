//! Run-time invariants evaluated against the live cluster.

use crate::environment::RaftEnvironment;
use quorumfuzz_raft::StateRole;

/// A user-supplied invariant over the environment. Returning `false` labels
/// the current iteration as buggy; it does not stop the run.
pub type Checker = fn(&RaftEnvironment) -> bool;

/// At most one live node is leader at the maximum term.
///
/// A deposed leader that has not yet learned of a newer term may linger at a
/// lower term; that is not a violation.
pub fn single_leader(env: &RaftEnvironment) -> bool {
    let statuses = env.live_statuses();
    let max_term = statuses.iter().map(|s| s.term).max().unwrap_or(0);
    statuses
        .iter()
        .filter(|s| s.state == StateRole::Leader && s.term == max_term)
        .count()
        <= 1
}

/// Every live node stores byte-identical entries up to the minimum commit
/// index across live nodes.
pub fn log_prefix_agreement(env: &RaftEnvironment) -> bool {
    let statuses = env.live_statuses();
    let Some(min_commit) = statuses.iter().map(|s| s.commit).min() else {
        return true;
    };
    if min_commit == 0 {
        return true;
    }

    let mut reference: Option<Vec<quorumfuzz_raft::Entry>> = None;
    for status in &statuses {
        let Some(storage) = env.storage(status.id) else {
            return false;
        };
        let Ok(prefix) = storage.entries(1, min_commit + 1) else {
            return false;
        };
        match &reference {
            None => reference = Some(prefix),
            Some(expected) => {
                if prefix.len() != expected.len() {
                    return false;
                }
                for (a, b) in prefix.iter().zip(expected.iter()) {
                    if a.term != b.term || a.index != b.index || a.data != b.data {
                        return false;
                    }
                }
            }
        }
    }
    true
}
