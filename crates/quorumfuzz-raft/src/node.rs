//! The Raft state machine behind a step/tick/ready interface.

use crate::message::{Entry, Message, MessageType};
use crate::storage::{HardState, MemoryStorage};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Injected randomness capability.
///
/// Election-timeout jitter is the only randomness Raft observes; routing it
/// through this trait lets the host record every draw and replay it. A bare
/// process-wide RNG would break replay and is deliberately impossible here.
pub trait Rand {
    /// Draw a uniform integer in `[0, bound)`.
    fn intn(&mut self, bound: usize) -> usize;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RaftError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("node {0} is not the leader; proposal dropped")]
    ProposalDropped(u64),
}

/// Static node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Node id; 0 is reserved for the external client.
    pub id: u64,
    /// Base election timeout in ticks. The effective timeout is
    /// `election_tick + jitter` with `jitter ∈ [0, election_tick)`.
    pub election_tick: usize,
    /// Ticks between leader replication rounds.
    pub heartbeat_tick: usize,
}

impl Config {
    fn validate(&self, voters: &[u64]) -> Result<(), RaftError> {
        if self.id == 0 {
            return Err(RaftError::InvalidConfig("node id 0 is reserved".into()));
        }
        if self.election_tick <= self.heartbeat_tick {
            return Err(RaftError::InvalidConfig(
                "election_tick must exceed heartbeat_tick".into(),
            ));
        }
        if !voters.contains(&self.id) {
            return Err(RaftError::InvalidConfig(format!(
                "node {} is not in the voter set",
                self.id
            )));
        }
        Ok(())
    }
}

/// Raft role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRole {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for StateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follower => f.write_str("Follower"),
            Self::Candidate => f.write_str("Candidate"),
            Self::Leader => f.write_str("Leader"),
        }
    }
}

/// A point-in-time view of a node's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub id: u64,
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
    /// Current leader as this node sees it; 0 if unknown.
    pub lead: u64,
    pub state: StateRole,
}

/// Everything the host must act on after a batch of step/tick calls:
/// persist `entries` and `hard_state` into storage, apply
/// `committed_entries`, transmit `messages`, then call [`RawNode::advance`].
#[derive(Debug, Default)]
pub struct Ready {
    pub hard_state: Option<HardState>,
    pub entries: Vec<Entry>,
    pub committed_entries: Vec<Entry>,
    pub messages: Vec<Message>,
}

/// A single Raft node driven entirely by its host.
///
/// All volatile state lives here; the durable log lives in the host's
/// [`MemoryStorage`]. Dropping a `RawNode` models a crash.
pub struct RawNode {
    id: u64,
    peers: Vec<u64>,
    term: u64,
    vote: u64,
    state: StateRole,
    lead: u64,
    /// Full log; `log[i].index == i + 1`.
    log: Vec<Entry>,
    commit: u64,
    /// Committed entries up to here have been handed out via `ready`.
    applied: u64,
    /// Entries up to here are known to be in storage.
    stable: u64,
    votes: BTreeMap<u64, bool>,
    next_index: BTreeMap<u64, u64>,
    match_index: BTreeMap<u64, u64>,
    election_tick: usize,
    heartbeat_tick: usize,
    election_elapsed: usize,
    heartbeat_elapsed: usize,
    randomized_election_timeout: usize,
    msgs: Vec<Message>,
    prev_hard_state: HardState,
}

impl RawNode {
    /// Build a node from retained storage.
    ///
    /// Consumes one jitter draw for the initial election timeout, so even
    /// node construction is on the replay tape.
    pub fn new(
        config: &Config,
        storage: &MemoryStorage,
        rand: &mut dyn Rand,
    ) -> Result<Self, RaftError> {
        let voters = storage.conf_state().voters.clone();
        config.validate(&voters)?;
        let hs = storage.hard_state();
        let log = storage.all_entries().to_vec();
        let stable = log.len() as u64;
        let mut node = Self {
            id: config.id,
            peers: voters,
            term: hs.term,
            vote: hs.vote,
            state: StateRole::Follower,
            lead: 0,
            log,
            commit: hs.commit,
            applied: hs.commit,
            stable,
            votes: BTreeMap::new(),
            next_index: BTreeMap::new(),
            match_index: BTreeMap::new(),
            election_tick: config.election_tick,
            heartbeat_tick: config.heartbeat_tick,
            election_elapsed: 0,
            heartbeat_elapsed: 0,
            randomized_election_timeout: 0,
            msgs: Vec::new(),
            prev_hard_state: hs,
        };
        node.reset_randomized_election_timeout(rand);
        Ok(node)
    }

    pub fn status(&self) -> Status {
        Status {
            id: self.id,
            term: self.term,
            vote: self.vote,
            commit: self.commit,
            lead: self.lead,
            state: self.state,
        }
    }

    fn quorum(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    fn last_index(&self) -> u64 {
        self.log.len() as u64
    }

    fn last_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    fn term_at(&self, index: u64) -> u64 {
        if index == 0 || index > self.last_index() {
            return 0;
        }
        self.log[(index - 1) as usize].term
    }

    fn hard_state(&self) -> HardState {
        HardState {
            term: self.term,
            vote: self.vote,
            commit: self.commit,
        }
    }

    fn reset_randomized_election_timeout(&mut self, rand: &mut dyn Rand) {
        self.randomized_election_timeout = self.election_tick + rand.intn(self.election_tick);
    }

    /// Advance logical time by one tick.
    pub fn tick(&mut self, rand: &mut dyn Rand) {
        match self.state {
            StateRole::Leader => {
                self.heartbeat_elapsed += 1;
                if self.heartbeat_elapsed >= self.heartbeat_tick {
                    self.heartbeat_elapsed = 0;
                    self.bcast_append();
                }
            }
            StateRole::Follower | StateRole::Candidate => {
                self.election_elapsed += 1;
                if self.election_elapsed >= self.randomized_election_timeout {
                    self.campaign(rand);
                }
            }
        }
    }

    /// Feed one message in.
    ///
    /// Only `MsgProp` can fail (when this node is not the leader); every
    /// other message is absorbed, with responses queued for the next ready.
    pub fn step(&mut self, msg: Message, rand: &mut dyn Rand) -> Result<(), RaftError> {
        if msg.msg_type == MessageType::MsgProp {
            if self.state != StateRole::Leader {
                return Err(RaftError::ProposalDropped(self.id));
            }
            self.append_entries(msg.entries);
            self.maybe_commit();
            self.bcast_append();
            return Ok(());
        }

        if msg.term > self.term {
            let lead = if msg.msg_type == MessageType::MsgApp {
                msg.from
            } else {
                0
            };
            self.become_follower(msg.term, lead, rand);
        } else if msg.term < self.term {
            // Answer stale senders with our term so they step down.
            match msg.msg_type {
                MessageType::MsgApp => {
                    let mut resp =
                        Message::new(MessageType::MsgAppResp, self.id, msg.from, self.term);
                    resp.reject = true;
                    self.msgs.push(resp);
                }
                MessageType::MsgVote => {
                    let mut resp =
                        Message::new(MessageType::MsgVoteResp, self.id, msg.from, self.term);
                    resp.reject = true;
                    resp.vote = self.vote;
                    self.msgs.push(resp);
                }
                _ => {}
            }
            return Ok(());
        }

        match msg.msg_type {
            MessageType::MsgVote => self.handle_vote(msg, rand),
            MessageType::MsgVoteResp => self.handle_vote_resp(msg, rand),
            MessageType::MsgApp => self.handle_append(msg, rand),
            MessageType::MsgAppResp => self.handle_append_resp(msg),
            MessageType::MsgProp => unreachable!("handled above"),
        }
        Ok(())
    }

    fn campaign(&mut self, rand: &mut dyn Rand) {
        self.term += 1;
        self.state = StateRole::Candidate;
        self.vote = self.id;
        self.lead = 0;
        self.votes.clear();
        self.votes.insert(self.id, true);
        self.election_elapsed = 0;
        self.reset_randomized_election_timeout(rand);
        if self.quorum() == 1 {
            self.become_leader();
            return;
        }
        for &peer in &self.peers {
            if peer == self.id {
                continue;
            }
            let mut m = Message::new(MessageType::MsgVote, self.id, peer, self.term);
            m.index = self.last_index();
            m.log_term = self.last_term();
            self.msgs.push(m);
        }
    }

    fn become_follower(&mut self, term: u64, lead: u64, rand: &mut dyn Rand) {
        if term > self.term {
            self.term = term;
            self.vote = 0;
        }
        self.state = StateRole::Follower;
        self.lead = lead;
        self.votes.clear();
        self.election_elapsed = 0;
        self.reset_randomized_election_timeout(rand);
    }

    fn become_leader(&mut self) {
        self.state = StateRole::Leader;
        self.lead = self.id;
        self.heartbeat_elapsed = 0;
        let next = self.last_index() + 1;
        for &peer in &self.peers {
            self.next_index.insert(peer, next);
            self.match_index.insert(peer, 0);
        }
        self.match_index.insert(self.id, self.last_index());
        // Leader no-op: commits the current term without waiting for a
        // client proposal.
        self.append_entries(vec![Entry::default()]);
        self.maybe_commit();
        self.bcast_append();
    }

    /// Leader-side append: assign term and index, extend the log, update the
    /// leader's own match index.
    fn append_entries(&mut self, entries: Vec<Entry>) {
        for mut e in entries {
            e.term = self.term;
            e.index = self.last_index() + 1;
            self.log.push(e);
        }
        self.match_index.insert(self.id, self.last_index());
    }

    fn handle_vote(&mut self, msg: Message, rand: &mut dyn Rand) {
        let can_vote = self.vote == 0 || self.vote == msg.from;
        let log_up_to_date = msg.log_term > self.last_term()
            || (msg.log_term == self.last_term() && msg.index >= self.last_index());
        let granted = can_vote && log_up_to_date;
        if granted {
            self.vote = msg.from;
            self.election_elapsed = 0;
            self.reset_randomized_election_timeout(rand);
        }
        let mut resp = Message::new(MessageType::MsgVoteResp, self.id, msg.from, self.term);
        resp.reject = !granted;
        resp.vote = self.vote;
        self.msgs.push(resp);
    }

    fn handle_vote_resp(&mut self, msg: Message, rand: &mut dyn Rand) {
        if self.state != StateRole::Candidate || msg.term != self.term {
            return;
        }
        self.votes.insert(msg.from, !msg.reject);
        let granted = self.votes.values().filter(|&&v| v).count();
        let rejected = self.votes.len() - granted;
        if granted >= self.quorum() {
            self.become_leader();
        } else if rejected >= self.quorum() {
            self.become_follower(self.term, 0, rand);
        }
    }

    fn handle_append(&mut self, msg: Message, rand: &mut dyn Rand) {
        if self.state != StateRole::Follower {
            self.become_follower(msg.term, msg.from, rand);
        } else {
            self.lead = msg.from;
            self.election_elapsed = 0;
            self.reset_randomized_election_timeout(rand);
        }

        let prev = msg.index;
        if prev > self.last_index() || self.term_at(prev) != msg.log_term {
            let mut resp = Message::new(MessageType::MsgAppResp, self.id, msg.from, self.term);
            resp.reject = true;
            resp.index = self.last_index();
            self.msgs.push(resp);
            return;
        }

        let mut idx = prev;
        for e in msg.entries {
            idx += 1;
            if idx <= self.last_index() {
                if self.term_at(idx) != e.term {
                    // Conflicting suffix: truncate, then adopt the leader's
                    // entry. Stability rolls back with the truncation.
                    self.log.truncate((idx - 1) as usize);
                    self.stable = self.stable.min(idx - 1);
                    self.log.push(e);
                }
                // Matching entry: keep ours.
            } else {
                self.log.push(e);
            }
        }

        let last_new = idx;
        if msg.commit > self.commit {
            let capped = msg.commit.min(last_new);
            if capped > self.commit {
                self.commit = capped;
            }
        }

        let mut resp = Message::new(MessageType::MsgAppResp, self.id, msg.from, self.term);
        resp.index = last_new;
        self.msgs.push(resp);
    }

    fn handle_append_resp(&mut self, msg: Message) {
        if self.state != StateRole::Leader || msg.term != self.term {
            return;
        }
        if msg.reject {
            let next = self.next_index.get(&msg.from).copied().unwrap_or(1);
            let reduced = next.saturating_sub(1).clamp(1, msg.index + 1);
            self.next_index.insert(msg.from, reduced);
            self.send_append(msg.from);
            return;
        }
        let matched = self.match_index.get(&msg.from).copied().unwrap_or(0);
        if msg.index > matched {
            self.match_index.insert(msg.from, msg.index);
            self.next_index.insert(msg.from, msg.index + 1);
            if self.maybe_commit() {
                // Propagate the new commit index without waiting for the
                // next heartbeat.
                self.bcast_append();
            }
        }
    }

    /// Advance the commit index to the highest current-term entry a quorum
    /// has replicated. Returns whether it moved.
    fn maybe_commit(&mut self) -> bool {
        let old = self.commit;
        for n in (self.commit + 1)..=self.last_index() {
            if self.term_at(n) != self.term {
                continue;
            }
            let replicated = self
                .peers
                .iter()
                .filter(|p| self.match_index.get(p).copied().unwrap_or(0) >= n)
                .count();
            if replicated >= self.quorum() {
                self.commit = n;
            }
        }
        self.commit > old
    }

    fn send_append(&mut self, to: u64) {
        let next = self.next_index.get(&to).copied().unwrap_or(1).max(1);
        let prev = next - 1;
        let mut m = Message::new(MessageType::MsgApp, self.id, to, self.term);
        m.index = prev;
        m.log_term = self.term_at(prev);
        m.commit = self.commit;
        if next <= self.last_index() {
            m.entries = self.log[(next - 1) as usize..].to_vec();
        }
        self.msgs.push(m);
    }

    fn bcast_append(&mut self) {
        let peers: Vec<u64> = self.peers.iter().copied().filter(|&p| p != self.id).collect();
        for peer in peers {
            self.send_append(peer);
        }
    }

    /// Whether [`RawNode::ready`] would return anything to act on.
    pub fn has_ready(&self) -> bool {
        !self.msgs.is_empty()
            || self.stable < self.last_index()
            || self.applied < self.commit
            || self.hard_state() != self.prev_hard_state
    }

    /// Collect unpersisted entries, newly committed entries, outbound
    /// messages and any hard-state change.
    pub fn ready(&mut self) -> Ready {
        let hs = self.hard_state();
        Ready {
            hard_state: (hs != self.prev_hard_state).then_some(hs),
            entries: self.log[self.stable as usize..].to_vec(),
            committed_entries: self.log[self.applied as usize..self.commit as usize].to_vec(),
            messages: std::mem::take(&mut self.msgs),
        }
    }

    /// Acknowledge a [`Ready`] the host has fully acted on.
    pub fn advance(&mut self, ready: &Ready) {
        if let Some(e) = ready.entries.last() {
            self.stable = e.index;
        }
        if let Some(e) = ready.committed_entries.last() {
            self.applied = e.index;
        }
        if let Some(hs) = ready.hard_state {
            self.prev_hard_state = hs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Deterministic jitter for tests: pops scripted values, then repeats
    /// the fallback. Values are clamped into the requested bound.
    struct ScriptedRand {
        values: VecDeque<usize>,
        fallback: usize,
    }

    impl ScriptedRand {
        fn fixed(fallback: usize) -> Self {
            Self {
                values: VecDeque::new(),
                fallback,
            }
        }
    }

    impl Rand for ScriptedRand {
        fn intn(&mut self, bound: usize) -> usize {
            let v = self.values.pop_front().unwrap_or(self.fallback);
            v % bound.max(1)
        }
    }

    fn config(id: u64) -> Config {
        Config {
            id,
            election_tick: 10,
            heartbeat_tick: 2,
        }
    }

    fn new_node(id: u64) -> (RawNode, MemoryStorage) {
        let storage = MemoryStorage::with_conf_state(vec![1, 2, 3]);
        let node = RawNode::new(&config(id), &storage, &mut ScriptedRand::fixed(0)).unwrap();
        (node, storage)
    }

    /// Persist a node's ready into its storage and return the bundle.
    fn drain(node: &mut RawNode, storage: &mut MemoryStorage) -> Ready {
        let ready = node.ready();
        if let Some(hs) = ready.hard_state {
            storage.set_hard_state(hs);
        }
        storage.append(&ready.entries);
        node.advance(&ready);
        ready
    }

    /// Drive a fresh follower into leadership: campaign, then grant one
    /// peer vote (quorum of 3 is 2).
    fn make_leader(node: &mut RawNode) {
        let mut rand = ScriptedRand::fixed(0);
        node.campaign(&mut rand);
        let mut resp = Message::new(MessageType::MsgVoteResp, 2, node.id, node.term);
        resp.reject = false;
        node.step(resp, &mut rand).unwrap();
        assert_eq!(node.status().state, StateRole::Leader);
    }

    #[test]
    fn config_rejects_node_zero() {
        let storage = MemoryStorage::with_conf_state(vec![0, 1]);
        let err = RawNode::new(&config(0), &storage, &mut ScriptedRand::fixed(0));
        assert!(matches!(err, Err(RaftError::InvalidConfig(_))));
    }

    #[test]
    fn config_rejects_missing_voter() {
        let storage = MemoryStorage::with_conf_state(vec![2, 3]);
        let err = RawNode::new(&config(1), &storage, &mut ScriptedRand::fixed(0));
        assert!(matches!(err, Err(RaftError::InvalidConfig(_))));
    }

    #[test]
    fn new_node_starts_as_follower() {
        let (node, _) = new_node(1);
        let status = node.status();
        assert_eq!(status.state, StateRole::Follower);
        assert_eq!(status.term, 0);
        assert_eq!(status.lead, 0);
        assert_eq!(status.commit, 0);
    }

    #[test]
    fn construction_draws_one_jitter() {
        let storage = MemoryStorage::with_conf_state(vec![1, 2, 3]);
        let mut rand = ScriptedRand {
            values: VecDeque::from([7]),
            fallback: 99,
        };
        let node = RawNode::new(&config(1), &storage, &mut rand).unwrap();
        // election_tick 10 + jitter 7
        assert_eq!(node.randomized_election_timeout, 17);
    }

    #[test]
    fn follower_campaigns_after_timeout() {
        let (mut node, _) = new_node(1);
        let mut rand = ScriptedRand::fixed(0);
        // Timeout is exactly election_tick with zero jitter.
        for _ in 0..10 {
            node.tick(&mut rand);
        }
        let status = node.status();
        assert_eq!(status.state, StateRole::Candidate);
        assert_eq!(status.term, 1);
        assert_eq!(status.vote, 1);
        // Vote requests queued for both peers.
        let ready = node.ready();
        let votes: Vec<_> = ready
            .messages
            .iter()
            .filter(|m| m.msg_type == MessageType::MsgVote)
            .collect();
        assert_eq!(votes.len(), 2);
        assert!(votes.iter().all(|m| m.term == 1 && m.from == 1));
    }

    #[test]
    fn candidate_wins_with_quorum() {
        let (mut node, _) = new_node(1);
        make_leader(&mut node);
        // Leadership appends the no-op entry.
        assert_eq!(node.last_index(), 1);
        assert_eq!(node.last_term(), 1);
    }

    #[test]
    fn candidate_steps_down_on_quorum_of_rejections() {
        let (mut node, _) = new_node(1);
        let mut rand = ScriptedRand::fixed(0);
        node.campaign(&mut rand);
        for from in [2, 3] {
            let mut resp = Message::new(MessageType::MsgVoteResp, from, 1, node.term);
            resp.reject = true;
            node.step(resp, &mut rand).unwrap();
        }
        assert_eq!(node.status().state, StateRole::Follower);
    }

    #[test]
    fn vote_granted_once_per_term() {
        let (mut node, _) = new_node(2);
        let mut rand = ScriptedRand::fixed(0);
        let mut req = Message::new(MessageType::MsgVote, 1, 2, 1);
        req.index = 0;
        req.log_term = 0;
        node.step(req, &mut rand).unwrap();
        let ready = node.ready();
        assert!(!ready.messages[0].reject);
        assert_eq!(node.status().vote, 1);

        // Different candidate, same term: rejected.
        let mut req = Message::new(MessageType::MsgVote, 3, 2, 1);
        req.index = 0;
        req.log_term = 0;
        node.step(req, &mut rand).unwrap();
        let ready = node.ready();
        assert!(ready.messages[0].reject);
        assert_eq!(node.status().vote, 1);
    }

    #[test]
    fn vote_rejected_for_stale_log() {
        let (mut node, _) = new_node(2);
        let mut rand = ScriptedRand::fixed(0);
        node.log.push(Entry {
            term: 2,
            index: 1,
            data: Vec::new(),
        });
        node.term = 2;
        let mut req = Message::new(MessageType::MsgVote, 1, 2, 2);
        req.index = 1;
        req.log_term = 1; // candidate's last term is older
        node.step(req, &mut rand).unwrap();
        let ready = node.ready();
        assert!(ready.messages[0].reject);
    }

    #[test]
    fn higher_term_message_converts_to_follower() {
        let (mut node, _) = new_node(1);
        make_leader(&mut node);
        let mut rand = ScriptedRand::fixed(0);
        let req = Message::new(MessageType::MsgApp, 3, 1, 9);
        node.step(req, &mut rand).unwrap();
        let status = node.status();
        assert_eq!(status.state, StateRole::Follower);
        assert_eq!(status.term, 9);
        assert_eq!(status.lead, 3);
    }

    #[test]
    fn stale_append_answered_with_current_term() {
        let (mut node, _) = new_node(1);
        let mut rand = ScriptedRand::fixed(0);
        node.term = 5;
        let req = Message::new(MessageType::MsgApp, 2, 1, 3);
        node.step(req, &mut rand).unwrap();
        let ready = node.ready();
        assert_eq!(ready.messages.len(), 1);
        assert_eq!(ready.messages[0].msg_type, MessageType::MsgAppResp);
        assert!(ready.messages[0].reject);
        assert_eq!(ready.messages[0].term, 5);
    }

    #[test]
    fn append_extends_log_and_commits() {
        let (mut node, mut storage) = new_node(2);
        let mut rand = ScriptedRand::fixed(0);
        let mut req = Message::new(MessageType::MsgApp, 1, 2, 1);
        req.entries = vec![
            Entry {
                term: 1,
                index: 1,
                data: Vec::new(),
            },
            Entry {
                term: 1,
                index: 2,
                data: b"x".to_vec(),
            },
        ];
        req.commit = 1;
        node.step(req, &mut rand).unwrap();

        let ready = drain(&mut node, &mut storage);
        assert_eq!(ready.entries.len(), 2);
        assert_eq!(ready.committed_entries.len(), 1);
        assert_eq!(storage.last_index(), 2);
        assert_eq!(storage.hard_state().commit, 1);
        let resp = &ready.messages[0];
        assert_eq!(resp.msg_type, MessageType::MsgAppResp);
        assert!(!resp.reject);
        assert_eq!(resp.index, 2);
    }

    #[test]
    fn append_rejected_on_gap() {
        let (mut node, _) = new_node(2);
        let mut rand = ScriptedRand::fixed(0);
        let mut req = Message::new(MessageType::MsgApp, 1, 2, 1);
        req.index = 5; // follower log is empty
        req.log_term = 1;
        node.step(req, &mut rand).unwrap();
        let ready = node.ready();
        assert!(ready.messages[0].reject);
        assert_eq!(ready.messages[0].index, 0); // hint: follower's last index
    }

    #[test]
    fn conflicting_suffix_truncated() {
        let (mut node, mut storage) = new_node(2);
        let mut rand = ScriptedRand::fixed(0);
        // Two stale entries from term 1.
        let mut req = Message::new(MessageType::MsgApp, 1, 2, 1);
        req.entries = vec![
            Entry {
                term: 1,
                index: 1,
                data: Vec::new(),
            },
            Entry {
                term: 1,
                index: 2,
                data: Vec::new(),
            },
        ];
        node.step(req, &mut rand).unwrap();
        drain(&mut node, &mut storage);

        // New leader replaces index 2.
        let mut req = Message::new(MessageType::MsgApp, 3, 2, 2);
        req.index = 1;
        req.log_term = 1;
        req.entries = vec![Entry {
            term: 2,
            index: 2,
            data: b"n".to_vec(),
        }];
        node.step(req, &mut rand).unwrap();
        drain(&mut node, &mut storage);

        assert_eq!(storage.last_index(), 2);
        assert_eq!(storage.term(2), 2);
        assert_eq!(node.last_term(), 2);
    }

    #[test]
    fn leader_commits_on_quorum_and_propagates() {
        let (mut node, mut storage) = new_node(1);
        make_leader(&mut node);
        drain(&mut node, &mut storage);
        let mut rand = ScriptedRand::fixed(0);

        // Peer 2 acknowledges the no-op at index 1: quorum of 2 reached.
        let mut resp = Message::new(MessageType::MsgAppResp, 2, 1, node.term);
        resp.index = 1;
        node.step(resp, &mut rand).unwrap();

        assert_eq!(node.status().commit, 1);
        let ready = drain(&mut node, &mut storage);
        assert_eq!(ready.committed_entries.len(), 1);
        // Commit propagation goes out immediately.
        assert!(ready
            .messages
            .iter()
            .any(|m| m.msg_type == MessageType::MsgApp && m.commit == 1));
    }

    #[test]
    fn leader_backs_off_next_index_on_rejection() {
        let (mut node, mut storage) = new_node(1);
        make_leader(&mut node);
        drain(&mut node, &mut storage);
        let mut rand = ScriptedRand::fixed(0);

        let before = node.next_index.get(&2).copied().unwrap();
        let mut resp = Message::new(MessageType::MsgAppResp, 2, 1, node.term);
        resp.reject = true;
        resp.index = 0;
        node.step(resp, &mut rand).unwrap();

        assert!(node.next_index.get(&2).copied().unwrap() < before.max(2));
        // A retry goes out immediately.
        let ready = node.ready();
        assert!(ready
            .messages
            .iter()
            .any(|m| m.msg_type == MessageType::MsgApp && m.to == 2));
    }

    #[test]
    fn proposal_rejected_by_non_leader() {
        let (mut node, _) = new_node(1);
        let mut rand = ScriptedRand::fixed(0);
        let err = node.step(Message::propose(b"1".to_vec()), &mut rand);
        assert_eq!(err, Err(RaftError::ProposalDropped(1)));
    }

    #[test]
    fn proposal_appended_and_replicated_by_leader() {
        let (mut node, mut storage) = new_node(1);
        make_leader(&mut node);
        drain(&mut node, &mut storage);
        let mut rand = ScriptedRand::fixed(0);

        node.step(Message::propose(b"7".to_vec()), &mut rand).unwrap();
        assert_eq!(node.last_index(), 2); // no-op + proposal
        let ready = drain(&mut node, &mut storage);
        assert_eq!(ready.entries.len(), 1);
        assert_eq!(ready.entries[0].data, b"7");
        assert!(ready
            .messages
            .iter()
            .any(|m| m.msg_type == MessageType::MsgApp && !m.entries.is_empty()));
    }

    #[test]
    fn restart_resumes_from_storage() {
        let (mut node, mut storage) = new_node(1);
        make_leader(&mut node);
        drain(&mut node, &mut storage);
        let mut rand = ScriptedRand::fixed(0);
        let mut resp = Message::new(MessageType::MsgAppResp, 2, 1, node.term);
        resp.index = 1;
        node.step(resp, &mut rand).unwrap();
        drain(&mut node, &mut storage);
        let term_before = node.status().term;

        // Crash: drop the node, keep the storage.
        drop(node);
        let restarted = RawNode::new(&config(1), &storage, &mut ScriptedRand::fixed(0)).unwrap();
        let status = restarted.status();
        assert_eq!(status.state, StateRole::Follower);
        assert_eq!(status.term, term_before);
        assert_eq!(status.commit, 1);
        // Already-committed entries are not re-announced.
        assert!(!restarted.has_ready());
    }

    #[test]
    fn single_node_cluster_elects_itself() {
        let storage = MemoryStorage::with_conf_state(vec![1]);
        let mut rand = ScriptedRand::fixed(0);
        let mut node = RawNode::new(
            &Config {
                id: 1,
                election_tick: 4,
                heartbeat_tick: 1,
            },
            &storage,
            &mut rand,
        )
        .unwrap();
        for _ in 0..4 {
            node.tick(&mut rand);
        }
        assert_eq!(node.status().state, StateRole::Leader);
        assert_eq!(node.status().commit, 1); // no-op commits alone
    }

    #[test]
    fn three_node_election_end_to_end() {
        let mut rand = ScriptedRand::fixed(0);
        let mut storages: Vec<MemoryStorage> = (0..3)
            .map(|_| MemoryStorage::with_conf_state(vec![1, 2, 3]))
            .collect();
        let mut nodes: Vec<RawNode> = (1..=3u64)
            .map(|id| RawNode::new(&config(id), &storages[(id - 1) as usize], &mut rand).unwrap())
            .collect();

        // Only node 1 times out.
        for _ in 0..10 {
            nodes[0].tick(&mut rand);
        }

        // Deliver every pending message until the cluster settles.
        for _ in 0..20 {
            let mut in_flight = Vec::new();
            for (i, node) in nodes.iter_mut().enumerate() {
                if node.has_ready() {
                    let ready = node.ready();
                    if let Some(hs) = ready.hard_state {
                        storages[i].set_hard_state(hs);
                    }
                    storages[i].append(&ready.entries);
                    in_flight.extend(ready.messages.clone());
                    node.advance(&ready);
                }
            }
            if in_flight.is_empty() {
                break;
            }
            for m in in_flight {
                let to = (m.to - 1) as usize;
                nodes[to].step(m, &mut rand).unwrap();
            }
        }

        let leaders: Vec<_> = nodes
            .iter()
            .filter(|n| n.status().state == StateRole::Leader)
            .collect();
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].status().id, 1);
        // The no-op replicated and committed everywhere.
        for node in &nodes {
            assert_eq!(node.status().commit, 1);
        }
    }
}
