//! Hosts the Raft nodes and turns engine decisions into cluster activity.

use log::debug;
use quorumfuzz_raft::{
    Config, MemoryStorage, Message, MessageType, RaftError, Rand, RawNode, StateRole, Status,
};
use quorumfuzz_trace::{Event, EventName};
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error(transparent)]
    Raft(#[from] RaftError),
}

/// Capability the execution engine hands to the environment: event
/// recording plus the replayable random-choice channels.
///
/// Both draws append the observed value to the event trace *and* to the
/// scheduling trace, which is what makes runs replayable.
pub trait RunContext {
    fn add_event(&mut self, event: Event);
    fn random_boolean(&mut self) -> bool;
    fn random_integer(&mut self, bound: usize) -> usize;
}

/// Routes the Raft `Rand` capability into the recorded integer channel.
struct CtxRand<'a> {
    ctx: &'a mut dyn RunContext,
}

impl Rand for CtxRand<'_> {
    fn intn(&mut self, bound: usize) -> usize {
        self.ctx.random_integer(bound)
    }
}

/// Cluster shape and timing.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Number of replicas; ids are `1..=replicas`, 0 is the client sentinel.
    pub replicas: usize,
    pub election_tick: usize,
    pub heartbeat_tick: usize,
    /// Logical ticks applied to every node per engine step.
    pub ticks_per_step: usize,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            election_tick: 20,
            heartbeat_tick: 2,
            ticks_per_step: 2,
        }
    }
}

/// An event carrying the full wire form of a message.
pub fn message_event(name: EventName, node: u64, m: &Message) -> Event {
    Event::new(
        name,
        node,
        json!({
            "type": m.msg_type.as_str(),
            "term": m.term,
            "from": m.from,
            "to": m.to,
            "log_term": m.log_term,
            "entries": m.entries,
            "index": m.index,
            "commit": m.commit,
            "vote": m.vote,
            "reject": m.reject,
        }),
    )
}

/// N Raft nodes plus their retained storages.
///
/// Storage outlives its node: [`RaftEnvironment::stop`] drops only the
/// volatile node, and [`RaftEnvironment::start`] rebuilds it from the
/// retained log. [`RaftEnvironment::reset`] rebuilds everything from
/// scratch between runs.
pub struct RaftEnvironment {
    config: EnvironmentConfig,
    nodes: BTreeMap<u64, RawNode>,
    storages: BTreeMap<u64, MemoryStorage>,
    cur_states: BTreeMap<u64, Status>,
}

impl RaftEnvironment {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self {
            config,
            nodes: BTreeMap::new(),
            storages: BTreeMap::new(),
            cur_states: BTreeMap::new(),
        }
    }

    fn node_config(&self, id: u64) -> Config {
        Config {
            id,
            election_tick: self.config.election_tick,
            heartbeat_tick: self.config.heartbeat_tick,
        }
    }

    /// Rebuild all nodes with fresh storage seeded with the all-replica
    /// voter set. Node construction draws election jitter through `ctx`,
    /// so the rebuild itself is on the replay tape.
    pub fn reset(&mut self, ctx: &mut dyn RunContext) -> Result<(), EnvError> {
        self.nodes.clear();
        self.storages.clear();
        self.cur_states.clear();
        let voters: Vec<u64> = (1..=self.config.replicas as u64).collect();
        for id in 1..=self.config.replicas as u64 {
            let storage = MemoryStorage::with_conf_state(voters.clone());
            let node = RawNode::new(&self.node_config(id), &storage, &mut CtxRand { ctx })?;
            self.cur_states.insert(id, node.status());
            self.nodes.insert(id, node);
            self.storages.insert(id, storage);
        }
        Ok(())
    }

    /// Deliver one message.
    ///
    /// Proposals are redirected to the current leader (and dropped when the
    /// cluster is leaderless); everything else goes to `msg.to` if that
    /// node is live.
    pub fn step(&mut self, ctx: &mut dyn RunContext, msg: Message) -> Result<(), EnvError> {
        if msg.msg_type == MessageType::MsgProp {
            let Some(leader) = self.leader_id() else {
                debug!("no leader; dropping proposal");
                return Ok(());
            };
            let request = msg
                .entries
                .first()
                .and_then(|e| std::str::from_utf8(&e.data).ok())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            ctx.add_event(Event::new(
                EventName::ClientRequest,
                leader,
                json!({ "request": request, "leader": leader }),
            ));
            let mut msg = msg;
            msg.to = leader;
            if let Some(node) = self.nodes.get_mut(&leader) {
                if let Err(RaftError::ProposalDropped(id)) = node.step(msg, &mut CtxRand { ctx }) {
                    debug!("proposal dropped by node {id}");
                }
            }
            return Ok(());
        }
        if let Some(node) = self.nodes.get_mut(&msg.to) {
            node.step(msg, &mut CtxRand { ctx })?;
        }
        Ok(())
    }

    /// Advance logical time by `ticks_per_step` on every live node, drain
    /// ready bundles into storage, emit state-diff events, and return all
    /// outbound messages produced during the step.
    pub fn tick(&mut self, ctx: &mut dyn RunContext) -> Vec<Message> {
        for node in self.nodes.values_mut() {
            for _ in 0..self.config.ticks_per_step {
                node.tick(&mut CtxRand { ctx });
            }
        }

        let mut outbound = Vec::new();
        for (&id, node) in self.nodes.iter_mut() {
            if !node.has_ready() {
                continue;
            }
            let ready = node.ready();
            if let Some(storage) = self.storages.get_mut(&id) {
                if let Some(hs) = ready.hard_state {
                    storage.set_hard_state(hs);
                }
                storage.append(&ready.entries);
            }
            if let Some(last) = ready.committed_entries.last() {
                ctx.add_event(Event::new(
                    EventName::AdvanceCommitIndex,
                    id,
                    json!({ "node": id, "commit": last.index }),
                ));
            }
            outbound.extend(ready.messages.iter().cloned());
            node.advance(&ready);
        }

        self.update_states(ctx);
        outbound
    }

    /// Emit events for observable state transitions since the last tick.
    fn update_states(&mut self, ctx: &mut dyn RunContext) {
        for (&id, node) in self.nodes.iter() {
            let new = node.status();
            let Some(&old) = self.cur_states.get(&id) else {
                self.cur_states.insert(id, new);
                continue;
            };
            if old.state != StateRole::Leader && new.state == StateRole::Leader {
                ctx.add_event(Event::new(
                    EventName::BecomeLeader,
                    id,
                    json!({ "node": id }),
                ));
                // The leader's no-op entry, observed as a synthetic request.
                ctx.add_event(Event::new(
                    EventName::ClientRequest,
                    id,
                    json!({ "request": 0, "leader": id }),
                ));
            } else if (old.state != StateRole::Candidate && new.state == StateRole::Candidate)
                || (old.state == StateRole::Candidate
                    && new.state == StateRole::Candidate
                    && new.term > old.term)
            {
                ctx.add_event(Event::new(EventName::Timeout, id, json!({ "node": id })));
            }
            self.cur_states.insert(id, new);
        }
    }

    /// Crash a node: the volatile state is lost, the storage retained.
    pub fn stop(&mut self, ctx: &mut dyn RunContext, node: u64) {
        if self.nodes.remove(&node).is_some() {
            ctx.add_event(Event::new(EventName::Remove, node, json!({ "i": node })));
        }
    }

    /// Restart a previously stopped node from its retained storage.
    pub fn start(&mut self, ctx: &mut dyn RunContext, node: u64) -> Result<(), EnvError> {
        if self.nodes.contains_key(&node) {
            return Ok(());
        }
        let Some(storage) = self.storages.get(&node) else {
            return Ok(());
        };
        let rebuilt = RawNode::new(&self.node_config(node), storage, &mut CtxRand { ctx })?;
        self.cur_states.insert(node, rebuilt.status());
        self.nodes.insert(node, rebuilt);
        ctx.add_event(Event::new(EventName::Add, node, json!({ "i": node })));
        Ok(())
    }

    /// Current leader, if any node believes it is one.
    pub fn leader_id(&self) -> Option<u64> {
        self.nodes
            .iter()
            .find(|(_, n)| n.status().state == StateRole::Leader)
            .map(|(&id, _)| id)
    }

    /// Ids of live nodes.
    pub fn live_ids(&self) -> Vec<u64> {
        self.nodes.keys().copied().collect()
    }

    /// Statuses of live nodes.
    pub fn live_statuses(&self) -> Vec<Status> {
        self.nodes.values().map(|n| n.status()).collect()
    }

    /// Retained storage for a node (live or stopped).
    pub fn storage(&self, node: u64) -> Option<&MemoryStorage> {
        self.storages.get(&node)
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumfuzz_raft::Entry;
    use std::collections::VecDeque;

    /// Test context: records events, serves scripted integer draws.
    struct TestCtx {
        events: Vec<Event>,
        ints: VecDeque<usize>,
        fallback: usize,
    }

    impl TestCtx {
        fn new(ints: Vec<usize>, fallback: usize) -> Self {
            Self {
                events: Vec::new(),
                ints: ints.into(),
                fallback,
            }
        }

        fn event_names(&self) -> Vec<&str> {
            self.events.iter().map(|e| e.name.as_str()).collect()
        }
    }

    impl RunContext for TestCtx {
        fn add_event(&mut self, event: Event) {
            self.events.push(event);
        }

        fn random_boolean(&mut self) -> bool {
            false
        }

        fn random_integer(&mut self, bound: usize) -> usize {
            let v = self.ints.pop_front().unwrap_or(self.fallback);
            v % bound.max(1)
        }
    }

    fn small_config() -> EnvironmentConfig {
        EnvironmentConfig {
            replicas: 3,
            election_tick: 4,
            heartbeat_tick: 1,
            ticks_per_step: 2,
        }
    }

    /// One tick round with immediate delivery of everything outbound.
    fn settle(env: &mut RaftEnvironment, ctx: &mut TestCtx, rounds: usize) {
        for _ in 0..rounds {
            let outbound = env.tick(ctx);
            for m in outbound {
                env.step(ctx, m).unwrap();
            }
        }
    }

    /// Drive the environment until a leader exists, delivering every
    /// outbound message immediately, then settle a few more rounds so the
    /// no-op entry replicates and commits.
    fn elect_leader(env: &mut RaftEnvironment, ctx: &mut TestCtx) -> u64 {
        for _ in 0..50 {
            settle(env, ctx, 1);
            if let Some(leader) = env.leader_id() {
                settle(env, ctx, 4);
                return leader;
            }
        }
        panic!("no leader elected");
    }

    #[test]
    fn reset_builds_all_replicas() {
        let mut env = RaftEnvironment::new(small_config());
        // One jitter draw per node construction.
        let mut ctx = TestCtx::new(vec![0, 3, 3], 3);
        env.reset(&mut ctx).unwrap();
        assert_eq!(env.live_ids(), vec![1, 2, 3]);
        assert_eq!(env.leader_id(), None);
        assert_eq!(ctx.ints.len(), 0);
    }

    #[test]
    fn election_emits_timeout_and_become_leader() {
        let mut env = RaftEnvironment::new(small_config());
        // Node 1 gets zero jitter, the others the maximum.
        let mut ctx = TestCtx::new(vec![0, 3, 3], 3);
        env.reset(&mut ctx).unwrap();
        let leader = elect_leader(&mut env, &mut ctx);
        assert_eq!(leader, 1);

        let names = ctx.event_names();
        assert!(names.contains(&"Timeout"));
        assert!(names.contains(&"BecomeLeader"));
        // The no-op shows up as a synthetic request...
        assert!(names.contains(&"ClientRequest"));
        // ...and commits once a quorum acknowledges it.
        assert!(names.contains(&"AdvanceCommitIndex"));
        // Timeout precedes leadership.
        let t = names.iter().position(|n| *n == "Timeout").unwrap();
        let l = names.iter().position(|n| *n == "BecomeLeader").unwrap();
        assert!(t < l);
    }

    #[test]
    fn proposal_redirected_to_leader() {
        let mut env = RaftEnvironment::new(small_config());
        let mut ctx = TestCtx::new(vec![0, 3, 3], 3);
        env.reset(&mut ctx).unwrap();
        let leader = elect_leader(&mut env, &mut ctx);

        ctx.events.clear();
        env.step(&mut ctx, Message::propose(b"1".to_vec())).unwrap();
        assert_eq!(ctx.events.len(), 1);
        assert_eq!(ctx.events[0].name, "ClientRequest");
        assert_eq!(ctx.events[0].params["request"], 1);
        assert_eq!(ctx.events[0].params["leader"], leader);
    }

    #[test]
    fn proposal_dropped_without_leader() {
        let mut env = RaftEnvironment::new(small_config());
        let mut ctx = TestCtx::new(vec![0, 3, 3], 3);
        env.reset(&mut ctx).unwrap();

        env.step(&mut ctx, Message::propose(b"1".to_vec())).unwrap();
        assert!(ctx.events.is_empty());
    }

    #[test]
    fn stop_retains_storage_and_start_rebuilds() {
        let mut env = RaftEnvironment::new(small_config());
        let mut ctx = TestCtx::new(vec![0, 3, 3], 3);
        env.reset(&mut ctx).unwrap();
        elect_leader(&mut env, &mut ctx);
        let committed = env.storage(1).unwrap().last_index();
        assert!(committed >= 1);

        env.stop(&mut ctx, 1);
        assert_eq!(env.live_ids(), vec![2, 3]);
        assert!(env.storage(1).is_some());
        assert_eq!(ctx.events.last().unwrap().name, "Remove");

        env.start(&mut ctx, 1).unwrap();
        assert_eq!(env.live_ids(), vec![1, 2, 3]);
        assert_eq!(ctx.events.last().unwrap().name, "Add");
        // The restarted node kept its log.
        assert_eq!(env.storage(1).unwrap().last_index(), committed);
    }

    #[test]
    fn start_ignores_live_and_unknown_nodes() {
        let mut env = RaftEnvironment::new(small_config());
        let mut ctx = TestCtx::new(vec![0, 3, 3], 3);
        env.reset(&mut ctx).unwrap();
        let before = ctx.events.len();
        env.start(&mut ctx, 1).unwrap(); // already live
        env.start(&mut ctx, 9).unwrap(); // never existed
        assert_eq!(ctx.events.len(), before);
        assert_eq!(env.live_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn delivery_to_stopped_node_is_dropped() {
        let mut env = RaftEnvironment::new(small_config());
        let mut ctx = TestCtx::new(vec![0, 3, 3], 3);
        env.reset(&mut ctx).unwrap();
        env.stop(&mut ctx, 2);
        let mut m = Message::new(MessageType::MsgApp, 1, 2, 1);
        m.entries.push(Entry::default());
        env.step(&mut ctx, m).unwrap(); // no panic, silently dropped
    }

    #[test]
    fn message_event_carries_wire_fields() {
        let mut m = Message::new(MessageType::MsgApp, 1, 2, 3);
        m.commit = 4;
        m.entries.push(Entry {
            term: 3,
            index: 5,
            data: b"1".to_vec(),
        });
        let e = message_event(EventName::SendMessage, 1, &m);
        assert_eq!(e.name, "SendMessage");
        assert_eq!(e.node, 1);
        assert_eq!(e.params["type"], "MsgApp");
        assert_eq!(e.params["term"], 3);
        assert_eq!(e.params["commit"], 4);
        assert_eq!(e.params["entries"][0]["Index"], 5);
        assert_eq!(e.params["reject"], false);
    }
}
