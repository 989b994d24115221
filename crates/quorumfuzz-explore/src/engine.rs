//! The execution engine — runs one schedule end-to-end.
//!
//! Each iteration drives the environment for exactly `horizon` steps. In
//! mimic mode the schedule's choices are pre-loaded into per-kind channels
//! and consumed in order; in random mode the channels are pre-populated
//! from the iteration's seeded RNG. Either way, every choice actually
//! consumed is appended to the outgoing trace, so the produced schedule
//! replays the run exactly.

use quorumfuzz_env::{message_event, Checker, EnvironmentConfig, RaftEnvironment, RunContext};
use quorumfuzz_raft::Message;
use quorumfuzz_trace::{Event, EventName, EventTrace, Schedule, SchedulingChoice};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};

/// Engine configuration for one fuzzing campaign.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Steps per iteration.
    pub horizon: usize,
    /// Client proposals injected per random run (clamped to the horizon).
    pub number_requests: usize,
    /// Crash/restart pairs injected per random run.
    pub crash_quota: usize,
    /// Exclusive upper bound for `max_messages` in fresh Node choices.
    pub max_messages_cap: usize,
    /// Master seed; each iteration derives its own RNG from it.
    pub seed: u64,
    pub env: EnvironmentConfig,
    /// Optional invariant evaluated after every tick.
    pub checker: Option<Checker>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon: 100,
            number_requests: 1,
            crash_quota: 2,
            max_messages_cap: 10,
            seed: 42,
            env: EnvironmentConfig::default(),
            checker: None,
        }
    }
}

/// Everything one iteration produced.
#[derive(Debug)]
pub struct RunResult {
    /// The choices as consumed; replayable.
    pub schedule: Schedule,
    /// The observation stream for the oracle.
    pub event_trace: EventTrace,
    /// Set when a Raft panic or environment error cut the run short; the
    /// partial traces are kept.
    pub error: Option<String>,
    /// Whether the configured checker failed at any step.
    pub checker_violated: bool,
}

/// Per-run state: the replay channels, the RNG, and the traces being built.
struct RunState {
    replicas: u64,
    max_messages_cap: usize,
    rng: ChaCha8Rng,
    trace: Schedule,
    events: EventTrace,
    node_choices: VecDeque<(u64, u64, usize)>,
    boolean_choices: VecDeque<bool>,
    integer_choices: VecDeque<usize>,
    crash_points: BTreeMap<usize, u64>,
    start_points: BTreeMap<usize, u64>,
    client_requests: BTreeMap<usize, usize>,
}

impl RunState {
    fn new(seed: u64, replicas: u64, max_messages_cap: usize) -> Self {
        Self {
            replicas,
            max_messages_cap,
            rng: ChaCha8Rng::seed_from_u64(seed),
            trace: Schedule::new(),
            events: EventTrace::new(),
            node_choices: VecDeque::new(),
            boolean_choices: VecDeque::new(),
            integer_choices: VecDeque::new(),
            crash_points: BTreeMap::new(),
            start_points: BTreeMap::new(),
            client_requests: BTreeMap::new(),
        }
    }

    /// A fresh Node choice. Node 0 is the client sentinel and is never
    /// scheduled.
    fn fresh_node_choice(&mut self) -> (u64, u64, usize) {
        let from = self.rng.gen_range(1..=self.replicas);
        let to = self.rng.gen_range(1..=self.replicas);
        let max_messages = self.rng.gen_range(0..self.max_messages_cap.max(1));
        (from, to, max_messages)
    }

    fn next_node_choice(&mut self) -> (u64, u64, usize) {
        match self.node_choices.pop_front() {
            Some(choice) => choice,
            None => self.fresh_node_choice(),
        }
    }

    /// Distribute a mimic's choices into their replay channels.
    fn load_mimic(&mut self, mimic: &Schedule) {
        for choice in mimic.iter() {
            match choice {
                SchedulingChoice::Node {
                    from,
                    to,
                    max_messages,
                } => self.node_choices.push_back((*from, *to, *max_messages)),
                SchedulingChoice::RandomBoolean { value } => {
                    self.boolean_choices.push_back(*value)
                }
                SchedulingChoice::RandomInteger { value } => {
                    self.integer_choices.push_back(*value)
                }
                SchedulingChoice::StopNode { step, node } => {
                    self.crash_points.insert(*step, *node);
                }
                SchedulingChoice::StartNode { step, node } => {
                    self.start_points.insert(*step, *node);
                }
                SchedulingChoice::ClientRequest { step, request_id } => {
                    self.client_requests.insert(*step, *request_id);
                }
            }
        }
    }

    /// Pre-populate the channels for a fully random run.
    fn populate_random(&mut self, horizon: usize, crash_quota: usize, number_requests: usize) {
        for _ in 0..horizon {
            let choice = self.fresh_node_choice();
            self.node_choices.push_back(choice);
        }

        // Crash points leave room for a start step strictly after them.
        if horizon >= 2 {
            let quota = crash_quota.min(horizon - 1);
            for _ in 0..quota {
                let Some(step) = pick_free_step(&mut self.rng, &self.crash_points, 0, horizon - 1)
                else {
                    break;
                };
                let node = self.rng.gen_range(1..=self.replicas);
                self.crash_points.insert(step, node);
            }
            let crashes: Vec<(usize, u64)> =
                self.crash_points.iter().map(|(&s, &n)| (s, n)).collect();
            for (crash_step, node) in crashes {
                match pick_free_step(&mut self.rng, &self.start_points, crash_step + 1, horizon) {
                    Some(start_step) => {
                        self.start_points.insert(start_step, node);
                    }
                    None => {
                        // No free restart slot; drop the crash to keep the
                        // crash/start pairing invariant.
                        self.crash_points.remove(&crash_step);
                    }
                }
            }
        }

        let requests = number_requests.min(horizon);
        for request_id in 1..=requests {
            let Some(step) = pick_free_step(&mut self.rng, &self.client_requests, 0, horizon)
            else {
                break;
            };
            self.client_requests.insert(step, request_id);
        }
    }
}

impl RunContext for RunState {
    fn add_event(&mut self, event: Event) {
        self.events.append(event);
    }

    fn random_boolean(&mut self) -> bool {
        let value = match self.boolean_choices.pop_front() {
            Some(v) => v,
            None => self.rng.gen_bool(0.5),
        };
        self.events.append(Event::new(
            EventName::RandomBooleanChoice,
            0,
            json!({ "choice": value }),
        ));
        self.trace.push(SchedulingChoice::RandomBoolean { value });
        value
    }

    fn random_integer(&mut self, bound: usize) -> usize {
        let value = match self.integer_choices.pop_front() {
            Some(v) => v,
            None => self.rng.gen_range(0..bound.max(1)),
        };
        self.events.append(Event::new(
            EventName::RandomIntegerChoice,
            0,
            json!({ "choice": value }),
        ));
        self.trace.push(SchedulingChoice::RandomInteger { value });
        value
    }
}

/// Uniformly pick a step in `[lo, hi)` not already present in `taken`,
/// probing forward from a random offset. `None` when the range is full.
fn pick_free_step<V>(
    rng: &mut ChaCha8Rng,
    taken: &BTreeMap<usize, V>,
    lo: usize,
    hi: usize,
) -> Option<usize> {
    if lo >= hi {
        return None;
    }
    let start = lo + rng.gen_range(0..hi - lo);
    let mut step = start;
    loop {
        if !taken.contains_key(&step) {
            return Some(step);
        }
        step += 1;
        if step >= hi {
            step = lo;
        }
        if step == start {
            return None;
        }
    }
}

fn describe_panic(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "raft panicked".to_string()
    }
}

/// Runs schedules against one long-lived environment.
pub struct Executor {
    config: EngineConfig,
    env: RaftEnvironment,
    /// Per-link FIFO queues, keyed `(from, to)`.
    queues: BTreeMap<(u64, u64), VecDeque<Message>>,
}

impl Executor {
    pub fn new(config: EngineConfig) -> Self {
        let env = RaftEnvironment::new(config.env.clone());
        Self {
            config,
            env,
            queues: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one iteration of length `horizon`.
    ///
    /// `id` individualises the iteration's RNG; replaying the same `(id,
    /// mimic)` pair reproduces the same `(schedule, event_trace)`, and a
    /// complete mimic reproduces them under any `id`.
    pub fn run_iteration(&mut self, id: u64, mimic: Option<&Schedule>) -> RunResult {
        let mut state = RunState::new(
            self.config.seed.wrapping_add(id),
            self.config.env.replicas as u64,
            self.config.max_messages_cap,
        );
        match mimic {
            Some(m) => state.load_mimic(m),
            None => state.populate_random(
                self.config.horizon,
                self.config.crash_quota,
                self.config.number_requests,
            ),
        }
        self.queues.clear();

        let mut error: Option<String> = None;
        let mut checker_violated = false;
        let mut crashed: BTreeSet<u64> = BTreeSet::new();

        if let Err(e) = self.reset_env(&mut state) {
            error = Some(e);
        }

        if error.is_none() {
            'steps: for step in 0..self.config.horizon {
                if let Some(node) = state.crash_points.get(&step).copied() {
                    state.trace.push(SchedulingChoice::StopNode { step, node });
                    self.env.stop(&mut state, node);
                    crashed.insert(node);
                }

                if let Some(node) = state.start_points.get(&step).copied() {
                    if crashed.contains(&node) {
                        state.trace.push(SchedulingChoice::StartNode { step, node });
                        match self.start_env(&mut state, node) {
                            Ok(()) => {
                                crashed.remove(&node);
                            }
                            Err(e) => {
                                error = Some(e);
                                break 'steps;
                            }
                        }
                    }
                }

                let (from, to, max_messages) = state.next_node_choice();
                state.trace.push(SchedulingChoice::Node {
                    from,
                    to,
                    max_messages,
                });
                if !crashed.contains(&to) {
                    let pending: Vec<Message> = match self.queues.get_mut(&(from, to)) {
                        Some(queue) => {
                            let n = max_messages.min(queue.len());
                            queue.drain(..n).collect()
                        }
                        None => Vec::new(),
                    };
                    for message in pending {
                        state.add_event(message_event(
                            EventName::DeliverMessage,
                            message.to,
                            &message,
                        ));
                        if let Err(e) = self.step_env(&mut state, message) {
                            error = Some(e);
                            break 'steps;
                        }
                    }
                }

                if let Some(request_id) = state.client_requests.get(&step).copied() {
                    state.trace.push(SchedulingChoice::ClientRequest { step, request_id });
                    let proposal = Message::propose(request_id.to_string().into_bytes());
                    if let Err(e) = self.step_env(&mut state, proposal) {
                        error = Some(e);
                        break 'steps;
                    }
                }

                match self.tick_env(&mut state) {
                    Ok(outbound) => {
                        for message in outbound {
                            state.add_event(message_event(
                                EventName::SendMessage,
                                message.from,
                                &message,
                            ));
                            self.queues
                                .entry((message.from, message.to))
                                .or_default()
                                .push_back(message);
                        }
                    }
                    Err(e) => {
                        error = Some(e);
                        break 'steps;
                    }
                }

                if let Some(check) = self.config.checker {
                    if !check(&self.env) {
                        checker_violated = true;
                    }
                }
            }
        }

        RunResult {
            schedule: state.trace,
            event_trace: state.events,
            error,
            checker_violated,
        }
    }

    fn reset_env(&mut self, state: &mut RunState) -> Result<(), String> {
        let env = &mut self.env;
        match panic::catch_unwind(AssertUnwindSafe(move || env.reset(state))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(describe_panic(payload)),
        }
    }

    fn step_env(&mut self, state: &mut RunState, message: Message) -> Result<(), String> {
        let env = &mut self.env;
        match panic::catch_unwind(AssertUnwindSafe(move || env.step(state, message))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(describe_panic(payload)),
        }
    }

    fn start_env(&mut self, state: &mut RunState, node: u64) -> Result<(), String> {
        let env = &mut self.env;
        match panic::catch_unwind(AssertUnwindSafe(move || env.start(state, node))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(describe_panic(payload)),
        }
    }

    fn tick_env(&mut self, state: &mut RunState) -> Result<Vec<Message>, String> {
        let env = &mut self.env;
        panic::catch_unwind(AssertUnwindSafe(move || env.tick(state))).map_err(describe_panic)
    }
}
