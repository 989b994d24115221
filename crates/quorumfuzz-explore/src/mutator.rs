//! Schedule mutation — derives candidate child schedules from a parent.
//!
//! Every operator targets one kind of scheduling choice and returns `None`
//! when the parent contains no such choice; that is the expected
//! "not applicable" outcome, not an error. Outputs are always fresh deep
//! copies, so corpus entries never share structure with their parents.

use quorumfuzz_trace::{EventTrace, Schedule, SchedulingChoice};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;

/// A schedule-to-schedule transformation.
///
/// Mutators may read the event trace for context but never modify it.
pub trait Mutator {
    fn mutate(&mut self, trace: &Schedule, events: &EventTrace) -> Option<Schedule>;
}

/// Indices of choices matching `pred`, in trace order.
fn positions(trace: &Schedule, pred: fn(&SchedulingChoice) -> bool) -> Vec<usize> {
    trace
        .iter()
        .enumerate()
        .filter(|(_, c)| pred(c))
        .map(|(i, _)| i)
        .collect()
}

/// Up to `k` distinct indices drawn from `0..len` (partial Fisher-Yates).
fn sample_distinct(rng: &mut ChaCha8Rng, len: usize, k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    let k = k.min(len);
    for i in 0..k {
        let j = rng.gen_range(i..len);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices
}

/// Never produces a child. Baseline for random-only arms.
pub struct Empty;

impl Mutator for Empty {
    fn mutate(&mut self, _trace: &Schedule, _events: &EventTrace) -> Option<Schedule> {
        None
    }
}

/// Negate up to `k` distinct recorded boolean draws.
pub struct FlipBooleans {
    flips: usize,
    rng: ChaCha8Rng,
}

impl FlipBooleans {
    pub fn new(flips: usize, seed: u64) -> Self {
        Self {
            flips,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for FlipBooleans {
    fn mutate(&mut self, trace: &Schedule, _events: &EventTrace) -> Option<Schedule> {
        let pos = positions(trace, SchedulingChoice::is_boolean);
        if pos.is_empty() {
            return None;
        }
        let mut out = trace.choices().to_vec();
        for i in sample_distinct(&mut self.rng, pos.len(), self.flips) {
            if let SchedulingChoice::RandomBoolean { value } = &mut out[pos[i]] {
                *value = !*value;
            }
        }
        Some(Schedule::from(out))
    }
}

/// Delete up to `k` distinct Node choices.
pub struct SkipNodes {
    skips: usize,
    rng: ChaCha8Rng,
}

impl SkipNodes {
    pub fn new(skips: usize, seed: u64) -> Self {
        Self {
            skips,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for SkipNodes {
    fn mutate(&mut self, trace: &Schedule, _events: &EventTrace) -> Option<Schedule> {
        let pos = positions(trace, SchedulingChoice::is_node);
        if pos.is_empty() {
            return None;
        }
        let dropped: BTreeSet<usize> = sample_distinct(&mut self.rng, pos.len(), self.skips)
            .into_iter()
            .map(|i| pos[i])
            .collect();
        let out: Schedule = trace
            .iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(_, c)| c.clone())
            .collect();
        Some(out)
    }
}

/// Swap up to `k` pairs of Node choices.
pub struct SwapNodes {
    swaps: usize,
    rng: ChaCha8Rng,
}

impl SwapNodes {
    pub fn new(swaps: usize, seed: u64) -> Self {
        Self {
            swaps,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for SwapNodes {
    fn mutate(&mut self, trace: &Schedule, _events: &EventTrace) -> Option<Schedule> {
        let pos = positions(trace, SchedulingChoice::is_node);
        if pos.is_empty() {
            return None;
        }
        let mut out = trace.choices().to_vec();
        for _ in 0..self.swaps.min(pos.len()) {
            let i = pos[self.rng.gen_range(0..pos.len())];
            let j = pos[self.rng.gen_range(0..pos.len())];
            out.swap(i, j);
        }
        Some(Schedule::from(out))
    }
}

/// Swap up to `k` pairs of recorded integer draws.
pub struct SwapIntegers {
    swaps: usize,
    rng: ChaCha8Rng,
}

impl SwapIntegers {
    pub fn new(swaps: usize, seed: u64) -> Self {
        Self {
            swaps,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for SwapIntegers {
    fn mutate(&mut self, trace: &Schedule, _events: &EventTrace) -> Option<Schedule> {
        let pos = positions(trace, SchedulingChoice::is_integer);
        if pos.is_empty() {
            return None;
        }
        let mut out = trace.choices().to_vec();
        for _ in 0..self.swaps.min(pos.len()) {
            let i = pos[self.rng.gen_range(0..pos.len())];
            let j = pos[self.rng.gen_range(0..pos.len())];
            out.swap(i, j);
        }
        Some(Schedule::from(out))
    }
}

/// Replace up to `k` positive integer draws `v` with `uniform(0, v)`.
pub struct ScaleDownInts {
    points: usize,
    rng: ChaCha8Rng,
}

impl ScaleDownInts {
    pub fn new(points: usize, seed: u64) -> Self {
        Self {
            points,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for ScaleDownInts {
    fn mutate(&mut self, trace: &Schedule, _events: &EventTrace) -> Option<Schedule> {
        let pos = positions(trace, SchedulingChoice::is_integer);
        if pos.is_empty() {
            return None;
        }
        let mut out = trace.choices().to_vec();
        for i in sample_distinct(&mut self.rng, pos.len(), self.points) {
            if let SchedulingChoice::RandomInteger { value } = &mut out[pos[i]] {
                if *value > 0 {
                    *value = self.rng.gen_range(0..*value);
                }
            }
        }
        Some(Schedule::from(out))
    }
}

/// Double up to `k` integer draws, capping at `max`.
pub struct ScaleUpInts {
    points: usize,
    max: usize,
    rng: ChaCha8Rng,
}

impl ScaleUpInts {
    pub fn new(points: usize, max: usize, seed: u64) -> Self {
        Self {
            points,
            max,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for ScaleUpInts {
    fn mutate(&mut self, trace: &Schedule, _events: &EventTrace) -> Option<Schedule> {
        let pos = positions(trace, SchedulingChoice::is_integer);
        if pos.is_empty() {
            return None;
        }
        let mut out = trace.choices().to_vec();
        for i in sample_distinct(&mut self.rng, pos.len(), self.points) {
            if let SchedulingChoice::RandomInteger { value } = &mut out[pos[i]] {
                *value = (*value * 2).min(self.max);
            }
        }
        Some(Schedule::from(out))
    }
}

/// Exchange the node identities of two crash points. Steps stay put.
pub struct SwapCrashNodes {
    rng: ChaCha8Rng,
}

impl SwapCrashNodes {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for SwapCrashNodes {
    fn mutate(&mut self, trace: &Schedule, _events: &EventTrace) -> Option<Schedule> {
        let pos = positions(trace, SchedulingChoice::is_stop);
        if pos.len() < 2 {
            return None;
        }
        let picked = sample_distinct(&mut self.rng, pos.len(), 2);
        let (first, second) = (pos[picked[0]], pos[picked[1]]);
        let mut out = trace.choices().to_vec();
        let node_at = |c: &SchedulingChoice| match c {
            SchedulingChoice::StopNode { node, .. } => *node,
            _ => 0,
        };
        let (a, b) = (node_at(&out[first]), node_at(&out[second]));
        if let SchedulingChoice::StopNode { node, .. } = &mut out[first] {
            *node = b;
        }
        if let SchedulingChoice::StopNode { node, .. } = &mut out[second] {
            *node = a;
        }
        Some(Schedule::from(out))
    }
}

/// Exchange the `max_messages` budgets of up to `k` pairs of Node choices.
pub struct SwapMaxMessages {
    swaps: usize,
    rng: ChaCha8Rng,
}

impl SwapMaxMessages {
    pub fn new(swaps: usize, seed: u64) -> Self {
        Self {
            swaps,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for SwapMaxMessages {
    fn mutate(&mut self, trace: &Schedule, _events: &EventTrace) -> Option<Schedule> {
        let pos = positions(trace, SchedulingChoice::is_node);
        if pos.len() < 2 {
            return None;
        }
        let mut out = trace.choices().to_vec();
        for _ in 0..self.swaps {
            let picked = sample_distinct(&mut self.rng, pos.len(), 2);
            let (first, second) = (pos[picked[0]], pos[picked[1]]);
            let budget = |c: &SchedulingChoice| match c {
                SchedulingChoice::Node { max_messages, .. } => *max_messages,
                _ => 0,
            };
            let (a, b) = (budget(&out[first]), budget(&out[second]));
            if let SchedulingChoice::Node { max_messages, .. } = &mut out[first] {
                *max_messages = b;
            }
            if let SchedulingChoice::Node { max_messages, .. } = &mut out[second] {
                *max_messages = a;
            }
        }
        Some(Schedule::from(out))
    }
}

/// Apply a list of mutators in order; `None` from any of them aborts the
/// whole chain.
pub struct Combined {
    mutators: Vec<Box<dyn Mutator>>,
}

impl Combined {
    pub fn new(mutators: Vec<Box<dyn Mutator>>) -> Self {
        Self { mutators }
    }
}

impl Mutator for Combined {
    fn mutate(&mut self, trace: &Schedule, events: &EventTrace) -> Option<Schedule> {
        let mut current = Schedule::from(trace.choices().to_vec());
        for m in &mut self.mutators {
            current = m.mutate(&current, events)?;
        }
        Some(current)
    }
}
