//! Guiders — score finished runs and decide what deserves mutation.
//!
//! All three guiders share the TLC-backed base: every run's event trace is
//! shipped to the oracle and folded into the abstract-state coverage maps.
//! The wrappers layer one extra signal on top (per-node event chains, or
//! host line coverage) and report their `new_units` from that signal
//! instead.
//!
//! Coverage maps sit behind a per-guider mutex so a comparison driver may
//! run experiment arms in parallel without sharing state unsafely.

use crate::oracle::{normalize_state_trace, OracleError, TlcClient, TlcState};
use log::{info, warn};
use quorumfuzz_trace::{CoverageStats, Event, EventTrace, Schedule};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuiderError {
    /// The feedback loop cannot continue without the oracle; this aborts
    /// the experiment.
    #[error("oracle failure: {0}")]
    Oracle(#[from] OracleError),
    #[error("coverage source failure: {0}")]
    Coverage(String),
}

/// Scores one finished run.
///
/// `check` returns `(new_units, normalised_rate)`: how many new coverage
/// units the run contributed, and that count relative to the previous
/// total (informational only).
pub trait Guider {
    fn check(&self, trace: &Schedule, events: &EventTrace) -> Result<(usize, f64), GuiderError>;
    fn coverage(&self) -> CoverageStats;
    /// Clear per-run state. The label identifies the experiment arm for
    /// any persisted output.
    fn reset(&mut self, label: &str);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sha256_json<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

#[derive(Default)]
struct TlcMaps {
    states: HashSet<i64>,
    traces: HashSet<String>,
    state_traces: HashSet<String>,
    count: usize,
}

/// Base guider: abstract-state coverage via the TLC oracle.
pub struct TlcStateGuider {
    client: TlcClient,
    record_path: Option<PathBuf>,
    maps: Mutex<TlcMaps>,
}

impl TlcStateGuider {
    pub fn new(tlc_addr: &str) -> Self {
        Self {
            client: TlcClient::new(tlc_addr),
            record_path: None,
            maps: Mutex::new(TlcMaps::default()),
        }
    }

    /// Persist every checked trace as `<n>.json` under `record_path`. The
    /// directory is recreated from scratch.
    pub fn with_recording(tlc_addr: &str, record_path: impl Into<PathBuf>) -> Self {
        let record_path = record_path.into();
        if record_path.exists() {
            if let Err(e) = fs::remove_dir_all(&record_path) {
                warn!("failed to clear record path {:?}: {e}", record_path);
            }
        }
        if let Err(e) = fs::create_dir_all(&record_path) {
            warn!("failed to create record path {:?}: {e}", record_path);
        }
        Self {
            client: TlcClient::new(tlc_addr),
            record_path: Some(record_path),
            maps: Mutex::new(TlcMaps::default()),
        }
    }

    fn record_trace(&self, index: usize, trace: &Schedule, events: &EventTrace, states: &[TlcState]) {
        let Some(dir) = &self.record_path else {
            return;
        };
        let data = serde_json::json!({
            "trace": trace,
            "event_trace": events,
            "state_trace": normalize_state_trace(states),
        });
        let path = dir.join(format!("{index}.json"));
        match serde_json::to_vec_pretty(&data) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&path, bytes) {
                    warn!("failed to record trace {:?}: {e}", path);
                }
            }
            Err(e) => warn!("failed to serialise trace {index}: {e}"),
        }
    }
}

impl Guider for TlcStateGuider {
    fn check(&self, trace: &Schedule, events: &EventTrace) -> Result<(usize, f64), GuiderError> {
        let trace_hash = trace.sha256();
        let (prev_states, index) = {
            let mut maps = lock(&self.maps);
            maps.traces.insert(trace_hash);
            let index = maps.count;
            maps.count += 1;
            (maps.states.len(), index)
        };

        let states = self.client.send_trace(events)?;
        self.record_trace(index, trace, events, &states);

        let mut new_states = 0;
        {
            let mut maps = lock(&self.maps);
            for s in &states {
                if maps.states.insert(s.key) {
                    new_states += 1;
                }
            }
            maps.state_traces.insert(sha256_json(&states));
        }
        Ok((new_states, new_states as f64 / prev_states.max(1) as f64))
    }

    fn coverage(&self) -> CoverageStats {
        let maps = lock(&self.maps);
        CoverageStats {
            unique_states: maps.states.len(),
            unique_traces: maps.traces.len(),
            unique_state_traces: maps.state_traces.len(),
        }
    }

    fn reset(&mut self, label: &str) {
        let mut maps = lock(&self.maps);
        info!(
            "resetting coverage for {label}: {} states, {} traces",
            maps.states.len(),
            maps.traces.len()
        );
        maps.states.clear();
        maps.traces.clear();
        maps.state_traces.clear();
    }
}

/// One event linked to its predecessor on the same node. The chain key of
/// a whole trace is the hash of all links, which makes two traces
/// equivalent exactly when every node observed the same event sequence.
#[derive(Serialize)]
struct EventLink<'a> {
    #[serde(flatten)]
    event: &'a Event,
    #[serde(rename = "Node")]
    node: u64,
    #[serde(rename = "Prev")]
    prev: String,
}

fn event_chain_key(events: &EventTrace) -> String {
    let mut last_on_node: HashMap<u64, String> = HashMap::new();
    let mut links: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    for event in events.iter() {
        let prev = last_on_node.get(&event.node).cloned().unwrap_or_default();
        let link = EventLink {
            event,
            node: event.node,
            prev,
        };
        let id = sha256_json(&link);
        let value = serde_json::to_value(&link).unwrap_or_default();
        last_on_node.insert(event.node, id.clone());
        links.insert(id, value);
    }
    sha256_json(&serde_json::json!({ "Nodes": links }))
}

/// Wraps the TLC guider; reports novelty over per-node event chains.
pub struct TraceCoverageGuider {
    inner: TlcStateGuider,
    chains: Mutex<HashSet<String>>,
}

impl TraceCoverageGuider {
    pub fn new(inner: TlcStateGuider) -> Self {
        Self {
            inner,
            chains: Mutex::new(HashSet::new()),
        }
    }
}

impl Guider for TraceCoverageGuider {
    fn check(&self, trace: &Schedule, events: &EventTrace) -> Result<(usize, f64), GuiderError> {
        self.inner.check(trace, events)?;
        let key = event_chain_key(events);
        let mut chains = lock(&self.chains);
        let new = usize::from(chains.insert(key));
        Ok((new, new as f64 / chains.len().max(1) as f64))
    }

    fn coverage(&self) -> CoverageStats {
        let mut stats = self.inner.coverage();
        stats.unique_traces = lock(&self.chains).len();
        stats
    }

    fn reset(&mut self, label: &str) {
        lock(&self.chains).clear();
        self.inner.reset(label);
    }
}

/// Capability for collecting line coverage of the system under test.
///
/// Host-language coverage tooling is an external collaborator; anything
/// that can produce a set of stable line keys (e.g. `file.rs:42`) after a
/// run can back this guider.
pub trait CoverageSource: Send {
    fn covered_lines(&mut self) -> Result<HashSet<String>, GuiderError>;
}

struct LineState {
    source: Box<dyn CoverageSource>,
    covered: Option<HashSet<String>>,
}

/// Wraps the TLC guider; reports newly covered source lines.
pub struct LineCoverageGuider {
    inner: TlcStateGuider,
    state: Mutex<LineState>,
}

impl LineCoverageGuider {
    pub fn new(inner: TlcStateGuider, source: Box<dyn CoverageSource>) -> Self {
        Self {
            inner,
            state: Mutex::new(LineState {
                source,
                covered: None,
            }),
        }
    }
}

impl Guider for LineCoverageGuider {
    fn check(&self, trace: &Schedule, events: &EventTrace) -> Result<(usize, f64), GuiderError> {
        self.inner.check(trace, events)?;
        let mut state = lock(&self.state);
        let snapshot = state.source.covered_lines()?;
        match &mut state.covered {
            None => {
                let initial = snapshot.len();
                state.covered = Some(snapshot);
                Ok((initial, 1.0))
            }
            Some(covered) => {
                let before = covered.len();
                covered.extend(snapshot);
                let new_lines = covered.len() - before;
                Ok((new_lines, new_lines as f64 / before.max(1) as f64))
            }
        }
    }

    fn coverage(&self) -> CoverageStats {
        self.inner.coverage()
    }

    fn reset(&mut self, label: &str) {
        let mut state = lock(&self.state);
        let lines = state.covered.as_ref().map(|c| c.len()).unwrap_or(0);
        info!("lines covered for {label}: {lines}");
        state.covered = None;
        drop(state);
        self.inner.reset(label);
    }
}
