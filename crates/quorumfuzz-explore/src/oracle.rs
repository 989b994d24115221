//! HTTP client for the TLC model-checking oracle.
//!
//! The oracle replays a concrete event trace against the TLA⁺ specification
//! and answers with the sequence of abstract states it passed through. Two
//! event traces mapping to the same key sequence are equivalent at the
//! abstract level.

use quorumfuzz_trace::{Event, EventTrace};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ureq::Agent;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("error sending trace to tlc: {0}")]
    Transport(#[from] Box<ureq::Error>),
    #[error("error reading response from tlc: {0}")]
    Read(#[from] std::io::Error),
    #[error("error parsing tlc response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("tlc response has {states} states but {keys} keys")]
    Mismatched { states: usize, keys: usize },
}

/// Wire form of the oracle's answer.
#[derive(Debug, Deserialize)]
struct TlcResponse {
    #[serde(rename = "States")]
    states: Vec<String>,
    #[serde(rename = "Keys")]
    keys: Vec<i64>,
}

/// One abstract state: its TLA⁺ representation and its hash key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlcState {
    #[serde(rename = "Repr")]
    pub repr: String,
    #[serde(rename = "Key")]
    pub key: i64,
}

/// Blocking client for one TLC server.
pub struct TlcClient {
    addr: String,
    agent: Agent,
}

impl TlcClient {
    /// `addr` is `host:port`, without a scheme.
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            agent: Agent::new(),
        }
    }

    /// Ship an event trace and parse the abstract state sequence.
    ///
    /// A `{Reset: true}` terminator is appended so the oracle knows the
    /// trace is complete.
    pub fn send_trace(&self, events: &EventTrace) -> Result<Vec<TlcState>, OracleError> {
        let mut wire = events.clone();
        wire.append(Event::reset_marker());
        let body = serde_json::to_string(&wire)?;
        let response = self
            .agent
            .post(&format!("http://{}/execute", self.addr))
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(Box::new)?;
        let text = response.into_string()?;
        let parsed: TlcResponse = serde_json::from_str(&text)?;
        if parsed.states.len() != parsed.keys.len() {
            return Err(OracleError::Mismatched {
                states: parsed.states.len(),
                keys: parsed.keys.len(),
            });
        }
        Ok(parsed
            .states
            .into_iter()
            .zip(parsed.keys)
            .map(|(repr, key)| TlcState { repr, key })
            .collect())
    }
}

/// Normalise TLA⁺ state strings for persistence: newlines become commas,
/// conjunction markers are stripped, and tuple brackets are decoded.
pub fn normalize_state_trace(states: &[TlcState]) -> Vec<TlcState> {
    states
        .iter()
        .map(|s| TlcState {
            repr: s
                .repr
                .replace('\n', ",")
                .replace("/\\", "")
                .replace(">>", "]")
                .replace("<<", "["),
            key: s.key,
        })
        .collect()
}
