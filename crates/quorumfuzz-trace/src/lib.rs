//! Trace data model for quorumfuzz.
//!
//! Two kinds of traces flow through the fuzzer:
//!
//! - A [`Schedule`] is the replay tape: the ordered sequence of
//!   [`SchedulingChoice`]s the execution engine consumed during one run.
//!   Feeding the same schedule back into the engine reproduces the run.
//! - An [`EventTrace`] is the observation stream: the ordered sequence of
//!   [`Event`]s recorded while the cluster executed. Only the event trace is
//!   shipped to the model-checking oracle; the schedule stays local for
//!   replay and mutation.
//!
//! Both serialise to plain JSON arrays. That form is canonical: the SHA-256
//! content keys used by the coverage guiders are computed over it, so two
//! traces with the same ordered content always hash identically.

pub mod choice;
pub mod event;
pub mod stats;

pub use choice::{Schedule, SchedulingChoice};
pub use event::{Event, EventName, EventTrace};
pub use stats::CoverageStats;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 over the canonical JSON form of a serialisable value.
///
/// Returns the hash of the empty string if serialisation fails; the trace
/// types in this crate cannot fail to serialise.
pub(crate) fn sha256_json<T: serde::Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
