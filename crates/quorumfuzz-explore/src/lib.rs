//! Coverage-guided schedule fuzzing for a Raft cluster.
//!
//! This crate implements the closed feedback loop that makes quorumfuzz
//! useful:
//!
//! 1. The [`engine`] runs one schedule against the in-process cluster and
//!    records `(schedule, event trace)`.
//! 2. A [`guider`] ships the event trace to the TLC oracle and decides
//!    whether the run reached anything new.
//! 3. When it did, the configured [`mutator`] derives child schedules and
//!    the [`corpus`] queues them for replay.
//!
//! The loop is AFL in shape, but the input is a distributed-system schedule
//! (message deliveries, crashes, restarts, client requests, recorded random
//! draws) instead of a byte buffer.
//!
//! # Module structure
//!
//! - [`engine`] — deterministic, replayable schedule execution
//! - [`corpus`] — FIFO of interesting schedules
//! - [`mutator`] — schedule-level mutation operators
//! - [`guider`] — coverage signals (abstract states, event chains, lines)
//! - [`oracle`] — HTTP client for the TLC model checker
//! - [`fuzzer`] — the fuzz loop
//! - [`comparison`] — N-way experiment driver
//! - [`measure`] — cumulative coverage over recorded traces
//!
//! # Determinism
//!
//! Every RNG is an explicitly seeded `ChaCha8Rng`, and every random value
//! the cluster observes lands on the replay tape. Re-running a recorded
//! schedule with the same master seed reproduces the event trace
//! byte-for-byte.

pub mod comparison;
pub mod corpus;
pub mod engine;
pub mod fuzzer;
pub mod guider;
pub mod measure;
pub mod mutator;
pub mod oracle;

pub use comparison::Comparison;
pub use corpus::{default_copy_filter, Corpus};
pub use engine::{EngineConfig, Executor, RunResult};
pub use fuzzer::{FuzzError, FuzzStats, Fuzzer, FuzzerConfig};
pub use guider::{
    CoverageSource, Guider, GuiderError, LineCoverageGuider, TlcStateGuider, TraceCoverageGuider,
};
pub use measure::CoverageMeasurer;
pub use mutator::{
    Combined, Empty, FlipBooleans, Mutator, ScaleDownInts, ScaleUpInts, SkipNodes, SwapCrashNodes,
    SwapIntegers, SwapMaxMessages, SwapNodes,
};
pub use oracle::{OracleError, TlcClient, TlcState};
