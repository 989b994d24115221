//! The Raft cluster environment.
//!
//! Wraps N in-process Raft nodes so the execution engine can drive them
//! deterministically: deliver one message at a time, advance logical time in
//! fixed quanta, crash and restart individual replicas, and observe
//! everything as [`quorumfuzz_trace::Event`]s. All randomness the cluster
//! asks for is routed back through the engine's [`RunContext`], which
//! records it on the replay tape.

pub mod checker;
pub mod environment;

pub use checker::{log_prefix_agreement, single_leader, Checker};
pub use environment::{message_event, EnvError, EnvironmentConfig, RaftEnvironment, RunContext};
