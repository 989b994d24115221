//! A minimal, deterministic Raft implementation for schedule fuzzing.
//!
//! The fuzzer drives a cluster of these nodes through explicit `step`/`tick`
//! calls; nothing here runs on its own thread or consults ambient time or
//! randomness. The single source of nondeterminism — election-timeout
//! jitter — is drawn through the injected [`Rand`] capability, so the host
//! can record every draw and replay it byte-for-byte.
//!
//! The API follows the classic raw-node shape:
//!
//! 1. [`RawNode::step`] feeds one message in, [`RawNode::tick`] advances
//!    logical time.
//! 2. [`RawNode::ready`] hands back everything the host must act on:
//!    entries to persist, newly committed entries, outbound messages and a
//!    changed hard state.
//! 3. The host persists into its [`MemoryStorage`] and calls
//!    [`RawNode::advance`].
//!
//! Storage lives outside the node: crashing a node drops the `RawNode` (all
//! volatile state) while the host retains the storage, and a restarted node
//! is rebuilt from it. Log compaction and snapshots are not implemented —
//! in-memory storage is never compacted within a fuzzing run.

pub mod message;
pub mod node;
pub mod storage;

pub use message::{Entry, Message, MessageType};
pub use node::{Config, RaftError, Rand, RawNode, Ready, StateRole, Status};
pub use storage::{ConfState, HardState, MemoryStorage, StorageError};
