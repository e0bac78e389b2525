//! Core Raft consensus engine.
//!
//! This crate implements the role state machine, leader election,
//! replication, and commit advancement of the Raft protocol, independent of
//! any particular durable log, application state machine, or wire transport.
//! Those concerns are expressed as the `Log`, `StateMachine`, and `Rpc`
//! traits in the `log`, `state_machine`, and `rpc` modules; an embedder
//! supplies real implementations and wires them into a `RaftEngine`.

pub mod config;
pub mod engine;
pub mod error;
pub mod log;
pub mod rpc;
pub mod state_machine;

pub use config::RaftConfig;
pub use engine::{RaftEngine, Role};
pub use error::{RaftError, Result};
pub use log::{Entry, Log, MemoryLog};
pub use rpc::{AppendEntriesArgs, AppendEntriesReply, PeerId, RequestVoteArgs, RequestVoteReply, Rpc};
pub use state_machine::{Command, RecordingStateMachine, StateMachine};
