//! Job workers — consume deliveries from the job topic and drive each job
//! through its state machine.
//!
//! Core components:
//! - `agent` — the model collaborator trait behind the tool loop
//! - `worker` — delivery handling, claim tie-break, agent loop, settlement

pub mod agent;
pub mod worker;

pub use agent::{AgentModel, TranscriptEntry, TurnRequest};
pub use worker::{JobWorker, WorkerDeps, spawn_workers};
