//! Job records and the durable state machine.

pub mod model;
pub mod store;

pub use model::{Job, JobStatus};
pub use store::{JobStore, MemoryJobStore, spawn_reaper};
