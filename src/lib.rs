//! Conveyor — durable asynchronous job pipeline for agent tool work.

pub mod channel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod limiter;
pub mod notify;
pub mod pipeline;
pub mod worker;
