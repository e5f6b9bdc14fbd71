//! Topic-addressed message passing between the admission path and workers.

pub mod broker;
pub mod envelope;

pub use broker::{BrokerConfig, Delivery, MessageBroker, Subscription};
pub use envelope::{JobEnvelope, MessageBody, TaskSpec};
