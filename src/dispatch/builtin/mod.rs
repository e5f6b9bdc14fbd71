//! Built-in capabilities registered at startup.

pub mod messaging;
pub mod repository;

pub use messaging::ComposeMessageTool;
pub use repository::{ReadRepoFileTool, RepositoryHost, UpdateRepoFileTool};
