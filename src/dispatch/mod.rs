//! Tool-call dispatch: routing structured function calls from the agent
//! model to capability handlers, with terminal-call filtering.

pub mod builtin;
pub mod call;
pub mod dispatcher;
pub mod registry;

pub use call::{BatchOutcome, CallOutcome, TerminalKind, ToolCall, ToolResponse, terminal_kind};
pub use dispatcher::Dispatcher;
pub use registry::{Tool, ToolDefinition, ToolRegistry, require_str};
