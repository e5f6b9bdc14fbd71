//! Progress streaming and outbound callback notifications.

pub mod callback;
pub mod progress;

pub use callback::{CallbackPayload, CallbackSender};
pub use progress::{ProgressEvent, ProgressNotifier};
