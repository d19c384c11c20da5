//! CLI command implementations

mod forward;
mod serve;

pub use forward::{forward_command, forward_listener, ForwardPlan, ForwardRoute};
pub use serve::{serve_command, serve_transport};
