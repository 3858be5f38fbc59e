//! External process execution.
//!
//! - `command` - one-shot commands (git, uv, jileml) that must succeed
//! - `server` - the model server started for `run`, with readiness polling

mod command;
mod server;

pub use command::{capture_stdout, python_for, run_command, CommandSpec};
pub use server::{probe_ready, ServerProcess};
