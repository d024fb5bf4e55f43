//! Server-side sessions
//!
//! One session per admitted transport connection. The connection task owns
//! the session and runs two loops over its channel: an inbound decode loop
//! and an outbound drain loop fed by a bounded queue.

mod handle;
mod reaper;
mod runner;

pub use handle::SessionHandle;
pub use reaper::{reap_idle, run_idle_reaper};
pub use runner::run_session;
