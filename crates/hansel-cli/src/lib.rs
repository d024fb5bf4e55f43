//! hansel-cli: Command-line interface for hansel
//!
//! Provides the `hansel` binary that runs the server, runs an agent, and
//! queries a running server over its control socket.

pub mod commands;
pub mod control;
pub mod output;
