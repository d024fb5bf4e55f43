//! Control socket client
//!
//! Sends one `ControlRequest` to the server's local control socket and
//! collects the `Result` records it answers with.

mod client;

pub use client::{query_stream, ControlClient, DEFAULT_QUERY_TIMEOUT};
