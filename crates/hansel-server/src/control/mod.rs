//! Operator control socket
//!
//! A local Unix socket speaking the regular frame protocol. See
//! [`hansel_core::control`] for the exchange and record layout.

mod server;

pub use server::{answer_query, bind_control_socket, ControlServer};
