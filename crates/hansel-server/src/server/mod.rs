//! SSH server implementation

mod handler;
mod listener;

pub use handler::{ClientHandler, SshConfig};
pub use listener::SshServer;
