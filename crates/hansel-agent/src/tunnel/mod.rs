//! Transport to the server

mod connector;
mod reconnect;

pub use connector::SshDialer;
pub use reconnect::ExponentialBackoff;
