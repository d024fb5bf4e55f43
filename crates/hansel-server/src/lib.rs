//! hansel-server: fleet control plane daemon
//!
//! The server accepts SSH connections from agents, admits them against the
//! identity store, keeps one session per client in the registry, pushes
//! tasks to matching sessions and answers operator queries over a local
//! control socket.

pub mod auth;
pub mod control;
pub mod daemon;
pub mod distributor;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;

pub use daemon::run_server;
pub use distributor::{DistributionReport, TaskCatalog, TaskDistributor};
pub use registry::ClientRegistry;
pub use state::ServerState;
