//! hansel-core: Core abstractions and configuration for hansel
//!
//! This crate provides shared types, the error taxonomy, configuration
//! structures, task-definition loading and key material helpers used by the
//! server, agent, and CLI components.

pub mod config;
pub mod control;
pub mod error;
pub mod keys;
pub mod pattern;
pub mod tasks;
pub mod time;
pub mod types;

pub use error::HanselError;
pub use pattern::ClientPattern;
pub use types::{ClientSnapshot, Identity, SessionId, SessionState};
