//! Identity admission
//!
//! Agents are admitted by `(user, key fingerprint)` pairs kept in two line
//! files. Unknown identities are recorded as pending so an administrator can
//! approve them by moving the line into the authorized file; no restart is
//! needed because every attempt re-reads the files.

mod authenticator;
mod store;

pub use authenticator::{AuthDecision, Authenticator};
pub use store::{IdentityStore, LockedFile};
