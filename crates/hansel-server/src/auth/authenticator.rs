//! Admission decisions for inbound connections

use std::sync::Arc;

use hansel_core::error::StoreError;
use hansel_core::Identity;

use super::store::IdentityStore;

/// Outcome of one authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Identity is authorized
    Admit,
    /// Identity is unknown and now awaits approval; the handshake is refused
    Pending,
    /// The attempt failed (store error or malformed identity)
    Reject,
}

/// Decides admit/pending/reject using the identity store
#[derive(Debug, Clone)]
pub struct Authenticator {
    store: Arc<IdentityStore>,
}

impl Authenticator {
    /// Create an authenticator over `store`
    pub fn new(store: Arc<IdentityStore>) -> Self {
        Self { store }
    }

    /// The backing store
    pub fn store(&self) -> &Arc<IdentityStore> {
        &self.store
    }

    /// Decide on `identity`, doing file I/O on the blocking pool
    pub async fn authenticate(&self, identity: Identity) -> AuthDecision {
        let store = Arc::clone(&self.store);
        let user = identity.user.clone();
        let result = tokio::task::spawn_blocking(move || decide(&store, &identity))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!("Identity store failure while authenticating {}: {}", user, e);
                AuthDecision::Reject
            }
        }
    }
}

fn decide(store: &IdentityStore, identity: &Identity) -> Result<AuthDecision, StoreError> {
    if !identity.is_well_formed() {
        tracing::warn!("Rejecting malformed identity {:?}", identity.user);
        return Ok(AuthDecision::Reject);
    }

    if store.is_authorized(identity)? {
        tracing::info!("Admitted {}", identity);
        return Ok(AuthDecision::Admit);
    }

    if store.mark_pending(identity)? {
        tracing::info!("New identity {} recorded as pending approval", identity);
    } else {
        tracing::info!("Identity {} is still pending approval", identity);
    }
    Ok(AuthDecision::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator(dir: &std::path::Path) -> Authenticator {
        let store = IdentityStore::open(&dir.join("authorized"), &dir.join("pending")).unwrap();
        Authenticator::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_authorized_identity_is_admitted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("authorized"), "alice=fp123\n").unwrap();
        let auth = authenticator(dir.path());

        let decision = auth.authenticate(Identity::new("alice", "fp123")).await;
        assert_eq!(decision, AuthDecision::Admit);
        assert!(auth.store().pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_identity_goes_pending_once() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(dir.path());
        let bob = Identity::new("bob", "fpXYZ");

        assert_eq!(auth.authenticate(bob.clone()).await, AuthDecision::Pending);
        assert_eq!(auth.authenticate(bob.clone()).await, AuthDecision::Pending);
        assert_eq!(auth.store().pending().unwrap(), vec![bob]);
    }

    #[tokio::test]
    async fn test_approval_applies_on_next_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(dir.path());
        let carol = Identity::new("carol", "fp1");

        assert_eq!(auth.authenticate(carol.clone()).await, AuthDecision::Pending);
        std::fs::write(dir.path().join("authorized"), "carol=fp1\n").unwrap();
        assert_eq!(auth.authenticate(carol).await, AuthDecision::Admit);
    }

    #[tokio::test]
    async fn test_store_failure_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(dir.path());
        std::fs::remove_file(dir.path().join("authorized")).unwrap();

        let decision = auth.authenticate(Identity::new("dave", "fp2")).await;
        assert_eq!(decision, AuthDecision::Reject);
    }

    #[tokio::test]
    async fn test_malformed_users_rejected_without_pending_record() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(dir.path());

        for user in ["", "a=b", " bob", "x\nalice"] {
            for _ in 0..3 {
                let decision = auth.authenticate(Identity::new(user, "SHA256:fp")).await;
                assert_eq!(decision, AuthDecision::Reject, "{:?}", user);
            }
        }

        assert!(auth.store().pending().unwrap().is_empty());
        let content = std::fs::read_to_string(dir.path().join("pending")).unwrap();
        assert_eq!(content, "");
    }
}
