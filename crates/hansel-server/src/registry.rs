//! Client registry
//!
//! Directory of live sessions keyed by client name. Each entry holds a weak
//! reference to the session plus a snapshot of what it last reported, so
//! queries never touch a live session. The map sits behind one std
//! `RwLock` that is held only for map access, never across `.await`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use hansel_core::time::current_time_millis;
use hansel_core::{ClientPattern, ClientSnapshot, SessionId};
use hansel_protocol::{Message, ResultMessage};

use crate::distributor::{DeliveryFailure, DistributionReport};
use crate::session::SessionHandle;

#[derive(Debug)]
struct RegistryEntry {
    session: Weak<SessionHandle>,
    snapshot: ClientSnapshot,
}

impl RegistryEntry {
    /// The session, if it is still alive and not tearing down
    fn live_session(&self) -> Option<Arc<SessionHandle>> {
        self.session.upgrade().filter(|s| s.is_active())
    }
}

/// Registry of active sessions
#[derive(Debug, Default)]
pub struct ClientRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under its client name
    ///
    /// A previous entry under the same name is replaced; if its session is
    /// still alive it is closed, since a name maps to exactly one session.
    /// Returns the ID of the replaced session.
    pub fn register(&self, session: &Arc<SessionHandle>) -> Option<SessionId> {
        let name = session.client_name().to_string();
        let entry = RegistryEntry {
            session: Arc::downgrade(session),
            snapshot: ClientSnapshot {
                client_name: name.clone(),
                session_id: session.id(),
                remote_address: session.remote_address().map(str::to_string),
                connected_at: session.connected_at(),
                last_seen: session.last_seen(),
                last_status: None,
                last_result: None,
            },
        };

        let replaced = self.write().insert(name.clone(), entry);

        let replaced = replaced?;
        let stale_id = replaced.snapshot.session_id;
        tracing::info!("{} replaces {} for client {}", session.id(), stale_id, name);
        if let Some(stale) = replaced.session.upgrade() {
            stale.close();
        }
        Some(stale_id)
    }

    /// Remove the entry for `name` if it still belongs to `session_id`
    ///
    /// A session that was replaced by a reconnect leaves the newer entry
    /// alone. Returns true if an entry was removed.
    pub fn unregister(&self, name: &str, session_id: SessionId) -> bool {
        let mut entries = self.write();
        match entries.get(name) {
            Some(entry) if entry.snapshot.session_id == session_id => {
                entries.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Snapshots of live clients whose name matches, sorted by name
    pub fn find(&self, pattern: &ClientPattern) -> Vec<ClientSnapshot> {
        let mut found: Vec<ClientSnapshot> = self
            .read()
            .iter()
            .filter(|(name, _)| pattern.is_match(name))
            .filter_map(|(_, entry)| {
                let session = entry.live_session()?;
                let mut snapshot = entry.snapshot.clone();
                snapshot.last_seen = snapshot.last_seen.max(session.last_seen());
                Some(snapshot)
            })
            .collect();
        found.sort_by(|a, b| a.client_name.cmp(&b.client_name));
        found
    }

    /// Live sessions whose client name matches
    pub fn find_sessions(&self, pattern: &ClientPattern) -> Vec<Arc<SessionHandle>> {
        self.read()
            .iter()
            .filter(|(name, _)| pattern.is_match(name))
            .filter_map(|(_, entry)| entry.live_session())
            .collect()
    }

    /// All live sessions
    pub fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.read()
            .values()
            .filter_map(RegistryEntry::live_session)
            .collect()
    }

    /// Send `message` to every live client whose snapshot satisfies
    /// `predicate`
    ///
    /// Sends happen after the lock is released.
    pub fn broadcast(
        &self,
        predicate: impl Fn(&ClientSnapshot) -> bool,
        message: &Message,
    ) -> DistributionReport {
        let targets: Vec<Arc<SessionHandle>> = self
            .read()
            .values()
            .filter(|entry| predicate(&entry.snapshot))
            .filter_map(RegistryEntry::live_session)
            .collect();

        let mut report = DistributionReport::default();
        for session in targets {
            match session.send(message.clone()) {
                Ok(()) => report.delivered.push(session.client_name().to_string()),
                Err(error) => report.failures.push(DeliveryFailure::Rejected {
                    client_name: session.client_name().to_string(),
                    error,
                }),
            }
        }
        report
    }

    /// Record the status text last reported by `name`
    ///
    /// Ignored (returns false) if the entry now belongs to another session.
    pub fn record_status(&self, name: &str, session_id: SessionId, text: &str) -> bool {
        self.update(name, session_id, |snapshot| {
            snapshot.last_status = Some(text.to_string());
        })
    }

    /// Record the result last reported by `name`
    pub fn record_result(&self, name: &str, session_id: SessionId, result: ResultMessage) -> bool {
        self.update(name, session_id, |snapshot| {
            snapshot.last_result = Some(result);
        })
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no client is registered
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn update(
        &self,
        name: &str,
        session_id: SessionId,
        f: impl FnOnce(&mut ClientSnapshot),
    ) -> bool {
        let mut entries = self.write();
        match entries.get_mut(name) {
            Some(entry) if entry.snapshot.session_id == session_id => {
                f(&mut entry.snapshot);
                entry.snapshot.last_seen = current_time_millis();
                true
            }
            _ => false,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hansel_core::error::SessionError;
    use hansel_core::Identity;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn session(id: u64, name: &str) -> (Arc<SessionHandle>, mpsc::Receiver<Message>) {
        let (handle, rx) = SessionHandle::new(
            SessionId::new(id),
            Identity::new(name, "fp"),
            Some("127.0.0.1:40000".to_string()),
            4,
            CancellationToken::new(),
        );
        let handle = Arc::new(handle);
        handle.activate();
        (handle, rx)
    }

    fn pattern(p: &str) -> ClientPattern {
        ClientPattern::new(p).unwrap()
    }

    #[test]
    fn test_register_and_find() {
        let registry = ClientRegistry::new();
        let (alice, _a) = session(1, "alice");
        let (bob, _b) = session(2, "bob");
        registry.register(&alice);
        registry.register(&bob);

        let found = registry.find(&pattern("ali.*"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].client_name, "alice");
        assert_eq!(registry.find(&pattern(".*")).len(), 2);
        assert!(registry.find(&pattern("carol")).is_empty());
    }

    #[test]
    fn test_reregistration_replaces_and_closes_stale() {
        let registry = ClientRegistry::new();
        let (old, _o) = session(1, "alice");
        let (new, _n) = session(2, "alice");

        assert_eq!(registry.register(&old), None);
        assert_eq!(registry.register(&new), Some(SessionId::new(1)));
        assert!(!old.is_active());

        // The stale session's teardown must not evict the new entry
        assert!(!registry.unregister("alice", SessionId::new(1)));
        let found = registry.find(&pattern("alice"));
        assert_eq!(found[0].session_id, SessionId::new(2));

        assert!(registry.unregister("alice", SessionId::new(2)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_skips_closing_and_dropped_sessions() {
        let registry = ClientRegistry::new();
        let (alice, _a) = session(1, "alice");
        let (bob, _b) = session(2, "bob");
        registry.register(&alice);
        registry.register(&bob);

        alice.close();
        drop(bob);

        assert!(registry.find(&pattern(".*")).is_empty());
        assert!(registry.sessions().is_empty());
        // Entries stay until their owners unregister them
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_records_ignore_foreign_session() {
        let registry = ClientRegistry::new();
        let (alice, _a) = session(5, "alice");
        registry.register(&alice);

        assert!(registry.record_status("alice", SessionId::new(5), "keepalive"));
        assert!(!registry.record_status("alice", SessionId::new(4), "stale"));
        let result = ResultMessage {
            sequence: 1,
            client_name: "alice".to_string(),
            outputs: vec!["hi\n".to_string()],
        };
        assert!(registry.record_result("alice", SessionId::new(5), result.clone()));

        let snapshot = &registry.find(&pattern("alice"))[0];
        assert_eq!(snapshot.last_status.as_deref(), Some("keepalive"));
        assert_eq!(snapshot.last_result.as_ref(), Some(&result));
    }

    #[test]
    fn test_broadcast_reports_per_target() {
        let registry = ClientRegistry::new();
        let (web1, mut rx1) = session(1, "web-1");
        let (web2, _rx2) = session(2, "web-2");
        let (db, _rx3) = session(3, "db-1");
        registry.register(&web1);
        registry.register(&web2);
        registry.register(&db);
        web2.close();

        let report = registry.broadcast(
            |s| s.client_name.starts_with("web"),
            &Message::status("hansel-server", "ping"),
        );
        assert_eq!(report.delivered, vec!["web-1".to_string()]);
        assert!(report.failures.is_empty());
        assert_eq!(rx1.try_recv().unwrap(), Message::status("hansel-server", "ping"));

        for _ in 0..4 {
            web1.send(Message::status("x", "fill")).ok();
        }
        let report = registry.broadcast(|_| true, &Message::status("x", "more"));
        assert!(report.failures.iter().any(|f| matches!(
            f,
            DeliveryFailure::Rejected { client_name, error: SessionError::QueueFull { .. } }
                if client_name == "web-1"
        )));
    }

    #[test]
    fn test_concurrent_find_never_sees_torn_down_sessions() {
        let registry = Arc::new(ClientRegistry::new());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let reader = {
            let registry = registry.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let all = pattern(".*");
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    for session in registry.find_sessions(&all) {
                        // A session handed out by find was active at lookup time;
                        // it may close afterwards but never before
                        assert_ne!(session.state(), hansel_core::SessionState::Admitted);
                    }
                    for snapshot in registry.find(&all) {
                        assert!(snapshot.client_name.starts_with("agent-"));
                    }
                }
            })
        };

        for round in 0..200u64 {
            let name = format!("agent-{}", round % 7);
            let (handle, _rx) = session(round, &name);
            registry.register(&handle);
            // Teardown order: close first, then unregister
            handle.close();
            assert!(registry
                .find(&pattern(&name))
                .iter()
                .all(|s| s.session_id != SessionId::new(round)));
            registry.unregister(&name, SessionId::new(round));
            handle.mark_closed();
        }

        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        reader.join().unwrap();
        assert!(registry.find(&pattern(".*")).is_empty());
    }
}
