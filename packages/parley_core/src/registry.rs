use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ChatError;
use crate::session::{ConnectionId, Outbox, Session, SessionStatus};

/// One entry of a broadcast snapshot
#[derive(Clone, Debug)]
pub struct Recipient {
    pub id: ConnectionId,
    pub name: String,
    pub(crate) outbox: Outbox,
}

/// Shared map from connection to session.
///
/// Every operation takes the lock exactly once and never awaits anything
/// else while holding it, so no socket I/O can happen inside the critical
/// section. Entries are kept ordered by connection id.
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<ConnectionId, Session>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            max_sessions,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Reserve a slot for a freshly accepted connection.
    ///
    /// The placeholder counts against capacity but is invisible to name
    /// resolution and broadcasts until `register` promotes it.
    pub async fn admit(
        &self,
        id: ConnectionId,
        peer: Option<SocketAddr>,
        outbox: Outbox,
    ) -> Result<(), ChatError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&id) {
            return Ok(());
        }
        if sessions.len() >= self.max_sessions {
            return Err(ChatError::CapacityExceeded {
                max: self.max_sessions,
            });
        }
        sessions.insert(id, Session::pending(id, peer, outbox));
        Ok(())
    }

    /// Register `id` under a display name that is unique among active
    /// sessions, returning the name actually assigned.
    ///
    /// A connection previously admitted is promoted in place. Otherwise a new
    /// entry is inserted, subject to the capacity limit.
    pub async fn register(
        &self,
        id: ConnectionId,
        proposed_name: &str,
        outbox: Outbox,
    ) -> Result<String, ChatError> {
        let mut sessions = self.sessions.lock().await;

        let admitted = sessions.contains_key(&id);
        if !admitted && sessions.len() >= self.max_sessions {
            return Err(ChatError::CapacityExceeded {
                max: self.max_sessions,
            });
        }

        // O(active sessions) per attempt; accepted for a bounded registry.
        let final_name = resolve_unique_name(proposed_name, |candidate| {
            sessions
                .values()
                .any(|s| s.is_active() && s.display_name == candidate)
        });

        let session = sessions
            .entry(id)
            .or_insert_with(|| Session::pending(id, None, outbox.clone()));
        session.display_name = final_name.clone();
        session.status = SessionStatus::Active;
        session.outbox = outbox;

        debug!(conn = %id, name = %final_name, "session registered");
        Ok(final_name)
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Session> {
        let removed = self.sessions.lock().await.remove(&id);
        removed.map(|mut session| {
            session.status = SessionStatus::Closing;
            debug!(conn = %id, name = %session.display_name, "session unregistered");
            session
        })
    }

    /// Point-in-time view of every active session, ordered by connection id.
    pub async fn snapshot_for_broadcast(&self) -> Vec<Recipient> {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .filter(|s| s.is_active())
            .map(|s| Recipient {
                id: s.id,
                name: s.display_name.clone(),
                outbox: s.outbox.clone(),
            })
            .collect()
    }

    /// Number of pending and active sessions
    pub async fn size(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn active_names(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.display_name.clone())
            .collect()
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Session> {
        self.sessions.lock().await.get(&id).cloned()
    }

    /// Drop every session at once (process shutdown). No departure
    /// announcements are sent.
    pub async fn clear(&self) -> Vec<Session> {
        let drained = std::mem::take(&mut *self.sessions.lock().await);
        drained
            .into_values()
            .map(|mut session| {
                session.status = SessionStatus::Closing;
                session
            })
            .collect()
    }
}

/// Append `_1`, `_2`, ... to `base` until `taken` rejects the candidate.
fn resolve_unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = base.to_string();
    let mut counter = 1u64;
    while taken(&candidate) {
        candidate = format!("{}_{}", base, counter);
        counter += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn outbox() -> Outbox {
        mpsc::channel(8).0
    }

    #[test]
    fn test_resolve_unique_name_free() {
        assert_eq!(resolve_unique_name("Alice", |_| false), "Alice");
    }

    #[test]
    fn test_resolve_unique_name_fills_lowest_gap() {
        let taken = ["Alice", "Alice_2"];
        let name = resolve_unique_name("Alice", |c| taken.contains(&c));
        assert_eq!(name, "Alice_1");
    }

    #[tokio::test]
    async fn test_duplicate_names_get_suffixes() {
        let registry = SessionRegistry::new(10);
        let a = registry
            .register(ConnectionId(1), "Alice", outbox())
            .await
            .unwrap();
        let b = registry
            .register(ConnectionId(2), "Alice", outbox())
            .await
            .unwrap();
        let c = registry
            .register(ConnectionId(3), "Alice", outbox())
            .await
            .unwrap();
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("Alice", "Alice_1", "Alice_2"));
    }

    #[tokio::test]
    async fn test_freed_name_is_reused() {
        let registry = SessionRegistry::new(10);
        registry
            .register(ConnectionId(1), "Bob", outbox())
            .await
            .unwrap();
        registry.unregister(ConnectionId(1)).await;
        let name = registry
            .register(ConnectionId(2), "Bob", outbox())
            .await
            .unwrap();
        assert_eq!(name, "Bob");
    }

    #[tokio::test]
    async fn test_double_unregister_is_noop() {
        let registry = SessionRegistry::new(10);
        registry
            .register(ConnectionId(1), "Bob", outbox())
            .await
            .unwrap();
        registry
            .register(ConnectionId(2), "Carol", outbox())
            .await
            .unwrap();

        let first = registry.unregister(ConnectionId(1)).await;
        assert_eq!(first.map(|s| s.status), Some(SessionStatus::Closing));
        assert!(registry.unregister(ConnectionId(1)).await.is_none());
        assert_eq!(registry.size().await, 1);
        assert_eq!(registry.active_names().await, vec!["Carol".to_string()]);
    }

    #[tokio::test]
    async fn test_admit_respects_capacity() {
        let registry = SessionRegistry::new(2);
        registry.admit(ConnectionId(1), None, outbox()).await.unwrap();
        registry.admit(ConnectionId(2), None, outbox()).await.unwrap();

        let err = registry
            .admit(ConnectionId(3), None, outbox())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::CapacityExceeded { max: 2 }));
        assert_eq!(registry.size().await, 2);
        assert!(registry.get(ConnectionId(3)).await.is_none());
    }

    #[tokio::test]
    async fn test_register_without_admission_respects_capacity() {
        let registry = SessionRegistry::new(1);
        registry
            .register(ConnectionId(1), "Bob", outbox())
            .await
            .unwrap();
        let err = registry
            .register(ConnectionId(2), "Carol", outbox())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::CapacityExceeded { max: 1 }));
        assert!(
            registry
                .snapshot_for_broadcast()
                .await
                .iter()
                .all(|r| r.id != ConnectionId(2))
        );
    }

    #[tokio::test]
    async fn test_admitted_session_promotes_at_full_capacity() {
        let registry = SessionRegistry::new(1);
        registry.admit(ConnectionId(1), None, outbox()).await.unwrap();
        let name = registry
            .register(ConnectionId(1), "Bob", outbox())
            .await
            .unwrap();
        assert_eq!(name, "Bob");
        assert_eq!(registry.size().await, 1);
        let session = registry.get(ConnectionId(1)).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_pending_sessions_hidden_from_snapshot() {
        let registry = SessionRegistry::new(10);
        registry.admit(ConnectionId(1), None, outbox()).await.unwrap();
        registry
            .register(ConnectionId(2), "Carol", outbox())
            .await
            .unwrap();

        let snapshot = registry.snapshot_for_broadcast().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, ConnectionId(2));
        assert_eq!(snapshot[0].name, "Carol");
    }

    #[tokio::test]
    async fn test_placeholder_name_does_not_collide() {
        let registry = SessionRegistry::new(10);
        registry.admit(ConnectionId(1), None, outbox()).await.unwrap();
        let name = registry
            .register(ConnectionId(2), crate::session::PLACEHOLDER_NAME, outbox())
            .await
            .unwrap();
        assert_eq!(name, crate::session::PLACEHOLDER_NAME);
    }

    #[tokio::test]
    async fn test_snapshot_ordered_by_connection() {
        let registry = SessionRegistry::new(10);
        for (id, name) in [(5, "e"), (2, "b"), (9, "i")] {
            registry
                .register(ConnectionId(id), name, outbox())
                .await
                .unwrap();
        }
        let ids: Vec<u64> = registry
            .snapshot_for_broadcast()
            .await
            .iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[tokio::test]
    async fn test_clear_drains_everything() {
        let registry = SessionRegistry::new(10);
        registry.admit(ConnectionId(1), None, outbox()).await.unwrap();
        registry
            .register(ConnectionId(2), "Bob", outbox())
            .await
            .unwrap();
        let drained = registry.clear().await;
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|s| s.status == SessionStatus::Closing));
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_stay_unique() {
        let registry = Arc::new(SessionRegistry::new(100));
        let mut handles = Vec::new();
        for i in 0..50u64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .register(ConnectionId(i), "Sam", mpsc::channel(1).0)
                    .await
                    .unwrap()
            }));
        }
        let mut names = Vec::new();
        for h in handles {
            names.push(h.await.unwrap());
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 50);
        assert!(names.contains(&"Sam".to_string()));
        assert!(names.contains(&"Sam_49".to_string()));
    }
}
