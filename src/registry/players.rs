//! Player sessions, keyed by `(uuid, backend)`.
//!
//! The master keeps one registry for the whole fleet. Each node keeps one
//! for its own clients, where entries also carry a [`LiveConnection`] so a
//! DisconnectPlayer instruction can tear the relay down.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// A player connected through a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSession {
    pub name: String,
    /// Lowercase hex of the 16 UUID bytes from login start
    pub uuid: String,
    /// Unix seconds
    pub joined_at: i64,
    /// Backend `host:port`
    pub backend: String,
    /// Host the client asked for in its handshake
    pub virtual_host: String,
    pub protocol_version: u32,
    pub node_id: String,
}

impl PlayerSession {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            uuid: self.uuid.clone(),
            backend: self.backend.clone(),
        }
    }

    /// Whole seconds since `joined_at`, zero if the clock went backwards
    pub fn session_secs(&self) -> u64 {
        u64::try_from(unix_now() - self.joined_at).unwrap_or(0)
    }
}

/// Identity of a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub uuid: String,
    pub backend: String,
}

/// Kill switch for a relayed client connection
#[derive(Debug, Clone, Default)]
pub struct LiveConnection {
    kill: Arc<Notify>,
}

impl LiveConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the relay to close. A close issued before the relay starts
    /// waiting is not lost.
    pub fn close(&self) {
        self.kill.notify_one();
    }

    /// Resolves once [`LiveConnection::close`] has been called
    pub async fn closed(&self) {
        self.kill.notified().await;
    }

    /// True when both handles belong to the same relay
    pub fn same_connection(&self, other: &LiveConnection) -> bool {
        Arc::ptr_eq(&self.kill, &other.kill)
    }
}

/// A session plus the node-local handle to its connection
#[derive(Debug, Clone)]
pub struct PlayerEntry {
    pub session: PlayerSession,
    pub live: Option<LiveConnection>,
}

#[derive(Debug, Default)]
pub struct PlayerRegistry {
    sessions: Mutex<HashMap<SessionKey, PlayerEntry>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session with the same identity
    pub fn add(&self, session: PlayerSession, live: Option<LiveConnection>) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.key(), PlayerEntry { session, live });
    }

    pub fn remove(&self, key: &SessionKey) -> Option<PlayerEntry> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Remove the session under `key` only while `live` still owns it. A
    /// re-login with the same identity replaces the entry, and the old
    /// relay's teardown must then leave the new one alone.
    pub fn remove_if_owner(&self, key: &SessionKey, live: &LiveConnection) -> Option<PlayerEntry> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = sessions
            .get(key)
            .and_then(|entry| entry.live.as_ref())
            .is_some_and(|current| current.same_connection(live));
        if owned {
            sessions.remove(key)
        } else {
            None
        }
    }

    /// Look a session up by uuid and backend `host:port`
    pub fn find(&self, uuid: &str, backend: &str) -> Option<PlayerEntry> {
        let key = SessionKey {
            uuid: uuid.to_string(),
            backend: backend.to_string(),
        };
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    /// Drop every session owned by `node_id`, returning them
    pub fn remove_by_node(&self, node_id: &str) -> Vec<PlayerSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<SessionKey> = sessions
            .iter()
            .filter(|(_, entry)| entry.session.node_id == node_id)
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter()
            .filter_map(|key| sessions.remove(key))
            .map(|entry| entry.session)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<PlayerSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.session.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Current time in unix seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `Xh Ym Zs`
pub fn format_duration(secs: u64) -> String {
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(uuid: &str, backend: &str, node: &str) -> PlayerSession {
        PlayerSession {
            name: "Steve".into(),
            uuid: uuid.into(),
            joined_at: unix_now(),
            backend: backend.into(),
            virtual_host: "play.example.net".into(),
            protocol_version: 763,
            node_id: node.into(),
        }
    }

    #[test]
    fn upsert_by_identity() {
        let registry = PlayerRegistry::new();
        registry.add(session("aa", "10.0.0.5:25565", "node-a"), None);
        let mut moved = session("aa", "10.0.0.5:25565", "node-b");
        moved.name = "Alex".into();
        registry.add(moved, None);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.find("aa", "10.0.0.5:25565").unwrap().session.name,
            "Alex"
        );

        registry.add(session("aa", "10.0.0.6:25565", "node-a"), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_by_node_only_touches_that_node() {
        let registry = PlayerRegistry::new();
        registry.add(session("aa", "h:1", "node-a"), None);
        registry.add(session("bb", "h:1", "node-a"), None);
        registry.add(session("cc", "h:1", "node-b"), None);

        let removed = registry.remove_by_node("node-a");
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.snapshot(), vec![session("cc", "h:1", "node-b")]);
    }

    #[test]
    fn stale_relay_does_not_remove_relogin() {
        let registry = PlayerRegistry::new();
        let first = LiveConnection::new();
        let second = LiveConnection::new();
        registry.add(session("aa", "h:1", "node-a"), Some(first.clone()));
        registry.add(session("aa", "h:1", "node-a"), Some(second.clone()));

        let key = session("aa", "h:1", "node-a").key();
        assert!(registry.remove_if_owner(&key, &first).is_none());
        assert!(registry.find("aa", "h:1").unwrap().live.unwrap().same_connection(&second));

        assert!(registry.remove_if_owner(&key, &second).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn duration_format() {
        assert_eq!(format_duration(0), "0h 0m 0s");
        assert_eq!(format_duration(3723), "1h 2m 3s");
        assert_eq!(format_duration(59), "0h 0m 59s");
    }

    #[tokio::test]
    async fn close_before_wait_is_not_lost() {
        let live = LiveConnection::new();
        live.clone().close();
        tokio::time::timeout(Duration::from_secs(1), live.closed())
            .await
            .unwrap();
    }
}
