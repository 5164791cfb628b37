//! Connected nodes, keyed by node key.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Instant, SystemTime};

use crate::service::secure::{LatestSender, PacketSender};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for a control connection
pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// What the master learned about a node from its Hello
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub arch: String,
    pub version: String,
    /// Hash the node reported for its own binary
    pub hash: String,
    pub peer: SocketAddr,
    pub connected_at: SystemTime,
    pub last_seen: Instant,
}

/// A connected node
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub key: String,
    /// Connection that owns this entry
    pub conn_id: u64,
    pub sender: PacketSender,
    /// Route table lane feeding `sender`
    pub routes: LatestSender,
    pub meta: NodeMeta,
}

/// Thread-safe map of connected nodes
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Mutex<HashMap<String, NodeEntry>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `entry.key`, returning the old one
    pub fn add(&self, entry: NodeEntry) -> Option<NodeEntry> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.key.clone(), entry)
    }

    pub fn remove(&self, key: &str) -> Option<NodeEntry> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Remove the entry only if connection `conn_id` still owns it
    pub fn remove_connection(&self, key: &str, conn_id: u64) -> bool {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(key) {
            Some(entry) if entry.conn_id == conn_id => {
                nodes.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn find(&self, key: &str) -> Option<NodeEntry> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Refresh `last_seen` if connection `conn_id` owns the entry
    pub fn touch(&self, key: &str, conn_id: u64) {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = nodes.get_mut(key) {
            if entry.conn_id == conn_id {
                entry.meta.last_seen = Instant::now();
            }
        }
    }

    pub fn snapshot(&self) -> Vec<NodeEntry> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry(key: &str, conn_id: u64) -> NodeEntry {
        let (sender, _rx) = PacketSender::channel(1);
        let (routes, _) = LatestSender::channel();
        NodeEntry {
            key: key.into(),
            conn_id,
            sender,
            routes,
            meta: NodeMeta {
                arch: "x86_64".into(),
                version: "0.4.0".into(),
                hash: String::new(),
                peer: "127.0.0.1:50000".parse().unwrap(),
                connected_at: SystemTime::now(),
                last_seen: Instant::now(),
            },
        }
    }

    #[test]
    fn stale_connection_does_not_evict_replacement() {
        let registry = NodeRegistry::new();
        registry.add(entry("node-a", 1));
        let replaced = registry.add(entry("node-a", 2)).unwrap();
        assert_eq!(replaced.conn_id, 1);

        assert!(!registry.remove_connection("node-a", 1));
        assert_eq!(registry.find("node-a").unwrap().conn_id, 2);
        assert!(registry.remove_connection("node-a", 2));
        assert!(registry.find("node-a").is_none());
    }

    #[test]
    fn touch_only_for_owner() {
        let registry = NodeRegistry::new();
        registry.add(entry("node-a", 7));
        let before = registry.find("node-a").unwrap().meta.last_seen;
        std::thread::sleep(std::time::Duration::from_millis(5));

        registry.touch("node-a", 8);
        assert_eq!(registry.find("node-a").unwrap().meta.last_seen, before);
        registry.touch("node-a", 7);
        assert!(registry.find("node-a").unwrap().meta.last_seen > before);
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert_ne!(a, b);
    }
}
