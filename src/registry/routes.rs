//! Route list shared between the control plane and the edge proxy.
//!
//! On the master the table is the source of truth and every mutation wakes
//! the route broadcaster. On a node it is replaced wholesale whenever a
//! Routes packet arrives.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tokio::sync::Notify;
use tracing::debug;

/// A virtual host mapped to a backend server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub server_host: String,
    pub server_port: u16,
    /// Virtual host clients put in their handshake
    pub proxy_domain: String,
    pub proxy_port: u16,
}

impl Route {
    /// `host:port` of the backend, also used as the session's backend key
    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// Ordered route list with a mutation signal
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<Vec<Route>>,
    changed: Notify,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: RwLock::new(routes),
            changed: Notify::new(),
        }
    }

    pub fn get_routes(&self) -> Vec<Route> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// First route whose `proxy_domain` equals `vhost`
    pub fn get_route_by_vhost(&self, vhost: &str) -> Option<Route> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|route| route.proxy_domain == vhost)
            .cloned()
    }

    /// Replace the whole list
    pub fn set_routes(&self, routes: Vec<Route>) {
        let count = routes.len();
        *self.routes.write().unwrap_or_else(PoisonError::into_inner) = routes;
        debug!(routes = count, "Route table replaced");
        self.changed.notify_one();
    }

    pub fn add_route(&self, route: Route) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(route);
        self.changed.notify_one();
    }

    /// Remove every route with `id`. Returns whether anything was removed.
    pub fn remove_route(&self, id: &str) -> bool {
        let removed = {
            let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
            let before = routes.len();
            routes.retain(|route| route.id != id);
            routes.len() != before
        };
        if removed {
            self.changed.notify_one();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after the next mutation. Mutations made while nobody waits
    /// are coalesced into a single wake-up.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}
