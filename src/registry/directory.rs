//! Fleet directory: what the master knows about nodes before they connect.
//!
//! Holds the route table, the expected node build per architecture and the
//! table of registered node identities.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use crate::config::MasterConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::registry::routes::RouteTable;
use crate::utils::crypto::sha256_hex;

/// The node binary the master expects for one architecture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBuild {
    pub arch: String,
    /// Lowercase hex SHA-256 of the binary
    pub hash: String,
    pub binary_path: PathBuf,
}

impl NodeBuild {
    /// Hash the binary at `path`
    pub fn from_file(arch: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Failed to read build {}: {e}", path.display()))
        })?;
        Ok(Self {
            arch: arch.into(),
            hash: sha256_hex(&bytes),
            binary_path: path.to_path_buf(),
        })
    }
}

/// Routes, builds and node identities
#[derive(Debug, Default)]
pub struct FleetDirectory {
    routes: Arc<RouteTable>,
    builds: RwLock<HashMap<String, NodeBuild>>,
    nodes: RwLock<HashMap<String, String>>,
    require_registration: bool,
}

impl FleetDirectory {
    pub fn new(routes: Arc<RouteTable>, require_registration: bool) -> Self {
        Self {
            routes,
            builds: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            require_registration,
        }
    }

    /// Build a directory from the master section. Builds that cannot be read
    /// are logged and skipped.
    pub fn from_config(config: &MasterConfig) -> Self {
        let directory = Self::new(
            Arc::new(RouteTable::new(config.routes.clone())),
            config.require_registration,
        );
        for node in &config.nodes {
            directory.register_node(&node.key, &node.passphrase);
        }
        for build in &config.builds {
            match NodeBuild::from_file(&build.arch, &build.binary_path) {
                Ok(build) => directory.set_build(build),
                Err(e) => warn!(arch = %build.arch, error = %e, "Skipping node build"),
            }
        }
        directory
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn expected_hash(&self, arch: &str) -> Option<String> {
        self.builds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(arch)
            .map(|build| build.hash.clone())
    }

    pub fn build(&self, arch: &str) -> Option<NodeBuild> {
        self.builds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(arch)
            .cloned()
    }

    /// Record the expected build for its architecture
    pub fn set_build(&self, build: NodeBuild) {
        info!(arch = %build.arch, hash = %build.hash, "Node build set");
        self.builds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(build.arch.clone(), build);
    }

    pub fn register_node(&self, key: &str, passphrase: &str) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), passphrase.to_string());
    }

    pub fn unregister_node(&self, key: &str) -> bool {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Check a Hello's identity.
    ///
    /// A registered key must present its passphrase. Unknown keys pass
    /// unless registration is required.
    pub fn verify_node(&self, key: &str, passphrase: Option<&str>) -> Result<()> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(key) {
            Some(expected) if passphrase == Some(expected.as_str()) => Ok(()),
            Some(_) => Err(ProtocolError::HandshakeError(
                constants::ERR_BAD_PASSPHRASE.into(),
            )),
            None if self.require_registration => Err(ProtocolError::HandshakeError(
                constants::ERR_UNKNOWN_NODE.into(),
            )),
            None => Ok(()),
        }
    }
}
