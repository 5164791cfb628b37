//! # Service Layer
//!
//! The long-running pieces of the fleet, built on the protocol and registry
//! layers.
//!
//! ## Components
//! - **Secure**: split secure channel with a queued writer task
//! - **Master**: control plane server, route broadcast, admin operations
//! - **Node**: control plane client with heartbeat and reconnect
//! - **Proxy**: game-protocol edge proxy
//! - **Bootstrap**: HTTP endpoint and client for the master public key
//! - **Resolver**: SRV discovery of the master
//! - **Distributor**: chunked binary transfers
//! - **Upgrade**: in-place replacement and restart of the node binary

pub mod bootstrap;
pub mod distributor;
pub mod master;
pub mod node;
pub mod proxy;
pub mod resolver;
pub mod secure;
pub mod upgrade;

pub use master::Master;
pub use node::{MasterLink, NodeClient};
pub use proxy::EdgeProxy;
pub use secure::{LatestSender, PacketSender, SecureChannel};
