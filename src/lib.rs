//! # wired
//!
//! Control plane and edge proxy for a fleet of game-protocol relay nodes.
//!
//! A single master holds the route table and the expected node builds. Edge
//! nodes keep an encrypted control connection to it, receive every route
//! change, report the players they relay and replace their own binary when
//! the master pushes a new build. On the data plane each node accepts game
//! clients, picks a backend by the virtual host in the client's handshake
//! and splices the two sockets.
//!
//! ## Layers
//! - [`core`]: VarInt framing and the packet codec
//! - [`protocol`]: control packets, key exchange, game handshake parsing
//! - [`registry`]: routes, builds, connected nodes, player sessions
//! - [`service`]: master, node client, edge proxy, transfers, bootstrap
//! - [`transport`]: client/backend relay
//! - [`utils`]: crypto, logging, metrics, timeouts
//!
//! ## Control handshake
//! ```text
//! node                                   master
//!  |-- SharedSecret (RSA) --------------->|
//!  |   AES-128-CFB8 from here on          |
//!  |<------------- Ready -----------------|
//!  |-------------- Hello ---------------->|
//!  |<------------- Routes ----------------|
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::WiredConfig;
pub use error::{ProtocolError, Result};
pub use protocol::message::ControlPacket;
pub use registry::{FleetDirectory, PlayerRegistry, Route, RouteTable};
pub use service::{EdgeProxy, Master, MasterLink, NodeClient};
