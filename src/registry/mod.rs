//! # Fleet bookkeeping
//!
//! Owned, thread-safe registries injected into the services that need them.
//! Each registry guards its state with one lock and never holds it across
//! an `.await`.
//!
//! - [`RouteTable`]: virtual host routes plus a mutation signal
//! - [`FleetDirectory`]: expected builds and registered node identities
//! - [`NodeRegistry`]: connected nodes (master)
//! - [`PlayerRegistry`]: player sessions (master and node)

pub mod directory;
pub mod nodes;
pub mod players;
pub mod routes;

pub use directory::{FleetDirectory, NodeBuild};
pub use nodes::{NodeEntry, NodeMeta, NodeRegistry};
pub use players::{LiveConnection, PlayerEntry, PlayerRegistry, PlayerSession, SessionKey};
pub use routes::{Route, RouteTable};
