//! # Error Types
//!
//! Error handling for the control plane, the secure channel and the edge proxy.
//!
//! ## Error Categories
//! - **Framing**: malformed VarInts, truncated or oversized frames
//! - **Cryptographic**: key exchange and stream cipher failures
//! - **Decoding**: payloads that do not match the expected packet structure
//! - **Routing**: unknown virtual hosts, unreachable backends
//! - **I/O**: resets, EOF, socket errors
//!
//! ## Propagation
//! A decode error on a single packet is logged by the dispatch loop and the
//! loop carries on. I/O errors end the task owning that connection only.
//!
//! ```rust
//! use wired::error::{ProtocolError, Result};
//!
//! fn parse_port(raw: &str) -> Result<u16> {
//!     raw.parse()
//!         .map_err(|e| ProtocolError::ConfigError(format!("invalid port {raw}: {e}")))
//! }
//!
//! assert!(parse_port("25565").is_ok());
//! assert!(parse_port("nope").is_err());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_VARINT_TOO_LONG: &str = "VarInt is too big";
    pub const ERR_FRAME_TOO_SHORT: &str = "Frame length shorter than its packet id";
    pub const ERR_INVALID_UTF8: &str = "String is not valid UTF-8";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_TIMEOUT: &str = "Operation timed out";

    /// Cryptographic errors
    pub const ERR_INVALID_SECRET: &str = "Shared secret must be 16 bytes";
    pub const ERR_NO_PRIVATE_KEY: &str = "Key-exchange frame received without a private key";
    pub const ERR_NO_PUBLIC_KEY: &str = "Key-exchange write attempted without a public key";

    /// Handshake errors
    pub const ERR_EXPECTED_SHARED_SECRET: &str = "First packet must be SharedSecret";
    pub const ERR_HANDSHAKE_CLOSED: &str = "Peer closed the connection during the handshake";
    pub const ERR_UNKNOWN_NODE: &str = "Node key is not registered";
    pub const ERR_BAD_PASSPHRASE: &str = "Node passphrase mismatch";

    /// Transfer errors
    pub const ERR_CHUNK_SIZE: &str = "Label leaves no room for chunk data";
    pub const ERR_UNSAFE_LABEL: &str = "Transfer label is not a plain file name";
}

/// ProtocolError is the primary error type for all wired operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame error: {0}")]
    Frame(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("No route for virtual host {0}")]
    RouteNotFound(String),

    #[error("Backend {0} unavailable")]
    BackendUnavailable(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Resolve error: {0}")]
    Resolve(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Upgrade failed: {0}")]
    Upgrade(String),

    #[error("Master unreachable after {0} attempts")]
    MasterUnreachable(u32),
}

impl ProtocolError {
    /// True when the error means the peer is gone rather than that it sent
    /// something malformed.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
