//! # Protocol Layer
//!
//! Packet catalogs and the control handshake.
//!
//! ## Components
//! - **Message**: control packet ids and typed payloads
//! - **Handshake**: RSA key exchange into the AES-CFB8 stream
//! - **Game**: handshake and login start of the game protocol
//! - **Status**: failure status responses and login disconnects
//!
//! ## Control handshake
//! 1. Node sends SharedSecret, RSA-encrypted with the master's public key
//! 2. Both sides switch to AES-128-CFB8 keyed with the secret
//! 3. Master replies Ready, node sends Hello

pub mod game;
pub mod handshake;
pub mod message;
pub mod status;
