//! # Core Protocol Components
//!
//! Low-level framing shared by the control plane and the game protocol.
//!
//! ## Components
//! - **VarInt**: base-128 integers and length-prefixed strings
//! - **Packet**: `VarInt(length) | VarInt(id) | payload` frames
//! - **Codec**: Tokio codec with RSA key-exchange and AES-CFB8 stream modes
//!
//! ## Wire Format
//! ```text
//! [VarInt total] [VarInt packet id] [payload(total - len(id))]
//! ```
//!
//! ## Security
//! - Maximum frame size: 2 MiB (prevents memory exhaustion)
//! - Length validation before allocation
//! - VarInts longer than 5 bytes are rejected

pub mod codec;
pub mod packet;
pub mod varint;
