//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, metrics and timing.
//!
//! ## Components
//! - **Crypto**: RSA key exchange, AES-128-CFB8 stream cipher, PEM keys
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Async timeout wrappers
//!
//! ## Security
//! - Cryptographically secure RNG (`OsRng`)
//! - Memory zeroing for key material read from disk (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;
