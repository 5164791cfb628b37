//! # Transport Layer
//!
//! Byte-level plumbing for the data plane.
//!
//! ## Components
//! - **Relay**: bidirectional client/backend splice with a kill switch

pub mod relay;

pub use relay::{relay, RelayEnd};
