//! Bidirectional Forwarding Engine
//!
//! Pumps bytes between two established duplex streams until both
//! directions have finished. Used by every tunnel session on both the
//! client and server side.

mod relay;

pub use relay::relay;
