//! Protobuf messages exchanged during the Noise handshake.

mod wa;

pub use wa::*;
