//! Loopback WebSocket server that fronts the single browser host process.
//!
//! Clients speak JSON over WebSocket; the host speaks length-prefixed JSON
//! records over stdio. This crate owns both framings and the request
//! multiplexer that correlates one with the other.

pub mod codec;
pub mod mux;
pub mod server;

pub use codec::{encode_frame, FrameDecoder, LENGTH_PREFIX_BYTES, MAX_FRAME_BYTES};
pub use mux::Mux;
pub use server::{run, HostChannel};
