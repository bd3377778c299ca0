//! Client-facing transport.

pub mod websocket;

pub use websocket::{TransportState, bind_reuseport, router, serve};
