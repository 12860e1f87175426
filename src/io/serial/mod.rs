// Serial transport layer.
//
// `wire` is the physical-port seam, `trace` the rolling diagnostic buffer,
// `transport` the session that owns the one active handle and speaks in
// whole lines.

pub mod trace;
pub mod transport;
pub mod wire;

pub use transport::{PortSettings, TransportSession};
