// Device IO: error taxonomy, serial transport, and the line protocol client.

pub mod error;
pub mod proto;
pub mod serial;

pub use error::ProtoError;
pub use proto::{Command, DeviceInfo, ProtocolClient, ResponseLine};
pub use serial::{PortSettings, TransportSession};

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
