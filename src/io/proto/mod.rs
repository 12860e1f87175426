// Wisp line protocol: codec (framing/classification) and typed client.

pub mod client;
pub mod codec;

pub use client::ProtocolClient;
pub use codec::{Command, DeviceInfo, ResponseLine};
