// wisp-setup: provisioning engine for the Wisp desk companion.
//
// Layers, leaves first: retry executor -> serial transport -> protocol
// client -> config sync workflow -> step wizard. The GUI lives elsewhere;
// everything here is headless and exercised by the provision_cli tool.

#[macro_use]
pub mod logging;

pub mod api_check;
pub mod cancel;
pub mod config;
pub mod flasher;
pub mod io;
pub mod ports;
pub mod retry;
pub mod settings;
pub mod support;
pub mod sync;
pub mod wizard;

pub use cancel::CancelToken;
pub use config::DeviceConfig;
pub use io::{PortSettings, ProtoError, ProtocolClient, TransportSession};
pub use retry::RetryPolicy;
pub use settings::AppSettings;
pub use sync::{ConfigSync, SyncOptions, SyncReport};
pub use wizard::{SessionState, StepResult, StepStatus, Wizard};
