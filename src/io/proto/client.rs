// Typed device protocol client.
//
// One operation per wire command, each returning a tagged result. Expected
// failures (timeouts, @ERR, wrong verbs, bad payloads) travel as values;
// nothing at this layer throws for a misbehaving device.

use std::sync::Mutex;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::io::error::ProtoError;
use crate::io::proto::codec::{
    build_set, is_uart_filler_noise, parse_device_info, Command, DeviceInfo, ResponseLine,
};
use crate::io::serial::transport::{PortSettings, TransportSession};

/// Default per-command response deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause before the single retry of `GET INFO` after UART filler noise.
const INFO_FILLER_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Read-silence gap that ends a `LOG_DUMP`.
const LOG_DUMP_SILENCE: Duration = Duration::from_secs(1);

/// Hard cap on a `LOG_DUMP` read.
const LOG_DUMP_CAP: Duration = Duration::from_secs(20);

/// Outcome of a `REBOOT`: the device may drop the connection before acking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebootAck {
    /// `@OK REBOOT` arrived before the reset.
    Acknowledged,
    /// The read timed out or the port dropped — normal when the device
    /// resets immediately. Saved, rebooting.
    Assumed,
}

pub struct ProtocolClient {
    transport: TransportSession,
    settings: PortSettings,
    command_timeout: Duration,
    last_info_json: Mutex<Option<String>>,
}

impl ProtocolClient {
    pub fn new(transport: TransportSession, settings: PortSettings) -> Self {
        Self::with_timeout(transport, settings, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_timeout(
        transport: TransportSession,
        settings: PortSettings,
        command_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            settings,
            command_timeout,
            last_info_json: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &TransportSession {
        &self.transport
    }

    pub fn port_settings(&self) -> &PortSettings {
        &self.settings
    }

    /// Raw `@INFO` payload from the most recent successful `get_info`.
    pub fn last_info_json(&self) -> Option<String> {
        self.last_info_json.lock().ok().and_then(|g| g.clone())
    }

    async fn exchange(&self, text: &str, timeout: Duration, cancel: &CancelToken) -> Result<ResponseLine, ProtoError> {
        self.transport
            .exchange(&self.settings, Command::new(text, timeout), cancel)
            .await
    }

    fn expect_ok(resp: ResponseLine, verb: &'static str, expected: &'static str) -> Result<(), ProtoError> {
        match resp {
            ResponseLine::Ok(got) if got == verb => Ok(()),
            other => Err(ProtoError::unexpected(expected, other.raw())),
        }
    }

    pub async fn hello(&self, cancel: &CancelToken) -> Result<(), ProtoError> {
        let resp = self.exchange("HELLO", self.command_timeout, cancel).await?;
        Self::expect_ok(resp, "HELLO", "@OK HELLO")
    }

    pub async fn ping(&self, cancel: &CancelToken) -> Result<(), ProtoError> {
        let resp = self.exchange("PING", self.command_timeout, cancel).await?;
        Self::expect_ok(resp, "PONG", "@OK PONG")
    }

    /// Fetch structured device identity.
    ///
    /// Retries once after a short pause when the device reports the command
    /// as unknown with an all-`U` filler payload — a benign race while the
    /// firmware's command table initialises (seen on 1.3.x firmware), not a
    /// real protocol error.
    pub async fn get_info(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<DeviceInfo, ProtoError> {
        let mut retried = false;
        loop {
            match self.exchange("GET INFO", timeout, cancel).await {
                Ok(ResponseLine::Info(json)) => {
                    let info = parse_device_info(&json)?;
                    if let Ok(mut guard) = self.last_info_json.lock() {
                        *guard = Some(json);
                    }
                    return Ok(info);
                }
                Ok(other) => return Err(ProtoError::unexpected("@INFO", other.raw())),
                Err(ProtoError::Protocol { ref reason, .. })
                    if !retried && is_uart_filler_noise(reason) =>
                {
                    tlog!("[proto] GET INFO hit command-table init race, retrying once");
                    retried = true;
                    tokio::select! {
                        _ = tokio::time::sleep(INFO_FILLER_RETRY_DELAY) => {}
                        _ = cancel.cancelled() => return Err(ProtoError::Cancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_config_json(
        &self,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, ProtoError> {
        let resp = self.exchange("GET CFG", self.command_timeout, cancel).await?;
        match resp {
            ResponseLine::Cfg(json) => {
                serde_json::from_str(&json).map_err(|e| ProtoError::parse("@CFG", e.to_string()))
            }
            other => Err(ProtoError::unexpected("@CFG", other.raw())),
        }
    }

    /// Write one key. Empty values go out as the sentinel token.
    pub async fn set_key(
        &self,
        key: &str,
        value: &str,
        cancel: &CancelToken,
    ) -> Result<(), ProtoError> {
        let line = build_set(key, value);
        let resp = self.exchange(&line, self.command_timeout, cancel).await?;
        match resp {
            ResponseLine::Ok(got) if got == "SET" => Ok(()),
            other => Err(ProtoError::unexpected("@OK SET", format!("{} (key {})", other.raw(), key))),
        }
    }

    pub async fn save(&self, cancel: &CancelToken) -> Result<(), ProtoError> {
        let resp = self.exchange("SAVE", self.command_timeout, cancel).await?;
        Self::expect_ok(resp, "SAVE", "@OK SAVE")
    }

    /// Reboot the device. A timeout or connection drop after sending is
    /// tentative success: the device usually resets before it can ack.
    pub async fn reboot(&self, cancel: &CancelToken) -> Result<RebootAck, ProtoError> {
        match self.exchange("REBOOT", self.command_timeout, cancel).await {
            Ok(ResponseLine::Ok(got)) if got == "REBOOT" => Ok(RebootAck::Acknowledged),
            Ok(other) => Err(ProtoError::unexpected("@OK REBOOT", other.raw())),
            Err(ProtoError::Timeout { .. }) | Err(ProtoError::Io { .. }) => {
                tlog!("[proto] no REBOOT ack, assuming device reset");
                Ok(RebootAck::Assumed)
            }
            Err(e) => Err(e),
        }
    }

    /// Pull the device's in-memory log buffer.
    pub async fn log_dump(&self, cancel: &CancelToken) -> Result<String, ProtoError> {
        self.log_dump_with(LOG_DUMP_SILENCE, LOG_DUMP_CAP, cancel).await
    }

    pub async fn log_dump_with(
        &self,
        silence_gap: Duration,
        overall_cap: Duration,
        cancel: &CancelToken,
    ) -> Result<String, ProtoError> {
        self.transport
            .read_burst(&self.settings, "LOG_DUMP", silence_gap, overall_cap, cancel)
            .await
    }
}
