// Wisp device wire protocol codec.
//
// ASCII, newline-terminated, request/response:
//   HELLO | PING | GET INFO | GET CFG | SET <key> <value|__EMPTY__> |
//   SAVE | REBOOT | LOG_DUMP
// Responses: @OK <verb...> | @INFO <json> | @CFG <json> | @ERR <reason>
// Any other line is device log noise and never surfaces as a command result.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EMPTY_SENTINEL;
use crate::io::error::ProtoError;

/// A single framed request: one line of text plus the response deadline.
#[derive(Clone, Debug)]
pub struct Command {
    pub text: String,
    pub response_timeout: Duration,
}

impl Command {
    pub fn new(text: impl Into<String>, response_timeout: Duration) -> Self {
        Self {
            text: text.into(),
            response_timeout,
        }
    }

    /// Reboot commands are exempt from the boot-reset resend heuristic: a
    /// reset right after `REBOOT` is the expected outcome, not a lost command.
    pub fn is_reboot(&self) -> bool {
        self.text.trim() == "REBOOT"
    }
}

/// A protocol-prefixed response line, with the prefix stripped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseLine {
    /// `@OK <verb...>`
    Ok(String),
    /// `@INFO <json>`
    Info(String),
    /// `@CFG <json>`
    Cfg(String),
    /// `@ERR <reason>`
    Err(String),
}

impl ResponseLine {
    /// Reconstruct the raw wire form (for `last_response` bookkeeping).
    pub fn raw(&self) -> String {
        match self {
            ResponseLine::Ok(rest) => format!("@OK {}", rest),
            ResponseLine::Info(rest) => format!("@INFO {}", rest),
            ResponseLine::Cfg(rest) => format!("@CFG {}", rest),
            ResponseLine::Err(rest) => format!("@ERR {}", rest),
        }
    }
}

/// Classify one received line. `None` means device noise (boot banners,
/// firmware debug prints): discarded from protocol consideration, kept in the
/// diagnostic trace by the transport.
pub fn classify_line(line: &str) -> Option<ResponseLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(rest) = strip_tag(line, "@OK") {
        return Some(ResponseLine::Ok(rest.to_string()));
    }
    if let Some(rest) = strip_tag(line, "@INFO") {
        return Some(ResponseLine::Info(rest.to_string()));
    }
    if let Some(rest) = strip_tag(line, "@CFG") {
        return Some(ResponseLine::Cfg(rest.to_string()));
    }
    if let Some(rest) = strip_tag(line, "@ERR") {
        return Some(ResponseLine::Err(rest.to_string()));
    }
    None
}

/// Match a tag only when followed by whitespace or end of line, so that
/// e.g. `@OKAY` from firmware debug output is not mistaken for `@OK`.
fn strip_tag<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(tag)?;
    if rest.is_empty() {
        return Some("");
    }
    if rest.starts_with(' ') || rest.starts_with('\t') {
        return Some(rest.trim_start());
    }
    None
}

/// Build a `SET` command line, substituting the empty-value sentinel.
pub fn build_set(key: &str, value: &str) -> String {
    if value.is_empty() {
        format!("SET {} {}", key, EMPTY_SENTINEL)
    } else {
        format!("SET {} {}", key, value)
    }
}

/// Detect the transient `unknown_cmd` noise produced while the firmware's
/// command table is still initialising: the reported "command" is solely
/// repeated `U` filler bytes (UART idle pattern). This matches a specific
/// firmware bug signature, not a general protocol rule.
pub fn is_uart_filler_noise(reason: &str) -> bool {
    let payload = match reason.strip_prefix("unknown_cmd") {
        Some(rest) => rest.trim_start_matches(':').trim(),
        None => return false,
    };
    payload.len() >= 3 && payload.chars().all(|c| c == 'U')
}

/// Structured device identity from `@INFO <json>`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub firmware_version: String,
    #[serde(default)]
    pub hardware_rev: String,
    #[serde(default)]
    pub chip_id: String,
    #[serde(default)]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub free_heap: Option<u64>,
}

pub fn parse_device_info(json: &str) -> Result<DeviceInfo, ProtoError> {
    serde_json::from_str(json).map_err(|e| ProtoError::parse("@INFO", e.to_string()))
}
