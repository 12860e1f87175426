// Device configuration model.
//
// `DeviceConfig` is the host-side value struct for everything the device
// persists. It is built fresh per send from session state and discarded after
// transmission; only masked copies may reach trace/log sinks or the support
// bundle.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Out-of-band token standing in for an intentionally empty `SET` value.
/// The wire protocol cannot represent a bare empty argument unambiguously.
pub const EMPTY_SENTINEL: &str = "__EMPTY__";

/// Keys whose values are masked before reaching any trace or log sink.
pub static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "wifi_pass",
        "openai_key",
        "duco_miner_key",
        "azure_speech_key",
        // Historical aliases carry the same secrets.
        "miner_key",
    ])
});

/// Boolean flags re-checked against the device after apply+reboot.
pub const CRITICAL_FLAGS: [&str; 3] = ["wifi_enabled", "mining_enabled", "speech_enabled"];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub wifi_enabled: bool,
    #[serde(default)]
    pub wifi_ssid: String,
    #[serde(default)]
    pub wifi_pass: String,

    #[serde(default)]
    pub ai_enabled: bool,
    #[serde(default)]
    pub openai_key: String,
    #[serde(default)]
    pub prompt_text: String,

    #[serde(default)]
    pub mining_enabled: bool,
    #[serde(default)]
    pub duco_user: String,
    #[serde(default)]
    pub duco_miner_key: String,

    #[serde(default)]
    pub speech_enabled: bool,
    #[serde(default)]
    pub azure_speech_key: String,
    #[serde(default)]
    pub azure_region: String,
    #[serde(default)]
    pub azure_subdomain: String,

    #[serde(default = "default_brightness")]
    pub display_brightness: u8,
    #[serde(default = "default_volume")]
    pub audio_volume: u8,
}

fn default_brightness() -> u8 {
    80
}
fn default_volume() -> u8 {
    60
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            wifi_enabled: false,
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            ai_enabled: false,
            openai_key: String::new(),
            prompt_text: String::new(),
            mining_enabled: false,
            duco_user: String::new(),
            duco_miner_key: String::new(),
            speech_enabled: false,
            azure_speech_key: String::new(),
            azure_region: String::new(),
            azure_subdomain: String::new(),
            display_brightness: default_brightness(),
            audio_volume: default_volume(),
        }
    }
}

/// One entry in the ordered SET sequence.
///
/// `aliases` lists every wire key this logical setting has been known under,
/// newest first; the sync workflow walks them until one is accepted.
/// `required: false` marks keys older firmware may not know — an
/// `unknown_key` rejection is then a warning, not an abort.
#[derive(Clone, Debug)]
pub struct SetOp {
    pub aliases: &'static [&'static str],
    pub value: String,
    pub required: bool,
}

impl SetOp {
    /// Primary (current-firmware) key name.
    pub fn key(&self) -> &'static str {
        self.aliases[0]
    }
}

fn bool_value(b: bool) -> String {
    if b { "1" } else { "0" }.to_string()
}

impl DeviceConfig {
    /// The fixed ordered SET sequence covering every config field.
    /// Order matters: enable flags land before their dependent credentials so
    /// the firmware can validate them in one pass.
    pub fn to_set_sequence(&self) -> Vec<SetOp> {
        vec![
            SetOp {
                aliases: &["wifi_enabled"],
                value: bool_value(self.wifi_enabled),
                required: true,
            },
            SetOp {
                aliases: &["wifi_ssid"],
                value: self.wifi_ssid.clone(),
                required: true,
            },
            SetOp {
                aliases: &["wifi_pass"],
                value: self.wifi_pass.clone(),
                required: true,
            },
            SetOp {
                aliases: &["ai_enabled"],
                value: bool_value(self.ai_enabled),
                required: true,
            },
            SetOp {
                aliases: &["openai_key"],
                value: self.openai_key.clone(),
                required: true,
            },
            SetOp {
                aliases: &["prompt_text"],
                value: self.prompt_text.clone(),
                required: false,
            },
            // duco_enabled: pre-0.9 firmware key for the same flag.
            SetOp {
                aliases: &["mining_enabled", "duco_enabled"],
                value: bool_value(self.mining_enabled),
                required: false,
            },
            SetOp {
                aliases: &["duco_user"],
                value: self.duco_user.clone(),
                required: false,
            },
            SetOp {
                aliases: &["duco_miner_key", "miner_key"],
                value: self.duco_miner_key.clone(),
                required: false,
            },
            SetOp {
                aliases: &["speech_enabled", "tts_enabled"],
                value: bool_value(self.speech_enabled),
                required: false,
            },
            SetOp {
                aliases: &["azure_speech_key"],
                value: self.azure_speech_key.clone(),
                required: false,
            },
            SetOp {
                aliases: &["azure_region"],
                value: self.azure_region.clone(),
                required: false,
            },
            SetOp {
                aliases: &["azure_subdomain"],
                value: self.azure_subdomain.clone(),
                required: false,
            },
            SetOp {
                aliases: &["display_brightness"],
                value: self.display_brightness.to_string(),
                required: false,
            },
            SetOp {
                aliases: &["audio_volume"],
                value: self.audio_volume.to_string(),
                required: false,
            },
        ]
    }

    /// The intended value of one critical boolean flag.
    pub fn critical_flag(&self, key: &str) -> Option<bool> {
        match key {
            "wifi_enabled" => Some(self.wifi_enabled),
            "mining_enabled" => Some(self.mining_enabled),
            "speech_enabled" => Some(self.speech_enabled),
            _ => None,
        }
    }

    /// A copy safe to persist in logs and support bundles.
    pub fn masked(&self) -> DeviceConfig {
        let mut copy = self.clone();
        copy.wifi_pass = mask_secret(&copy.wifi_pass);
        copy.openai_key = mask_secret(&copy.openai_key);
        copy.duco_miner_key = mask_secret(&copy.duco_miner_key);
        copy.azure_speech_key = mask_secret(&copy.azure_speech_key);
        copy
    }
}

// ============================================================================
// Masking / Redaction
// ============================================================================

/// Mask a secret for logging: `***` plus the last 4 characters, or all `*`
/// when the secret is 4 characters or shorter.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{}", tail)
}

pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.contains(key)
}

/// Rewrite a command line so it is safe for the trace. Only `SET <key> <value>`
/// shapes with a sensitive key are rewritten; everything else passes through.
/// The value is the whole remainder of the line (prompt text contains spaces).
pub fn redact_command(text: &str) -> String {
    let mut parts = text.splitn(3, ' ');
    let verb = parts.next().unwrap_or("");
    if verb != "SET" {
        return text.to_string();
    }
    let key = match parts.next() {
        Some(k) => k,
        None => return text.to_string(),
    };
    let value = match parts.next() {
        Some(v) => v,
        None => return text.to_string(),
    };
    if !is_sensitive_key(key) {
        return text.to_string();
    }
    if value == EMPTY_SENTINEL {
        return text.to_string();
    }
    format!("SET {} {}", key, mask_secret(value))
}

/// Tolerant boolean extraction from device config JSON. Firmware revisions
/// have reported flags as bool, 0/1 numbers, and "0"/"1"/"true"/"false"
/// strings.
pub fn flag_from_json(value: &serde_json::Value, key: &str) -> Option<bool> {
    let v = value.get(key)?;
    if let Some(b) = v.as_bool() {
        return Some(b);
    }
    if let Some(n) = v.as_i64() {
        return Some(n != 0);
    }
    if let Some(s) = v.as_str() {
        return match s {
            "1" | "true" | "TRUE" | "True" => Some(true),
            "0" | "false" | "FALSE" | "False" => Some(false),
            _ => None,
        };
    }
    None
}
