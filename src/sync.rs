// Configuration synchronization workflow.
//
// Pushes the full SET sequence to the device, applies with SAVE+REBOOT, then
// verifies the persisted flags survived the reboot. Older firmware missing
// optional keys downgrades to warnings; verification failure triggers exactly
// one more full send-apply-verify cycle before giving up.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::{flag_from_json, DeviceConfig, CRITICAL_FLAGS};
use crate::io::error::ProtoError;
use crate::io::proto::client::ProtocolClient;
use crate::retry::{self, RetryPolicy};

#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Hold the port open after a successful apply and record the device's
    /// boot chatter as a timestamped artifact.
    pub capture_boot_log: bool,
    pub boot_log_window: Duration,
    /// Grace period after REBOOT before the verification fetch.
    pub verify_delay: Duration,
    /// Policy for the verification `GET CFG` (the device is coming back up,
    /// the first fetch often races the reboot).
    pub verify_retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            capture_boot_log: false,
            boot_log_window: Duration::from_secs(8),
            verify_delay: Duration::from_secs(3),
            verify_retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(750),
                backoff_factor: 2.0,
                per_attempt_timeout: None,
            },
        }
    }
}

/// Outcome of one reconciliation run. `success: false` means the second
/// verification also failed; the cycle is not retried further automatically.
#[derive(Clone, Debug)]
pub struct SyncReport {
    pub success: bool,
    pub verified: bool,
    /// `"<key>:unsupported"` entries for optional keys older firmware lacks.
    pub warnings: Vec<String>,
    pub message: String,
    pub boot_log: Option<Vec<String>>,
}

pub struct ConfigSync<'a> {
    client: &'a ProtocolClient,
}

impl<'a> ConfigSync<'a> {
    pub fn new(client: &'a ProtocolClient) -> Self {
        Self { client }
    }

    /// One full reconciliation: send, apply, verify, and on mismatch one
    /// more complete cycle.
    pub async fn send_config(
        &self,
        cfg: &DeviceConfig,
        opts: &SyncOptions,
        cancel: &CancelToken,
    ) -> Result<SyncReport, ProtoError> {
        let mut warnings = self.send_all_sets(cfg, cancel).await?;
        self.apply(cancel).await?;

        let mut verified = self.verify(cfg, &warnings, opts, cancel).await?;
        if !verified {
            tlog!("[sync] verification mismatch, resending full configuration once");
            warnings = self.send_all_sets(cfg, cancel).await?;
            self.apply(cancel).await?;
            verified = self.verify(cfg, &warnings, opts, cancel).await?;
        }

        if !verified {
            return Ok(SyncReport {
                success: false,
                verified: false,
                warnings,
                message: "Device configuration could not be verified after reboot. \
                          Flags on the device do not match what was sent."
                    .to_string(),
                boot_log: None,
            });
        }

        let boot_log = if opts.capture_boot_log {
            self.capture_boot_log(opts, cancel).await
        } else {
            None
        };

        let message = if warnings.is_empty() {
            "Configuration sent and verified.".to_string()
        } else {
            format!(
                "Configuration sent and verified. Skipped keys not supported by this firmware: {}",
                warnings.join(", ")
            )
        };

        Ok(SyncReport {
            success: true,
            verified: true,
            warnings,
            message,
            boot_log,
        })
    }

    /// Send the ordered SET sequence. Each logical key walks its alias list
    /// until one sticks; `unknown_key` on every alias of an optional key is a
    /// warning, on a required key an abort. Any non-`unknown_key` failure
    /// aborts immediately.
    async fn send_all_sets(
        &self,
        cfg: &DeviceConfig,
        cancel: &CancelToken,
    ) -> Result<Vec<String>, ProtoError> {
        let mut warnings = Vec::new();

        for op in cfg.to_set_sequence() {
            if cancel.is_cancelled() {
                return Err(ProtoError::Cancelled);
            }

            let mut accepted = false;
            let mut last_unknown = None;
            for alias in op.aliases {
                match self.client.set_key(alias, &op.value, cancel).await {
                    Ok(()) => {
                        if *alias != op.key() {
                            tlog!("[sync] {} accepted under legacy key {}", op.key(), alias);
                        }
                        accepted = true;
                        break;
                    }
                    Err(e) if e.is_unknown_key() => {
                        last_unknown = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }

            if !accepted {
                if op.required {
                    return Err(last_unknown.unwrap_or_else(|| {
                        ProtoError::configuration(format!("required key {} not accepted", op.key()))
                    }));
                }
                tlog!(
                    "[sync] optional key {} not supported by this firmware, skipping",
                    op.key()
                );
                warnings.push(format!("{}:unsupported", op.key()));
            }
        }

        Ok(warnings)
    }

    /// Persist and restart. SAVE must ack (the flash write has to land);
    /// REBOOT tolerates the device dropping off mid-ack.
    async fn apply(&self, cancel: &CancelToken) -> Result<(), ProtoError> {
        self.client.save(cancel).await?;
        self.client.reboot(cancel).await?;
        Ok(())
    }

    /// Re-fetch the persisted config and compare the critical boolean flags.
    /// `Ok(false)` covers both a mismatch and an unreachable device; only
    /// cancellation propagates as an error.
    async fn verify(
        &self,
        cfg: &DeviceConfig,
        warnings: &[String],
        opts: &SyncOptions,
        cancel: &CancelToken,
    ) -> Result<bool, ProtoError> {
        if !opts.verify_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(opts.verify_delay) => {}
                _ = cancel.cancelled() => return Err(ProtoError::Cancelled),
            }
        }

        let fetched = retry::execute(&opts.verify_retry, cancel, |attempt_cancel| async move {
            self.client.get_config_json(&attempt_cancel).await
        })
        .await;

        let device_cfg = match fetched {
            Ok(json) => json,
            Err(ProtoError::Cancelled) => return Err(ProtoError::Cancelled),
            Err(e) => {
                tlog!("[sync] verification fetch failed: {}", e);
                return Ok(false);
            }
        };

        for key in CRITICAL_FLAGS {
            // A flag the firmware rejected as unknown cannot be expected back.
            if warnings.iter().any(|w| w == &format!("{}:unsupported", key)) {
                continue;
            }
            let intended = match cfg.critical_flag(key) {
                Some(v) => v,
                None => continue,
            };
            match flag_from_json(&device_cfg, key) {
                Some(actual) if actual == intended => {}
                actual => {
                    tlog!(
                        "[sync] flag {} mismatch: intended {}, device reports {:?}",
                        key,
                        intended,
                        actual
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Best-effort boot log artifact; never affects the apply outcome.
    async fn capture_boot_log(
        &self,
        opts: &SyncOptions,
        cancel: &CancelToken,
    ) -> Option<Vec<String>> {
        match self
            .client
            .transport()
            .capture_lines(
                self.client.port_settings(),
                opts.boot_log_window,
                cancel,
            )
            .await
        {
            Ok(lines) => Some(lines),
            Err(e) => {
                tlog!("[sync] boot log capture failed (ignored): {}", e);
                None
            }
        }
    }
}
