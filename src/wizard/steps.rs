// Step catalog and step bodies.
//
// The catalog is the immutable list of provisioning steps; bodies validate
// operator input first, then talk to the device through the retry executor
// and protocol client. Device failures come back retryable, validation
// failures do not.

use std::time::Duration;

use crate::api_check::KeyValidator;
use crate::cancel::CancelToken;
use crate::flasher::{FlashRequest, Flasher};
use crate::io::error::ProtoError;
use crate::io::proto::client::ProtocolClient;
use crate::io::serial::transport::TransportSession;
use crate::retry::{self, RetryPolicy};
use crate::sync::{ConfigSync, SyncOptions};
use crate::wizard::{SessionState, StepResult};

/// What a step actually does when executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepAction {
    Connect,
    FlashFirmware,
    WifiCredentials,
    AiAssistant,
    Mining,
    Speech,
    Tuning,
    ApplyConfig,
    Finish,
}

/// Immutable catalog entry.
#[derive(Clone)]
pub struct StepDefinition {
    /// Ordinal, 1..N, unique.
    pub index: usize,
    pub title: &'static str,
    pub description: &'static str,
    pub primary_action_label: &'static str,
    pub skippable: bool,
    pub action: StepAction,
    /// Steps whose predicate rejects the session state are auto-skipped.
    pub available: fn(&SessionState) -> bool,
}

fn always(_: &SessionState) -> bool {
    true
}

fn wifi_enabled(session: &SessionState) -> bool {
    session.config.wifi_enabled
}

/// The provisioning flow, in execution order.
pub fn catalog() -> Vec<StepDefinition> {
    vec![
        StepDefinition {
            index: 1,
            title: "Connect",
            description: "Find the Wisp on its serial port and read its identity.",
            primary_action_label: "Connect",
            skippable: false,
            action: StepAction::Connect,
            available: always,
        },
        StepDefinition {
            index: 2,
            title: "Flash firmware",
            description: "Write the bundled firmware image. Skip to keep what is installed.",
            primary_action_label: "Flash",
            skippable: true,
            action: StepAction::FlashFirmware,
            available: always,
        },
        StepDefinition {
            index: 3,
            title: "Wi-Fi",
            description: "Network credentials the Wisp uses to reach the cloud.",
            primary_action_label: "Save Wi-Fi",
            skippable: false,
            action: StepAction::WifiCredentials,
            available: always,
        },
        StepDefinition {
            index: 4,
            title: "Assistant",
            description: "OpenAI access and the Wisp's personality prompt.",
            primary_action_label: "Check key",
            skippable: true,
            action: StepAction::AiAssistant,
            available: wifi_enabled,
        },
        StepDefinition {
            index: 5,
            title: "Mining",
            description: "Optional Duino-Coin miner running on the idle core.",
            primary_action_label: "Configure mining",
            skippable: true,
            action: StepAction::Mining,
            available: wifi_enabled,
        },
        StepDefinition {
            index: 6,
            title: "Speech",
            description: "Azure Speech voice output.",
            primary_action_label: "Check key",
            skippable: true,
            action: StepAction::Speech,
            available: wifi_enabled,
        },
        StepDefinition {
            index: 7,
            title: "Display & sound",
            description: "Brightness and volume tuning.",
            primary_action_label: "Apply tuning",
            skippable: true,
            action: StepAction::Tuning,
            available: always,
        },
        StepDefinition {
            index: 8,
            title: "Send configuration",
            description: "Write everything to the device and verify it persisted.",
            primary_action_label: "Send",
            skippable: false,
            action: StepAction::ApplyConfig,
            available: always,
        },
        StepDefinition {
            index: 9,
            title: "Finish",
            description: "Close the connection. The Wisp is ready.",
            primary_action_label: "Done",
            skippable: false,
            action: StepAction::Finish,
            available: always,
        },
    ]
}

/// Everything a step body needs besides session state.
pub struct StepContext {
    pub transport: TransportSession,
    pub retry: RetryPolicy,
    pub command_timeout: Duration,
    pub sync_options: SyncOptions,
    pub flasher: Box<dyn Flasher>,
    pub validator: Box<dyn KeyValidator>,
}

impl StepContext {
    fn client_for(&self, session: &SessionState) -> Result<ProtocolClient, StepResult> {
        match &session.port {
            Some(port) => Ok(ProtocolClient::with_timeout(
                self.transport.clone(),
                port.clone(),
                self.command_timeout,
            )),
            None => Err(StepResult::validation(
                "No serial port selected.",
                "Pick the Wisp's port from the port list first.",
                false,
            )),
        }
    }
}

fn device_failure(err: ProtoError, guidance: &str, can_skip: bool) -> StepResult {
    if err.is_cancelled() {
        StepResult::cancelled()
    } else {
        StepResult::failed(err.to_string(), guidance, can_skip)
    }
}

pub async fn run_step(
    action: StepAction,
    session: &mut SessionState,
    ctx: &StepContext,
    cancel: &CancelToken,
) -> StepResult {
    match action {
        StepAction::Connect => connect(session, ctx, cancel).await,
        StepAction::FlashFirmware => flash_firmware(session, ctx, cancel).await,
        StepAction::WifiCredentials => wifi_credentials(session),
        StepAction::AiAssistant => ai_assistant(session, ctx, cancel).await,
        StepAction::Mining => mining(session),
        StepAction::Speech => speech(session, ctx, cancel).await,
        StepAction::Tuning => tuning(session),
        StepAction::ApplyConfig => apply_config(session, ctx, cancel).await,
        StepAction::Finish => finish(ctx),
    }
}

async fn connect(
    session: &mut SessionState,
    ctx: &StepContext,
    cancel: &CancelToken,
) -> StepResult {
    let client = match ctx.client_for(session) {
        Ok(c) => c,
        Err(result) => return result,
    };

    if let Err(e) = retry::execute(&ctx.retry, cancel, |attempt_cancel| {
        let client = &client;
        async move { client.hello(&attempt_cancel).await }
    })
    .await
    {
        return device_failure(
            e,
            "Check the USB cable and that no other program holds the port.",
            false,
        );
    }

    let timeout = ctx.command_timeout;
    match retry::execute(&ctx.retry, cancel, |attempt_cancel| {
        let client = &client;
        async move { client.get_info(timeout, &attempt_cancel).await }
    })
    .await
    {
        Ok(info) => {
            tlog!(
                "[wizard] connected: firmware {} on {}",
                info.firmware_version,
                client.port_settings().port
            );
            session.device_info = Some(info);
            StepResult::success()
        }
        Err(e) => device_failure(e, "The device answered HELLO but not GET INFO; power-cycle it and retry.", false),
    }
}

async fn flash_firmware(
    session: &mut SessionState,
    ctx: &StepContext,
    cancel: &CancelToken,
) -> StepResult {
    let port = match &session.port {
        Some(p) => p.clone(),
        None => {
            return StepResult::validation(
                "No serial port selected.",
                "Pick the Wisp's port first.",
                true,
            )
        }
    };
    let image = match &session.firmware_image {
        Some(p) => p.clone(),
        None => {
            return StepResult::validation(
                "No firmware image selected.",
                "Choose a firmware file, or skip to keep the installed firmware.",
                true,
            )
        }
    };

    // The flasher subprocess needs the port to itself.
    ctx.transport.close();

    let outcome = ctx
        .flasher
        .flash(
            &FlashRequest {
                port: port.port.clone(),
                baud: port.baud,
                erase: session.erase_before_flash,
                image_path: image,
            },
            cancel,
        )
        .await;

    if cancel.is_cancelled() {
        return StepResult::cancelled();
    }
    if outcome.success {
        StepResult::success_with_guidance(outcome.message)
    } else {
        let guidance = match &outcome.log_path {
            Some(path) => format!("See the flash log: {}", path.display()),
            None => "Hold BOOT while plugging in, then retry.".to_string(),
        };
        StepResult::failed(outcome.message, guidance, true)
    }
}

fn wifi_credentials(session: &mut SessionState) -> StepResult {
    if session.config.wifi_enabled && session.config.wifi_ssid.is_empty() {
        return StepResult::validation(
            "Wi-Fi is enabled but no network name is set.",
            "Enter the SSID, or disable Wi-Fi.",
            false,
        );
    }
    StepResult::success()
}

async fn ai_assistant(
    session: &mut SessionState,
    ctx: &StepContext,
    cancel: &CancelToken,
) -> StepResult {
    if !session.config.ai_enabled {
        return StepResult::success();
    }
    if session.config.openai_key.is_empty() {
        return StepResult::validation(
            "The assistant is enabled but no OpenAI key is set.",
            "Paste an API key, or disable the assistant.",
            true,
        );
    }

    tokio::select! {
        result = ctx.validator.test_openai_key(&session.config.openai_key) => match result {
            Ok(()) => StepResult::success(),
            Err(e) => StepResult::failed(e, "Verify the key in the OpenAI dashboard.", true),
        },
        _ = cancel.cancelled() => StepResult::cancelled(),
    }
}

fn mining(session: &mut SessionState) -> StepResult {
    if session.config.mining_enabled && session.config.duco_user.is_empty() {
        return StepResult::validation(
            "Mining is enabled but no Duino-Coin username is set.",
            "Enter the username, or disable mining.",
            true,
        );
    }
    StepResult::success()
}

async fn speech(
    session: &mut SessionState,
    ctx: &StepContext,
    cancel: &CancelToken,
) -> StepResult {
    if !session.config.speech_enabled {
        return StepResult::success();
    }
    let cfg = &session.config;
    if cfg.azure_speech_key.is_empty() || cfg.azure_region.is_empty() {
        return StepResult::validation(
            "Speech is enabled but the Azure key or region is missing.",
            "Fill in both, or disable speech.",
            true,
        );
    }

    tokio::select! {
        result = ctx.validator.test_azure_speech(
            &cfg.azure_speech_key,
            &cfg.azure_region,
            &cfg.azure_subdomain,
        ) => match result {
            Ok(()) => StepResult::success(),
            Err(e) => StepResult::failed(e, "Verify the key and region in the Azure portal.", true),
        },
        _ = cancel.cancelled() => StepResult::cancelled(),
    }
}

fn tuning(session: &mut SessionState) -> StepResult {
    session.config.display_brightness = session.config.display_brightness.min(100);
    session.config.audio_volume = session.config.audio_volume.min(100);
    StepResult::success()
}

async fn apply_config(
    session: &mut SessionState,
    ctx: &StepContext,
    cancel: &CancelToken,
) -> StepResult {
    let client = match ctx.client_for(session) {
        Ok(c) => c,
        Err(result) => return result,
    };

    // Make sure the device is still there before the long send.
    if let Err(e) = retry::execute(&ctx.retry, cancel, |attempt_cancel| {
        let client = &client;
        async move { client.ping(&attempt_cancel).await }
    })
    .await
    {
        return device_failure(e, "Reconnect the device and retry.", false);
    }

    let sync = ConfigSync::new(&client);
    match sync.send_config(&session.config, &ctx.sync_options, cancel).await {
        Ok(report) => {
            let success = report.success;
            let message = report.message.clone();
            session.last_sync = Some(report);
            if success {
                StepResult::success_with_guidance(message)
            } else {
                StepResult::failed(
                    message,
                    "Retry the send; if it keeps failing, re-flash the firmware.",
                    false,
                )
            }
        }
        Err(e) => device_failure(e, "Retry the send once the device is back.", false),
    }
}

fn finish(ctx: &StepContext) -> StepResult {
    ctx.transport.close();
    StepResult::success_with_guidance("Setup complete. The Wisp is ready to use.")
}

#[cfg(test)]
pub mod tests_support {
    use super::*;
    use crate::flasher::FlashOutcome;
    use async_trait::async_trait;

    pub struct MockFlasher {
        outcome: FlashOutcome,
    }

    impl MockFlasher {
        pub fn ok() -> Self {
            Self {
                outcome: FlashOutcome {
                    success: true,
                    exit_code: Some(0),
                    log_path: None,
                    message: "firmware flashed".to_string(),
                },
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                outcome: FlashOutcome {
                    success: false,
                    exit_code: Some(2),
                    log_path: None,
                    message: message.to_string(),
                },
            }
        }
    }

    #[async_trait]
    impl Flasher for MockFlasher {
        async fn flash(&self, _req: &FlashRequest, _cancel: &CancelToken) -> FlashOutcome {
            self.outcome.clone()
        }
    }

    pub struct MockValidator {
        pub openai: Result<(), String>,
        pub azure: Result<(), String>,
    }

    impl MockValidator {
        pub fn all_ok() -> Self {
            Self {
                openai: Ok(()),
                azure: Ok(()),
            }
        }

        pub fn openai_rejecting(message: &str) -> Self {
            Self {
                openai: Err(message.to_string()),
                azure: Ok(()),
            }
        }
    }

    #[async_trait]
    impl KeyValidator for MockValidator {
        async fn test_openai_key(&self, _key: &str) -> Result<(), String> {
            self.openai.clone()
        }

        async fn test_azure_speech(
            &self,
            _key: &str,
            _region: &str,
            _subdomain: &str,
        ) -> Result<(), String> {
            self.azure.clone()
        }
    }

    /// Context tuned for fast tests: short command timeout, two quick
    /// attempts, no verify grace period.
    pub fn test_context(
        transport: TransportSession,
        flasher: MockFlasher,
        validator: MockValidator,
    ) -> StepContext {
        StepContext {
            transport,
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(10),
                backoff_factor: 1.0,
                per_attempt_timeout: None,
            },
            command_timeout: Duration::from_millis(200),
            sync_options: SyncOptions {
                capture_boot_log: false,
                boot_log_window: Duration::from_millis(100),
                verify_delay: Duration::ZERO,
                verify_retry: RetryPolicy::single_attempt(),
            },
            flasher: Box::new(flasher),
            validator: Box::new(validator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::*;
    use super::*;
    use crate::io::serial::testkit::{scripted_session, test_port};
    use crate::wizard::StepStatus;

    fn session_with_port() -> SessionState {
        SessionState {
            port: Some(test_port()),
            ..SessionState::default()
        }
    }

    #[test]
    fn test_catalog_indices_are_ordinal_and_unique() {
        let steps = catalog();
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step.index, i + 1);
        }
    }

    #[test]
    fn test_mining_step_requires_wifi() {
        let steps = catalog();
        let mining = steps.iter().find(|s| s.action == StepAction::Mining).unwrap();
        let mut session = SessionState::default();
        session.config.wifi_enabled = false;
        assert!(!(mining.available)(&session));
        session.config.wifi_enabled = true;
        assert!((mining.available)(&session));
    }

    #[tokio::test]
    async fn test_ai_step_skips_validation_when_disabled() {
        let (transport, _) = scripted_session(vec![]);
        let ctx = test_context(transport, MockFlasher::ok(), MockValidator::openai_rejecting("bad"));
        let mut session = session_with_port();
        session.config.ai_enabled = false;

        let result = run_step(StepAction::AiAssistant, &mut session, &ctx, &CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_ai_step_surfaces_key_rejection_as_retryable() {
        let (transport, _) = scripted_session(vec![]);
        let ctx = test_context(
            transport,
            MockFlasher::ok(),
            MockValidator::openai_rejecting("OpenAI rejected the key (401)"),
        );
        let mut session = session_with_port();
        session.config.ai_enabled = true;
        session.config.openai_key = "sk-bad".into();

        let result = run_step(StepAction::AiAssistant, &mut session, &ctx, &CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.can_retry);
        assert!(result.error_message.unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_flash_step_without_image_is_skippable_validation() {
        let (transport, _) = scripted_session(vec![]);
        let ctx = test_context(transport, MockFlasher::ok(), MockValidator::all_ok());
        let mut session = session_with_port();

        let result =
            run_step(StepAction::FlashFirmware, &mut session, &ctx, &CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert!(!result.can_retry);
        assert!(result.can_skip);
    }

    #[tokio::test]
    async fn test_flash_step_failure_is_retryable() {
        let (transport, _) = scripted_session(vec![]);
        let ctx = test_context(
            transport,
            MockFlasher::failing("espflash exited with an error"),
            MockValidator::all_ok(),
        );
        let mut session = session_with_port();
        session.firmware_image = Some(std::path::PathBuf::from("/tmp/wisp-fw.bin"));

        let result =
            run_step(StepAction::FlashFirmware, &mut session, &ctx, &CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.can_retry);
        assert!(result.can_skip);
    }

    #[tokio::test]
    async fn test_tuning_clamps_out_of_range_values() {
        let (transport, _) = scripted_session(vec![]);
        let ctx = test_context(transport, MockFlasher::ok(), MockValidator::all_ok());
        let mut session = session_with_port();
        session.config.display_brightness = 255;
        session.config.audio_volume = 200;

        let result = run_step(StepAction::Tuning, &mut session, &ctx, &CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(session.config.display_brightness, 100);
        assert_eq!(session.config.audio_volume, 100);
    }
}
