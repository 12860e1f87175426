// Step workflow state machine.
//
// One state per catalog index, traversed strictly forward except for the
// operator's explicit go-back and skip actions. Exclusive `&mut` access is
// the busy discipline: a new step cannot start while one is in flight, and
// cancelling the caller's token cooperatively unwinds the retry executor and
// any open device call without forcing the port closed.

pub mod steps;

use std::path::PathBuf;

use crate::cancel::CancelToken;
use crate::config::DeviceConfig;
use crate::io::proto::codec::DeviceInfo;
use crate::io::serial::transport::PortSettings;
use crate::sync::SyncReport;

pub use steps::{catalog, StepAction, StepContext, StepDefinition};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct StepResult {
    pub status: StepStatus,
    pub error_message: Option<String>,
    pub guidance: Option<String>,
    /// Whether the operator is offered a manual retry. Validation failures
    /// never are — they need changed input, not a re-attempt.
    pub can_retry: bool,
    pub can_skip: bool,
}

impl StepResult {
    pub fn success() -> Self {
        Self {
            status: StepStatus::Success,
            error_message: None,
            guidance: None,
            can_retry: false,
            can_skip: false,
        }
    }

    pub fn success_with_guidance(guidance: impl Into<String>) -> Self {
        Self {
            guidance: Some(guidance.into()),
            ..Self::success()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: StepStatus::Cancelled,
            error_message: None,
            guidance: None,
            can_retry: true,
            can_skip: false,
        }
    }

    pub fn failed(message: impl Into<String>, guidance: impl Into<String>, can_skip: bool) -> Self {
        Self {
            status: StepStatus::Failed,
            error_message: Some(message.into()),
            guidance: Some(guidance.into()),
            can_retry: true,
            can_skip,
        }
    }

    /// Operator input is missing or inconsistent; retrying without changing
    /// it cannot succeed.
    pub fn validation(message: impl Into<String>, guidance: impl Into<String>, can_skip: bool) -> Self {
        Self {
            status: StepStatus::Failed,
            error_message: Some(message.into()),
            guidance: Some(guidance.into()),
            can_retry: false,
            can_skip,
        }
    }
}

/// Mutable session state threaded through the steps. Plain values, rebuilt
/// views — no ambient statics.
#[derive(Default)]
pub struct SessionState {
    pub port: Option<PortSettings>,
    pub config: DeviceConfig,
    pub device_info: Option<DeviceInfo>,
    pub firmware_image: Option<PathBuf>,
    pub erase_before_flash: bool,
    pub last_sync: Option<SyncReport>,
}

pub struct Wizard {
    catalog: Vec<StepDefinition>,
    ctx: StepContext,
    session: SessionState,
    /// 1-based index of the current step.
    current: usize,
    outcomes: Vec<Option<StepStatus>>,
    finished: bool,
}

impl Wizard {
    pub fn new(ctx: StepContext, session: SessionState) -> Self {
        let catalog = catalog();
        let outcomes = vec![None; catalog.len()];
        Self {
            catalog,
            ctx,
            session,
            current: 1,
            outcomes,
            finished: false,
        }
    }

    pub fn step_count(&self) -> usize {
        self.catalog.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_step(&self) -> &StepDefinition {
        &self.catalog[self.current - 1]
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn outcome(&self, index: usize) -> Option<&StepStatus> {
        self.outcomes.get(index - 1).and_then(|o| o.as_ref())
    }

    /// Execute the current step's body under the caller's cancellation scope
    /// and apply the transition rule: Success/Skipped advance (auto-skipping
    /// unavailable steps), Cancelled and Failed stay put.
    pub async fn execute_current(&mut self, cancel: &CancelToken) -> StepResult {
        if self.finished {
            return StepResult::validation("Setup already finished.", "Nothing left to do.", false);
        }

        let step = self.catalog[self.current - 1].clone();
        tlog!("[wizard] step {} '{}' starting", step.index, step.title);

        let result = steps::run_step(step.action, &mut self.session, &self.ctx, cancel).await;

        self.outcomes[self.current - 1] = Some(result.status.clone());
        match result.status {
            StepStatus::Success | StepStatus::Skipped => {
                tlog!("[wizard] step {} '{}' done", step.index, step.title);
                if step.index == self.catalog.len() {
                    self.finished = true;
                } else {
                    self.advance_and_autoskip();
                }
            }
            StepStatus::Cancelled => {
                tlog!("[wizard] step {} '{}' cancelled", step.index, step.title);
            }
            StepStatus::Failed => {
                tlog!(
                    "[wizard] step {} '{}' failed: {}",
                    step.index,
                    step.title,
                    result.error_message.as_deref().unwrap_or("unknown")
                );
            }
        }
        result
    }

    /// Operator-invoked skip: allowed only when the current step declares
    /// itself skippable. Transitions exactly like Success, without running
    /// the body.
    pub fn skip_current(&mut self) -> Result<(), String> {
        if self.finished {
            return Err("Setup already finished.".to_string());
        }
        let step = &self.catalog[self.current - 1];
        if !step.skippable {
            return Err(format!("Step '{}' cannot be skipped.", step.title));
        }
        tlog!("[wizard] step {} '{}' skipped by operator", step.index, step.title);
        self.outcomes[self.current - 1] = Some(StepStatus::Skipped);
        if step.index == self.catalog.len() {
            self.finished = true;
        } else {
            self.advance_and_autoskip();
        }
        Ok(())
    }

    /// Move back to the nearest previous step available under the current
    /// session state. No-op on the first step.
    pub fn go_back(&mut self) {
        let mut target = self.current;
        while target > 1 {
            target -= 1;
            if (self.catalog[target - 1].available)(&self.session) {
                break;
            }
        }
        if target != self.current {
            tlog!("[wizard] going back to step {}", target);
            self.current = target;
        }
    }

    /// Advance one index, then keep advancing over steps whose availability
    /// predicate rejects the current session state, marking them skipped.
    /// The terminal step is always available.
    fn advance_and_autoskip(&mut self) {
        self.current += 1;
        while self.current < self.catalog.len() {
            let step = &self.catalog[self.current - 1];
            if (step.available)(&self.session) {
                break;
            }
            tlog!(
                "[wizard] step {} '{}' unavailable, auto-skipping",
                step.index,
                step.title
            );
            self.outcomes[self.current - 1] = Some(StepStatus::Skipped);
            self.current += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::steps::tests_support::{test_context, MockFlasher, MockValidator};
    use super::*;
    use crate::io::serial::testkit::{scripted_session, test_port};
    use crate::io::serial::wire::testwire::ScriptEntry;

    fn session_with_port() -> SessionState {
        SessionState {
            port: Some(test_port()),
            ..SessionState::default()
        }
    }

    fn wizard_with_script(script: Vec<ScriptEntry>, session: SessionState) -> Wizard {
        let (transport, _) = scripted_session(vec![script]);
        Wizard::new(
            test_context(transport, MockFlasher::ok(), MockValidator::all_ok()),
            session,
        )
    }

    #[tokio::test]
    async fn test_connect_step_success_advances() {
        let script = vec![
            ScriptEntry::new("HELLO", &["@OK HELLO"]),
            ScriptEntry::new("GET INFO", &["@INFO {\"firmware_version\":\"1.4.2\"}"]),
        ];
        let mut wizard = wizard_with_script(script, session_with_port());
        assert_eq!(wizard.current_index(), 1);

        let result = wizard.execute_current(&CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(wizard.current_index(), 2);
        assert_eq!(
            wizard.session().device_info.as_ref().unwrap().firmware_version,
            "1.4.2"
        );
    }

    #[tokio::test]
    async fn test_connect_without_port_is_validation_failure() {
        let mut wizard = wizard_with_script(vec![], SessionState::default());
        let result = wizard.execute_current(&CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert!(!result.can_retry);
        // Failed stays on the current step.
        assert_eq!(wizard.current_index(), 1);
    }

    #[tokio::test]
    async fn test_failed_device_step_offers_retry_and_stays() {
        // HELLO never gets a protocol response: retries exhaust, step fails.
        let script = vec![
            ScriptEntry::new("HELLO", &[]),
            ScriptEntry::new("HELLO", &[]),
        ];
        let mut wizard = wizard_with_script(script, session_with_port());
        let result = wizard.execute_current(&CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.can_retry);
        assert_eq!(wizard.current_index(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_step_stays_put() {
        let script = vec![ScriptEntry::new("HELLO", &[])];
        let mut wizard = wizard_with_script(script, session_with_port());
        let cancel = CancelToken::new();
        let cancel_bg = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel_bg.cancel();
        });

        let result = wizard.execute_current(&cancel).await;
        assert_eq!(result.status, StepStatus::Cancelled);
        assert_eq!(wizard.current_index(), 1);
    }

    #[tokio::test]
    async fn test_disabling_wifi_autoskips_dependent_steps() {
        // Steps 4 (assistant), 5 (mining), and 6 (speech) all require Wi-Fi.
        let mut session = session_with_port();
        session.config.wifi_enabled = false;
        let mut wizard = wizard_with_script(vec![], session);

        // Jump to the Wi-Fi step as if steps 1-2 were done.
        wizard.current = 3;
        let result = wizard.execute_current(&CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Success);

        // Advancing past step 3 lands on step 7, with 4-6 recorded skipped.
        assert_eq!(wizard.current_index(), 7);
        assert_eq!(wizard.outcome(4), Some(&StepStatus::Skipped));
        assert_eq!(wizard.outcome(5), Some(&StepStatus::Skipped));
        assert_eq!(wizard.outcome(6), Some(&StepStatus::Skipped));
    }

    #[tokio::test]
    async fn test_operator_skip_honours_skippable_flag() {
        let mut wizard = wizard_with_script(vec![], session_with_port());
        // Step 1 (connect) is not skippable.
        assert!(wizard.skip_current().is_err());

        wizard.current = 2; // firmware flash, skippable
        wizard.skip_current().unwrap();
        assert_eq!(wizard.outcome(2), Some(&StepStatus::Skipped));
        assert_eq!(wizard.current_index(), 3);
    }

    #[tokio::test]
    async fn test_go_back_skips_unavailable_steps() {
        let mut session = session_with_port();
        session.config.wifi_enabled = false;
        let mut wizard = wizard_with_script(vec![], session);
        wizard.current = 7;

        wizard.go_back();
        // Steps 6..4 are unavailable without Wi-Fi; lands on 3.
        assert_eq!(wizard.current_index(), 3);
    }

    #[tokio::test]
    async fn test_go_back_stops_at_first_step() {
        let mut wizard = wizard_with_script(vec![], session_with_port());
        wizard.go_back();
        assert_eq!(wizard.current_index(), 1);
    }

    #[tokio::test]
    async fn test_wifi_validation_requires_ssid() {
        let mut session = session_with_port();
        session.config.wifi_enabled = true;
        session.config.wifi_ssid = String::new();
        let mut wizard = wizard_with_script(vec![], session);
        wizard.current = 3;

        let result = wizard.execute_current(&CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert!(!result.can_retry);
    }

    #[tokio::test]
    async fn test_finish_step_completes_wizard() {
        let mut wizard = wizard_with_script(vec![], session_with_port());
        wizard.current = wizard.step_count();
        let result = wizard.execute_current(&CancelToken::new()).await;
        assert_eq!(result.status, StepStatus::Success);
        assert!(wizard.is_finished());

        // Further execution is refused.
        let again = wizard.execute_current(&CancelToken::new()).await;
        assert_eq!(again.status, StepStatus::Failed);
        assert!(!again.can_retry);
    }
}
