// Transport session: exclusive owner of the one active serial port.
//
// All protocol and workflow layers see line-level command/response exchanges
// only; nothing else touches the port. Blocking serial I/O runs on the
// blocking pool; the session lock enforces the at-most-one-in-flight-command
// discipline, and the cancel flag is polled between bounded reads.

use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::config::redact_command;
use crate::io::error::ProtoError;
use crate::io::proto::codec::{classify_line, Command, ResponseLine};
use crate::io::serial::trace::{TraceBuffer, TraceEntry};
use crate::io::serial::wire::{open_serial_link, WireLink};

/// Pause after opening a fresh handle, letting the device settle before the
/// first write (USB CDC ports drop early bytes right after open).
const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Deadline for the single resend after a suspected boot-reset race.
const BOOT_RETRY_TIMEOUT: Duration = Duration::from_secs(3);

/// Substrings marking ESP32 ROM boot output or the firmware's early setup
/// phase. Seeing one in the noise while a response never arrived means the
/// device likely reset mid-exchange and swallowed the command.
const BOOT_MARKERS: [&str; 5] = [
    "rst:0x",
    "boot:0x",
    "ets ",
    "waiting for download",
    "setup() start",
];

/// Longest accepted line; anything beyond is treated as noise overflow.
const LINE_MAX: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSettings {
    pub port: String,
    pub baud: u32,
}

impl PortSettings {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
        }
    }
}

type Opener = Arc<dyn Fn(&PortSettings) -> Result<Box<dyn WireLink>, ProtoError> + Send + Sync>;

struct PortSlot {
    link: Option<Box<dyn WireLink>>,
    settings: Option<PortSettings>,
}

/// Owns the single active port handle for one provisioning session.
///
/// Cheap to clone; clones share the same port, trace, and bookkeeping.
#[derive(Clone)]
pub struct TransportSession {
    slot: Arc<Mutex<PortSlot>>,
    trace: Arc<Mutex<TraceBuffer>>,
    last_response: Arc<Mutex<Option<String>>>,
    opener: Opener,
}

impl TransportSession {
    /// Session backed by real serial ports.
    pub fn new_system() -> Self {
        Self::with_opener(Arc::new(|settings: &PortSettings| {
            open_serial_link(&settings.port, settings.baud)
        }))
    }

    /// Session with an injected port opener (tests script the wire).
    pub fn with_opener(opener: Opener) -> Self {
        Self {
            slot: Arc::new(Mutex::new(PortSlot {
                link: None,
                settings: None,
            })),
            trace: Arc::new(Mutex::new(TraceBuffer::new())),
            last_response: Arc::new(Mutex::new(None)),
            opener,
        }
    }

    /// Send one command and wait for its protocol-prefixed response.
    ///
    /// Opens (or switches) the port as needed, discards device noise into the
    /// trace, recovers once from a suspected boot-reset race, and keeps the
    /// port open across protocol errors. I/O faults close the port so the
    /// next command starts clean.
    pub async fn exchange(
        &self,
        settings: &PortSettings,
        cmd: Command,
        cancel: &CancelToken,
    ) -> Result<ResponseLine, ProtoError> {
        let session = self.clone();
        let settings = settings.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || session.exchange_blocking(&settings, &cmd, &cancel))
            .await
            .map_err(|e| ProtoError::io("exchange task", e.to_string()))?
    }

    /// `LOG_DUMP` style burst read: send the command, then accumulate every
    /// subsequent line (no prefix filtering) until an `@ERR` line, a read
    /// silence of `silence_gap`, or `overall_cap` elapses.
    pub async fn read_burst(
        &self,
        settings: &PortSettings,
        command_text: &str,
        silence_gap: Duration,
        overall_cap: Duration,
        cancel: &CancelToken,
    ) -> Result<String, ProtoError> {
        let session = self.clone();
        let settings = settings.clone();
        let command_text = command_text.to_string();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            session.read_burst_blocking(&settings, &command_text, silence_gap, overall_cap, &cancel)
        })
        .await
        .map_err(|e| ProtoError::io("burst task", e.to_string()))?
    }

    /// Passive capture: hold the port open without writing and collect every
    /// line for `window`, each prefixed with a local wall-clock timestamp.
    /// Cancellation stops the capture early and returns what was collected.
    pub async fn capture_lines(
        &self,
        settings: &PortSettings,
        window: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<String>, ProtoError> {
        let session = self.clone();
        let settings = settings.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || session.capture_blocking(&settings, window, &cancel))
            .await
            .map_err(|e| ProtoError::io("capture task", e.to_string()))?
    }

    /// Close the active handle, if any. Close errors are swallowed; the next
    /// command reopens from scratch.
    pub fn close(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            if slot.link.is_some() {
                tlog!("[transport] closing {}", describe(&slot.settings));
            }
            slot.link = None;
            slot.settings = None;
        }
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().map(|s| s.link.is_some()).unwrap_or(false)
    }

    /// Last protocol-prefixed line received, raw wire form.
    pub fn last_response(&self) -> Option<String> {
        self.last_response.lock().ok().and_then(|g| g.clone())
    }

    pub fn trace_snapshot(&self) -> Vec<TraceEntry> {
        self.trace
            .lock()
            .map(|t| t.snapshot())
            .unwrap_or_default()
    }

    pub fn trace_render(&self) -> String {
        self.trace.lock().map(|t| t.render()).unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Blocking internals (run on the blocking pool, slot lock held)
    // ------------------------------------------------------------------

    fn lock_slot(&self) -> Result<MutexGuard<'_, PortSlot>, ProtoError> {
        self.slot
            .lock()
            .map_err(|_| ProtoError::io("port", "session lock poisoned"))
    }

    fn exchange_blocking(
        &self,
        settings: &PortSettings,
        cmd: &Command,
        cancel: &CancelToken,
    ) -> Result<ResponseLine, ProtoError> {
        let mut slot = self.lock_slot()?;
        self.ensure_open(&mut slot, settings, cancel)?;

        // First pass with the caller's deadline, one optional resend with a
        // fresh short deadline when the noise shows the device rebooted under
        // us and likely never saw the command.
        for attempt in 0..=1u8 {
            let timeout = if attempt == 0 {
                cmd.response_timeout
            } else {
                BOOT_RETRY_TIMEOUT
            };

            self.push_tx(&cmd.text);
            self.write_line(&mut slot, &cmd.text)?;

            let mut noise: Vec<String> = Vec::new();
            match self.read_protocol_line(&mut slot, timeout, cancel, &mut noise)? {
                Some(resp) => {
                    if let Ok(mut guard) = self.last_response.lock() {
                        *guard = Some(resp.raw());
                    }
                    return match resp {
                        ResponseLine::Err(reason) => {
                            // Protocol errors are not connection failures; the
                            // port stays open.
                            let raw = format!("@ERR {}", reason);
                            Err(ProtoError::protocol(reason, raw))
                        }
                        other => Ok(other),
                    };
                }
                None => {
                    let rebooted = noise
                        .iter()
                        .any(|line| BOOT_MARKERS.iter().any(|m| line.contains(m)));
                    if attempt == 0 && rebooted && !cmd.is_reboot() {
                        self.push_note(format!(
                            "boot reset detected during '{}', resending once",
                            redact_command(&cmd.text)
                        ));
                        continue;
                    }
                    return Err(ProtoError::timeout(
                        redact_command(&cmd.text),
                        timeout.as_millis() as u64,
                    ));
                }
            }
        }
        unreachable!("exchange loop returns on every path");
    }

    fn read_burst_blocking(
        &self,
        settings: &PortSettings,
        command_text: &str,
        silence_gap: Duration,
        overall_cap: Duration,
        cancel: &CancelToken,
    ) -> Result<String, ProtoError> {
        let mut slot = self.lock_slot()?;
        self.ensure_open(&mut slot, settings, cancel)?;

        self.push_tx(command_text);
        self.write_line(&mut slot, command_text)?;

        let started = Instant::now();
        let mut last_data = Instant::now();
        let mut partial: Vec<u8> = Vec::new();
        let mut out = String::new();
        let mut buf = [0u8; 256];

        loop {
            if cancel.is_cancelled() {
                return Err(ProtoError::Cancelled);
            }
            if started.elapsed() >= overall_cap || last_data.elapsed() >= silence_gap {
                break;
            }

            match self.read_step(&mut slot, &mut buf)? {
                0 => continue,
                n => {
                    last_data = Instant::now();
                    for &byte in &buf[..n] {
                        if byte == b'\n' {
                            let line = take_line(&mut partial);
                            self.push_rx(&line);
                            if let Some(ResponseLine::Err(reason)) = classify_line(&line) {
                                let raw = line.clone();
                                return Err(ProtoError::protocol(reason, raw));
                            }
                            out.push_str(&line);
                            out.push('\n');
                        } else if byte != b'\r' {
                            push_bounded(&mut partial, byte);
                        }
                    }
                }
            }
        }

        if !partial.is_empty() {
            let line = take_line(&mut partial);
            self.push_rx(&line);
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    fn capture_blocking(
        &self,
        settings: &PortSettings,
        window: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<String>, ProtoError> {
        let mut slot = self.lock_slot()?;
        self.ensure_open(&mut slot, settings, cancel)?;

        let deadline = Instant::now() + window;
        let mut partial: Vec<u8> = Vec::new();
        let mut lines = Vec::new();
        let mut buf = [0u8; 256];

        while Instant::now() < deadline && !cancel.is_cancelled() {
            match self.read_step(&mut slot, &mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    for &byte in &buf[..n] {
                        if byte == b'\n' {
                            let line = take_line(&mut partial);
                            self.push_rx(&line);
                            lines.push(format!(
                                "{} {}",
                                chrono::Local::now().format("%H:%M:%S%.3f"),
                                line
                            ));
                        } else if byte != b'\r' {
                            push_bounded(&mut partial, byte);
                        }
                    }
                }
                // A dying port mid-capture only ends the capture; the caller
                // already has its apply outcome.
                Err(_) => break,
            }
        }
        Ok(lines)
    }

    /// Open the port if closed, switching away from a differently-named or
    /// differently-tuned handle first.
    fn ensure_open(
        &self,
        slot: &mut PortSlot,
        settings: &PortSettings,
        cancel: &CancelToken,
    ) -> Result<(), ProtoError> {
        if let Some(current) = &slot.settings {
            if current != settings {
                self.push_note(format!(
                    "switching port {} -> {}",
                    current.port, settings.port
                ));
                // Best-effort close; errors are irrelevant once we reopen.
                slot.link = None;
                slot.settings = None;
            }
        }

        if slot.link.is_none() {
            if cancel.is_cancelled() {
                return Err(ProtoError::Cancelled);
            }
            let mut link = (self.opener)(settings)?;
            let _ = link.clear_buffers();
            slot.link = Some(link);
            slot.settings = Some(settings.clone());
            self.push_note(format!("opened {} @ {}", settings.port, settings.baud));
            tlog!("[transport] opened {} @ {} baud", settings.port, settings.baud);

            // Settle in slices so cancellation stays responsive.
            let settle_until = Instant::now() + SETTLE_DELAY;
            while Instant::now() < settle_until {
                if cancel.is_cancelled() {
                    return Err(ProtoError::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
        Ok(())
    }

    fn write_line(&self, slot: &mut PortSlot, text: &str) -> Result<(), ProtoError> {
        let link = slot
            .link
            .as_mut()
            .ok_or_else(|| ProtoError::io("port", "not open"))?;
        let mut framed = Vec::with_capacity(text.len() + 1);
        framed.extend(text.as_bytes());
        framed.push(b'\n');
        if let Err(e) = link.write_all(&framed).and_then(|_| link.flush()) {
            slot.link = None;
            slot.settings = None;
            return Err(ProtoError::io("write", e.to_string()));
        }
        Ok(())
    }

    /// Read lines until a protocol-prefixed one appears or the wall-clock
    /// deadline elapses. The deadline is fixed once here; each bounded read
    /// only consumes part of it, so chatty noise cannot extend the wait.
    fn read_protocol_line(
        &self,
        slot: &mut PortSlot,
        timeout: Duration,
        cancel: &CancelToken,
        noise: &mut Vec<String>,
    ) -> Result<Option<ResponseLine>, ProtoError> {
        let deadline = Instant::now() + timeout;
        let mut partial: Vec<u8> = Vec::new();
        let mut buf = [0u8; 256];

        loop {
            if cancel.is_cancelled() {
                return Err(ProtoError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let n = self.read_step(slot, &mut buf)?;
            for &byte in &buf[..n] {
                if byte == b'\n' {
                    let line = take_line(&mut partial);
                    if line.is_empty() {
                        continue;
                    }
                    match classify_line(&line) {
                        Some(resp) => {
                            self.push_rx(&resp.raw());
                            return Ok(Some(resp));
                        }
                        None => {
                            self.push_rx(&line);
                            noise.push(line);
                        }
                    }
                } else if byte != b'\r' {
                    push_bounded(&mut partial, byte);
                }
            }
        }
    }

    /// One bounded read. `Ok(0)` means no data this slice; disconnects and
    /// hard faults close the port and surface as `Io`.
    fn read_step(&self, slot: &mut PortSlot, buf: &mut [u8]) -> Result<usize, ProtoError> {
        let link = slot
            .link
            .as_mut()
            .ok_or_else(|| ProtoError::io("port", "not open"))?;
        match link.read_chunk(buf) {
            Ok(0) => {
                slot.link = None;
                slot.settings = None;
                Err(ProtoError::io("read", "device disconnected"))
            }
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => {
                slot.link = None;
                slot.settings = None;
                Err(ProtoError::io("read", e.to_string()))
            }
        }
    }

    fn push_tx(&self, text: &str) {
        if let Ok(mut trace) = self.trace.lock() {
            trace.push_tx(redact_command(text));
        }
    }

    fn push_rx(&self, text: &str) {
        if let Ok(mut trace) = self.trace.lock() {
            trace.push_rx(text.to_string());
        }
    }

    fn push_note(&self, text: String) {
        if let Ok(mut trace) = self.trace.lock() {
            trace.push_note(text);
        }
    }
}

fn describe(settings: &Option<PortSettings>) -> String {
    settings
        .as_ref()
        .map(|s| s.port.clone())
        .unwrap_or_else(|| "<none>".into())
}

fn take_line(partial: &mut Vec<u8>) -> String {
    let line = String::from_utf8_lossy(partial).to_string();
    partial.clear();
    line
}

fn push_bounded(partial: &mut Vec<u8>, byte: u8) {
    if partial.len() < LINE_MAX {
        partial.push(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::serial::testkit::{scripted_session, test_port as settings};
    use crate::io::serial::trace::TraceDir;
    use crate::io::serial::wire::testwire::ScriptEntry;

    fn cmd(text: &str, ms: u64) -> Command {
        Command::new(text, Duration::from_millis(ms))
    }

    #[tokio::test]
    async fn test_noise_lines_never_surface_as_result() {
        let (session, _) = scripted_session(vec![vec![ScriptEntry::new(
            "PING",
            &["[wifi] scanning channels", "I (321) boot: chatter", "@OK PONG"],
        )]]);

        let resp = session
            .exchange(&settings(), cmd("PING", 2000), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(resp, ResponseLine::Ok("PONG".into()));

        // Noise was kept for diagnostics.
        let trace = session.trace_render();
        assert!(trace.contains("[wifi] scanning channels"));
    }

    #[tokio::test]
    async fn test_timeout_when_no_protocol_line() {
        let (session, _) =
            scripted_session(vec![vec![ScriptEntry::new("GET CFG", &["just noise"])]]);

        let err = session
            .exchange(&settings(), cmd("GET CFG", 250), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        // Timeouts leave the port open.
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_boot_reset_race_resends_once() {
        // First GET INFO: only boot banner, then silence. The resend answers.
        let (session, probes) = scripted_session(vec![vec![
            ScriptEntry::new(
                "GET INFO",
                &["ets Jul 29 2019 12:21:46", "rst:0x1 (POWERON_RESET),boot:0x13"],
            ),
            ScriptEntry::new("GET INFO", &["@INFO {\"firmware_version\":\"1.4.0\"}"]),
        ]]);

        let resp = session
            .exchange(&settings(), cmd("GET INFO", 300), &CancelToken::new())
            .await
            .unwrap();
        assert!(matches!(resp, ResponseLine::Info(_)));
        assert_eq!(
            probes[0].writes(),
            vec!["GET INFO".to_string(), "GET INFO".to_string()]
        );
    }

    #[tokio::test]
    async fn test_boot_noise_without_response_resends_only_once() {
        let (session, probes) = scripted_session(vec![vec![
            ScriptEntry::new("GET INFO", &["rst:0x1 (POWERON_RESET),boot:0x13"]),
            ScriptEntry::new("GET INFO", &["rst:0x1 (POWERON_RESET),boot:0x13"]),
        ]]);

        let err = session
            .exchange(&settings(), cmd("GET INFO", 200), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(probes[0].writes().len(), 2);
    }

    #[tokio::test]
    async fn test_reboot_command_is_exempt_from_resend() {
        let (session, probes) = scripted_session(vec![vec![ScriptEntry::new(
            "REBOOT",
            &["rst:0x1 (POWERON_RESET),boot:0x13"],
        )]]);

        let err = session
            .exchange(&settings(), cmd("REBOOT", 200), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(probes[0].writes().len(), 1);
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_port_open() {
        let (session, _) = scripted_session(vec![vec![
            ScriptEntry::new("SET duco_miner_key k", &["@ERR unknown_key: duco_miner_key"]),
            ScriptEntry::new("PING", &["@OK PONG"]),
        ]]);

        let err = session
            .exchange(&settings(), cmd("SET duco_miner_key k", 1000), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_unknown_key());
        assert!(session.is_open());

        // Same handle still works.
        let resp = session
            .exchange(&settings(), cmd("PING", 1000), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(resp, ResponseLine::Ok("PONG".into()));
    }

    #[tokio::test]
    async fn test_io_failure_closes_port() {
        let (session, probes) = scripted_session(vec![
            vec![ScriptEntry::new("PING", &["@OK PONG"])],
            vec![ScriptEntry::new("PING", &["@OK PONG"])],
        ]);

        session
            .exchange(&settings(), cmd("PING", 1000), &CancelToken::new())
            .await
            .unwrap();
        assert!(session.is_open());

        probes[0].inject_read_failure();
        let err = session
            .exchange(&settings(), cmd("PING", 1000), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_io());
        assert!(!session.is_open());

        // Next command reopens cleanly on the second scripted wire.
        session
            .exchange(&settings(), cmd("PING", 1000), &CancelToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_handle_reused_across_commands() {
        let (session, probes) = scripted_session(vec![vec![
            ScriptEntry::new("HELLO", &["@OK HELLO"]),
            ScriptEntry::new("HELLO", &["@OK HELLO"]),
        ]]);

        for _ in 0..2 {
            session
                .exchange(&settings(), cmd("HELLO", 1000), &CancelToken::new())
                .await
                .unwrap();
        }
        // One open: buffers cleared exactly once.
        assert_eq!(probes[0].clear_count(), 1);
    }

    #[tokio::test]
    async fn test_port_switch_closes_old_handle() {
        let (session, _) = scripted_session(vec![
            vec![ScriptEntry::new("PING", &["@OK PONG"])],
            vec![ScriptEntry::new("PING", &["@OK PONG"])],
        ]);

        session
            .exchange(&settings(), cmd("PING", 1000), &CancelToken::new())
            .await
            .unwrap();

        let other = PortSettings::new("/dev/ttyUSB8", 115_200);
        session
            .exchange(&other, cmd("PING", 1000), &CancelToken::new())
            .await
            .unwrap();

        let trace = session.trace_render();
        assert!(trace.contains("switching port /dev/ttyUSB7 -> /dev/ttyUSB8"));
    }

    #[tokio::test]
    async fn test_secret_never_reaches_trace() {
        let secret = "topsecretpassword";
        let line = format!("SET wifi_pass {}", secret);
        let (session, _) = scripted_session(vec![vec![ScriptEntry::new(&line, &["@OK SET"])]]);

        session
            .exchange(&settings(), cmd(&line, 1000), &CancelToken::new())
            .await
            .unwrap();

        let trace = session.trace_render();
        assert!(!trace.contains(secret));
        assert!(trace.contains("SET wifi_pass ***word"));
    }

    #[tokio::test]
    async fn test_cancel_during_read_returns_cancelled() {
        let (session, _) = scripted_session(vec![vec![ScriptEntry::new("PING", &[])]]);
        let cancel = CancelToken::new();
        let cancel_bg = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_bg.cancel();
        });

        let err = session
            .exchange(&settings(), cmd("PING", 10_000), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_burst_read_stops_on_silence() {
        let (session, _) = scripted_session(vec![vec![ScriptEntry::new(
            "LOG_DUMP",
            &["line one", "line two"],
        )]]);

        let text = session
            .read_burst(
                &settings(),
                "LOG_DUMP",
                Duration::from_millis(150),
                Duration::from_secs(5),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert!(text.contains("line one"));
        assert!(text.contains("line two"));
    }

    #[tokio::test]
    async fn test_burst_read_err_line_raises() {
        let (session, _) = scripted_session(vec![vec![ScriptEntry::new(
            "LOG_DUMP",
            &["some output", "@ERR log_locked"],
        )]]);

        let err = session
            .read_burst(
                &settings(),
                "LOG_DUMP",
                Duration::from_millis(200),
                Duration::from_secs(5),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtoError::Protocol { ref reason, .. } if reason == "log_locked"));
    }

    #[tokio::test]
    async fn test_capture_lines_are_timestamped() {
        let (session, probes) = scripted_session(vec![vec![]]);
        probes[0].push_unsolicited(&["boot message A", "boot message B"]);

        let lines = session
            .capture_lines(&settings(), Duration::from_millis(150), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("boot message A"));
        // Timestamp prefix present (HH:MM:SS.mmm).
        assert!(lines[0].chars().nth(2) == Some(':'));
    }

    #[tokio::test]
    async fn test_last_response_records_raw_line() {
        let (session, _) =
            scripted_session(vec![vec![ScriptEntry::new("PING", &["@OK PONG"])]]);
        session
            .exchange(&settings(), cmd("PING", 1000), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(session.last_response().as_deref(), Some("@OK PONG"));
    }

    #[test]
    fn test_trace_records_directions() {
        let mut trace = TraceBuffer::new();
        trace.push_tx("PING".into());
        trace.push_rx("@OK PONG".into());
        let snap = trace.snapshot();
        assert_eq!(snap[0].dir, TraceDir::Tx);
        assert_eq!(snap[1].dir, TraceDir::Rx);
    }
}
