// Firmware flashing collaborator.
//
// Flashing is a subprocess concern (espflash drives the ESP32 serial
// bootloader); the engine only needs the outcome and a log artifact. The
// trait seam keeps the wizard testable without hardware. The transport must
// release the port before flashing starts; the engine assumes the port is
// free again afterwards.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;

#[derive(Clone, Debug)]
pub struct FlashRequest {
    pub port: String,
    pub baud: u32,
    pub erase: bool,
    pub image_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct FlashOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub log_path: Option<PathBuf>,
    pub message: String,
}

impl FlashOutcome {
    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: None,
            log_path: None,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Flasher: Send + Sync {
    async fn flash(&self, req: &FlashRequest, cancel: &CancelToken) -> FlashOutcome;
}

/// sha256 of a firmware image, for flash logs and support bundles.
pub fn sha256_file(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("read {}: {}", path.display(), e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Drives the `espflash` CLI. Erase (when requested) and flash run as two
/// invocations; combined output lands in a timestamped log file under the
/// reports directory.
pub struct EspflashFlasher {
    pub tool_path: String,
    pub reports_dir: PathBuf,
}

impl EspflashFlasher {
    pub fn new(reports_dir: PathBuf) -> Self {
        Self {
            tool_path: "espflash".to_string(),
            reports_dir,
        }
    }

    async fn run_tool(
        &self,
        args: &[&str],
        cancel: &CancelToken,
    ) -> Result<(Option<i32>, String), String> {
        let mut cmd = tokio::process::Command::new(&self.tool_path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| format!("failed to launch {}: {}", self.tool_path, e))?;

        tokio::select! {
            output = child.wait_with_output() => {
                let output = output.map_err(|e| format!("{} failed: {}", self.tool_path, e))?;
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok((output.status.code(), text))
            }
            _ = cancel.cancelled() => {
                // kill_on_drop reaps the child when the future is dropped.
                Err("flash cancelled".to_string())
            }
        }
    }
}

#[async_trait]
impl Flasher for EspflashFlasher {
    async fn flash(&self, req: &FlashRequest, cancel: &CancelToken) -> FlashOutcome {
        if !req.image_path.exists() {
            return FlashOutcome::error(format!(
                "firmware image not found: {}",
                req.image_path.display()
            ));
        }
        match sha256_file(&req.image_path) {
            Ok(digest) => tlog!(
                "[flash] image {} sha256={}",
                req.image_path.display(),
                digest
            ),
            Err(e) => return FlashOutcome::error(e),
        }

        let mut log = String::new();
        let baud = req.baud.to_string();

        if req.erase {
            tlog!("[flash] erasing flash on {}", req.port);
            match self
                .run_tool(&["erase-flash", "--port", &req.port], cancel)
                .await
            {
                Ok((code, text)) => {
                    log.push_str(&text);
                    if code != Some(0) {
                        return self.finish(req, false, code, log, "flash erase failed");
                    }
                }
                Err(e) => return FlashOutcome::error(e),
            }
        }

        let image = req.image_path.to_string_lossy().to_string();
        tlog!("[flash] writing {} to {} @ {}", image, req.port, baud);
        match self
            .run_tool(
                &["flash", "--port", &req.port, "--baud", &baud, &image],
                cancel,
            )
            .await
        {
            Ok((code, text)) => {
                log.push_str(&text);
                let success = code == Some(0);
                let message = if success {
                    "firmware flashed"
                } else {
                    "espflash exited with an error"
                };
                self.finish(req, success, code, log, message)
            }
            Err(e) => FlashOutcome::error(e),
        }
    }
}

impl EspflashFlasher {
    fn finish(
        &self,
        req: &FlashRequest,
        success: bool,
        exit_code: Option<i32>,
        log: String,
        message: &str,
    ) -> FlashOutcome {
        let log_path = self.write_log(&req.port, &log);
        FlashOutcome {
            success,
            exit_code,
            log_path,
            message: message.to_string(),
        }
    }

    fn write_log(&self, port: &str, log: &str) -> Option<PathBuf> {
        if std::fs::create_dir_all(&self.reports_dir).is_err() {
            return None;
        }
        let name = format!(
            "{}-flash.log",
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        );
        let path = self.reports_dir.join(name);
        let body = format!("port: {}\n\n{}", port, log);
        match std::fs::write(&path, body) {
            Ok(()) => Some(path),
            Err(e) => {
                tlog!("[flash] failed to write flash log: {}", e);
                None
            }
        }
    }
}
