// Support bundle writer.
//
// Collects what a support request needs into one timestamped directory:
// masked device config, the engine's last protocol responses, device log
// text, and a JSON manifest. Consumes only masked data — raw secrets never
// reach this module.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::DeviceConfig;

#[derive(Clone, Debug)]
pub struct SupportBundle {
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
}

/// Inputs for a bundle. All device-derived fields are optional: a bundle for
/// a device that never connected is still useful.
#[derive(Default)]
pub struct SupportInputs<'a> {
    /// Masked copy of the config (see `DeviceConfig::masked`).
    pub masked_config: Option<&'a DeviceConfig>,
    pub last_protocol_response: Option<String>,
    pub last_info_json: Option<String>,
    pub device_log: Option<&'a str>,
    pub wire_trace: Option<String>,
    /// Existing log files to reference (not copied) in the manifest.
    pub log_files: Vec<PathBuf>,
}

#[derive(Serialize)]
struct Manifest {
    created: String,
    engine_version: String,
    files: Vec<String>,
    log_files: Vec<String>,
    last_protocol_response: Option<String>,
    last_info_json: Option<String>,
}

/// Write a support bundle under `reports_dir`, returning its location.
pub fn write_support_bundle(
    reports_dir: &Path,
    inputs: &SupportInputs<'_>,
) -> Result<SupportBundle, String> {
    let dir = reports_dir.join(format!(
        "support-{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));
    std::fs::create_dir_all(&dir).map_err(|e| format!("Failed to create bundle dir: {}", e))?;

    let mut files = Vec::new();

    if let Some(cfg) = inputs.masked_config {
        let path = dir.join("config.json");
        let text = serde_json::to_string_pretty(cfg)
            .map_err(|e| format!("Failed to encode config: {}", e))?;
        std::fs::write(&path, text).map_err(|e| format!("Failed to write config: {}", e))?;
        files.push("config.json".to_string());
    }

    if let Some(log) = inputs.device_log {
        let path = dir.join("device.log");
        std::fs::write(&path, log).map_err(|e| format!("Failed to write device log: {}", e))?;
        files.push("device.log".to_string());
    }

    if let Some(trace) = &inputs.wire_trace {
        let path = dir.join("wire-trace.log");
        std::fs::write(&path, trace).map_err(|e| format!("Failed to write trace: {}", e))?;
        files.push("wire-trace.log".to_string());
    }

    let manifest = Manifest {
        created: chrono::Local::now().to_rfc3339(),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        files,
        log_files: inputs
            .log_files
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect(),
        last_protocol_response: inputs.last_protocol_response.clone(),
        last_info_json: inputs.last_info_json.clone(),
    };

    let manifest_path = dir.join("manifest.json");
    let text = serde_json::to_string_pretty(&manifest)
        .map_err(|e| format!("Failed to encode manifest: {}", e))?;
    std::fs::write(&manifest_path, text)
        .map_err(|e| format!("Failed to write manifest: {}", e))?;

    tlog!("[support] bundle written to {}", dir.display());
    Ok(SupportBundle { dir, manifest_path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    #[test]
    fn test_bundle_contains_masked_config_and_manifest() {
        let tmp = std::env::temp_dir().join(format!("wisp-bundle-test-{}", std::process::id()));
        let cfg = DeviceConfig {
            wifi_pass: "realsecretpw".into(),
            ..DeviceConfig::default()
        };
        let masked = cfg.masked();

        let bundle = write_support_bundle(
            &tmp,
            &SupportInputs {
                masked_config: Some(&masked),
                last_protocol_response: Some("@OK SAVE".into()),
                last_info_json: None,
                device_log: Some("boot ok\n"),
                wire_trace: None,
                log_files: vec![],
            },
        )
        .unwrap();

        let config_text = std::fs::read_to_string(bundle.dir.join("config.json")).unwrap();
        assert!(!config_text.contains("realsecretpw"));

        let manifest_text = std::fs::read_to_string(&bundle.manifest_path).unwrap();
        assert!(manifest_text.contains("@OK SAVE"));
        assert!(manifest_text.contains("device.log"));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
