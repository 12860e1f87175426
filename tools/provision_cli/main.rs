// Headless driver for the Wisp provisioning engine.
//
// Exercises the same engine the desktop app uses: port discovery, single
// protocol operations, config sync, and the full wizard. Ctrl+C requests
// cooperative cancellation of whatever is in flight.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use wisp_setup::api_check::HttpKeyValidator;
use wisp_setup::flasher::EspflashFlasher;
use wisp_setup::io::proto::client::ProtocolClient;
use wisp_setup::sync::{ConfigSync, SyncOptions};
use wisp_setup::tlog;
use wisp_setup::wizard::{steps::StepContext, SessionState, StepStatus, Wizard};
use wisp_setup::{
    ports, support, AppSettings, CancelToken, DeviceConfig, PortSettings, TransportSession,
};

#[derive(Parser)]
#[command(name = "provision_cli", about = "Wisp provisioning engine CLI")]
struct Cli {
    /// Serial port (defaults to the best-scored candidate)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate override
    #[arg(long, global = true)]
    baud: Option<u32>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// List candidate serial ports, best first
    Ports,
    /// HELLO handshake
    Hello,
    /// Fetch device identity (GET INFO)
    Info,
    /// Fetch the persisted device config (GET CFG)
    Cfg,
    /// Pull the device's log buffer (LOG_DUMP)
    Dump,
    /// Send a device config JSON file and verify it persisted
    Send {
        /// Path to a DeviceConfig JSON file
        #[arg(long)]
        config: PathBuf,
        /// Capture the post-reboot boot log
        #[arg(long)]
        capture_boot_log: bool,
    },
    /// Run the full setup wizard headless
    Wizard {
        /// Path to a DeviceConfig JSON file
        #[arg(long)]
        config: PathBuf,
        /// Firmware image for the flash step (skipped when absent)
        #[arg(long)]
        firmware: Option<PathBuf>,
        /// Skip steps that fail but declare themselves skippable
        #[arg(long)]
        skip_on_failure: bool,
    },
    /// Write a support bundle from the current settings and given logs
    Support {
        /// Path to a DeviceConfig JSON file to include (masked)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show saved settings, or update the default port
    Settings {
        /// Remember this port as the default
        #[arg(long)]
        set_default_port: Option<String>,
    },
}

fn resolve_port(cli_port: &Option<String>, settings: &AppSettings) -> Result<String, String> {
    if let Some(port) = cli_port {
        return Ok(port.clone());
    }
    if let Some(port) = &settings.default_port {
        return Ok(port.clone());
    }
    ports::best_port()
        .map(|c| c.port_name)
        .ok_or_else(|| "No serial ports found. Plug the Wisp in or pass --port.".to_string())
}

fn load_config(path: &PathBuf) -> Result<DeviceConfig, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid config JSON: {}", e))
}

fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tlog!("[cli] cancellation requested");
            handle.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let settings = AppSettings::load();
    let _ = wisp_setup::logging::init_file_logging(&settings.reports_dir());

    let exit_code = match run(cli, settings).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {}", e);
            1
        }
    };
    wisp_setup::logging::stop_file_logging();
    std::process::exit(exit_code);
}

async fn run(cli: Cli, settings: AppSettings) -> Result<(), String> {
    match &cli.command {
        CliCommand::Ports => {
            for c in ports::list_ports()? {
                println!(
                    "{:<28} {:<10} score {:<4} {}",
                    c.port_name,
                    c.port_type,
                    c.score,
                    c.product.as_deref().unwrap_or("-")
                );
            }
            return Ok(());
        }
        CliCommand::Settings { set_default_port } => {
            let mut settings = settings;
            if let Some(port) = set_default_port {
                settings.default_port = Some(port.clone());
                settings.save()?;
                println!("saved to {}", AppSettings::settings_path().display());
            } else {
                println!(
                    "{}",
                    toml::to_string_pretty(&settings).map_err(|e| e.to_string())?
                );
            }
            return Ok(());
        }
        _ => {}
    }

    let port_name = resolve_port(&cli.port, &settings)?;
    let baud = cli.baud.unwrap_or(settings.baud_rate);
    let port = PortSettings::new(port_name, baud);
    let transport = TransportSession::new_system();
    let client =
        ProtocolClient::with_timeout(transport.clone(), port.clone(), settings.command_timeout());
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        CliCommand::Ports | CliCommand::Settings { .. } => unreachable!("handled above"),
        CliCommand::Hello => {
            client.hello(&cancel).await.map_err(|e| e.to_string())?;
            println!("device answered HELLO on {}", port.port);
        }
        CliCommand::Info => {
            let info = client
                .get_info(settings.command_timeout(), &cancel)
                .await
                .map_err(|e| e.to_string())?;
            println!("{}", serde_json::to_string_pretty(&info).unwrap_or_default());
        }
        CliCommand::Cfg => {
            let cfg = client
                .get_config_json(&cancel)
                .await
                .map_err(|e| e.to_string())?;
            println!("{}", serde_json::to_string_pretty(&cfg).unwrap_or_default());
        }
        CliCommand::Dump => {
            let text = client.log_dump(&cancel).await.map_err(|e| e.to_string())?;
            print!("{}", text);
        }
        CliCommand::Send {
            config,
            capture_boot_log,
        } => {
            let device_config = load_config(&config)?;
            let opts = SyncOptions {
                capture_boot_log: capture_boot_log || settings.capture_boot_log,
                ..SyncOptions::default()
            };
            let report = ConfigSync::new(&client)
                .send_config(&device_config, &opts, &cancel)
                .await
                .map_err(|e| e.to_string())?;
            println!("{}", report.message);
            if let Some(log) = &report.boot_log {
                for line in log {
                    println!("  {}", line);
                }
            }
            if !report.success {
                return Err("configuration verification failed".to_string());
            }
        }
        CliCommand::Wizard {
            config,
            firmware,
            skip_on_failure,
        } => {
            let device_config = load_config(&config)?;
            let ctx = StepContext {
                transport: transport.clone(),
                retry: settings.retry_policy(),
                command_timeout: settings.command_timeout(),
                sync_options: SyncOptions {
                    capture_boot_log: settings.capture_boot_log,
                    ..SyncOptions::default()
                },
                flasher: Box::new(EspflashFlasher::new(settings.reports_dir())),
                validator: Box::new(HttpKeyValidator::new()),
            };
            let session = SessionState {
                port: Some(port.clone()),
                config: device_config,
                firmware_image: firmware,
                ..SessionState::default()
            };
            run_wizard(Wizard::new(ctx, session), skip_on_failure, &cancel).await?;
        }
        CliCommand::Support { config } => {
            let masked = match config {
                Some(path) => Some(load_config(&path)?.masked()),
                None => None,
            };
            let bundle = support::write_support_bundle(
                &settings.reports_dir(),
                &support::SupportInputs {
                    masked_config: masked.as_ref(),
                    last_protocol_response: transport.last_response(),
                    last_info_json: client.last_info_json(),
                    device_log: None,
                    wire_trace: Some(transport.trace_render()),
                    log_files: vec![],
                },
            )?;
            println!("support bundle: {}", bundle.dir.display());
        }
    }
    Ok(())
}

async fn run_wizard(
    mut wizard: Wizard,
    skip_on_failure: bool,
    cancel: &CancelToken,
) -> Result<(), String> {
    while !wizard.is_finished() {
        let step = wizard.current_step().clone();
        println!(
            "[{}/{}] {} — {}",
            step.index,
            wizard.step_count(),
            step.title,
            step.description
        );

        let result = wizard.execute_current(cancel).await;
        match result.status {
            StepStatus::Success | StepStatus::Skipped => {
                if let Some(guidance) = &result.guidance {
                    println!("    {}", guidance);
                }
            }
            StepStatus::Cancelled => return Err("cancelled".to_string()),
            StepStatus::Failed => {
                let message = result.error_message.unwrap_or_else(|| "failed".to_string());
                if result.can_skip && skip_on_failure {
                    println!("    {} — skipping", message);
                    wizard
                        .skip_current()
                        .map_err(|e| format!("cannot skip: {}", e))?;
                } else {
                    if let Some(guidance) = &result.guidance {
                        eprintln!("    hint: {}", guidance);
                    }
                    return Err(format!("step '{}' failed: {}", step.title, message));
                }
            }
        }
    }
    println!("setup finished");
    Ok(())
}
