// Serial port enumeration and candidate scoring.
//
// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
// The cu (calling unit) devices are non-blocking and preferred for outgoing
// connections. The tty (terminal) devices block on open waiting for carrier
// detect.

use serde::Serialize;

/// USB vendor IDs of the serial bridges Wisp boards ship with.
const VID_SILABS: u16 = 0x10C4; // CP210x
const VID_WCH: u16 = 0x1A86; // CH340/CH9102
const VID_ESPRESSIF: u16 = 0x303A; // native USB

/// Information about an available serial port, plus a heuristic score of how
/// likely it is to be a Wisp.
#[derive(Clone, Debug, Serialize)]
pub struct PortCandidate {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub score: u32,
}

fn score_port(port_type: &str, vid: Option<u16>, product: Option<&str>) -> u32 {
    let mut score = 0;
    if port_type == "USB" {
        score += 10;
    }
    match vid {
        Some(VID_ESPRESSIF) => score += 40,
        Some(VID_SILABS) | Some(VID_WCH) => score += 30,
        Some(_) => score += 5,
        None => {}
    }
    if let Some(product) = product {
        let product = product.to_ascii_lowercase();
        if product.contains("cp210") || product.contains("ch340") || product.contains("ch9102") {
            score += 10;
        }
        if product.contains("wisp") {
            score += 50;
        }
    }
    score
}

/// List available serial ports, best candidates first.
pub fn list_ports() -> Result<Vec<PortCandidate>, String> {
    let ports =
        serialport::available_ports().map_err(|e| format!("Failed to enumerate ports: {}", e))?;

    let mut candidates: Vec<PortCandidate> = ports
        .into_iter()
        // On macOS, filter out /dev/tty.* devices - only show /dev/cu.* (calling unit)
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => {
                    ("PCI".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None, None)
                }
            };
            let score = score_port(&port_type, vid, product.as_deref());
            PortCandidate {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
                score,
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.port_name.cmp(&b.port_name)));
    Ok(candidates)
}

/// The most plausible Wisp port, if any port is present at all.
pub fn best_port() -> Option<PortCandidate> {
    list_ports().ok()?.into_iter().next()
}
