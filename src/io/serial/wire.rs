// Physical wire seam.
//
// `WireLink` is the narrow surface the transport needs from a serial port:
// short bounded reads, buffered writes, and a buffer purge. The production
// implementation wraps the `serialport` crate; tests script the wire.

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::io::error::ProtoError;

/// Per-read timeout on the underlying port. Short so the transport's
/// wall-clock deadline and cancel flag are checked often; `TimedOut` from a
/// read simply means "no bytes yet".
pub const READ_SLICE: Duration = Duration::from_millis(50);

pub trait WireLink: Send {
    /// Read whatever is available, bounded by the port's short read timeout.
    /// `Err(TimedOut)` means no data; `Ok(0)` means the device disconnected.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Discard any buffered input and output.
    fn clear_buffers(&mut self) -> io::Result<()>;
}

struct SerialWire {
    port: Box<dyn serialport::SerialPort>,
}

impl WireLink for SerialWire {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

/// Open a physical serial port as a `WireLink`. 8N1 framing; the short read
/// timeout keeps the transport's read loop responsive.
pub fn open_serial_link(port_name: &str, baud: u32) -> Result<Box<dyn WireLink>, ProtoError> {
    let port = serialport::new(port_name, baud)
        .timeout(READ_SLICE)
        .open()
        .map_err(|e| ProtoError::io(port_name, e.to_string()))?;
    Ok(Box::new(SerialWire { port }))
}

// ============================================================================
// Scripted wire for tests
// ============================================================================

#[cfg(test)]
pub mod testwire {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    /// One scripted exchange: when a line equal to `expect` is written, the
    /// given response bytes become readable after `delay`.
    pub struct ScriptEntry {
        pub expect: String,
        pub respond: Vec<String>,
        pub delay: Duration,
    }

    impl ScriptEntry {
        pub fn new(expect: &str, respond: &[&str]) -> Self {
            Self {
                expect: expect.to_string(),
                respond: respond.iter().map(|s| s.to_string()).collect(),
                delay: Duration::ZERO,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[derive(Default)]
    struct WireState {
        script: VecDeque<ScriptEntry>,
        /// Bytes readable now.
        inbound: VecDeque<u8>,
        /// Bytes readable once `ready_at` passes.
        pending: VecDeque<(Instant, Vec<u8>)>,
        writes: Vec<String>,
        clears: usize,
        /// When set, the next read fails hard (I/O fault injection).
        fail_reads: bool,
    }

    /// Shared handle letting a test inspect the wire after the transport has
    /// consumed the link.
    #[derive(Clone, Default)]
    pub struct WireProbe {
        state: Arc<Mutex<WireState>>,
    }

    impl WireProbe {
        pub fn writes(&self) -> Vec<String> {
            self.state.lock().unwrap().writes.clone()
        }

        pub fn clear_count(&self) -> usize {
            self.state.lock().unwrap().clears
        }

        pub fn inject_read_failure(&self) {
            self.state.lock().unwrap().fail_reads = true;
        }

        /// Queue unsolicited lines (device chatter). Queued as pending so an
        /// open-time buffer purge does not discard them.
        pub fn push_unsolicited(&self, lines: &[&str]) {
            let mut state = self.state.lock().unwrap();
            let mut bytes = Vec::new();
            for line in lines {
                bytes.extend(line.bytes());
                bytes.extend(b"\r\n");
            }
            state.pending.push_back((Instant::now(), bytes));
        }
    }

    pub struct ScriptedWire {
        state: Arc<Mutex<WireState>>,
    }

    impl ScriptedWire {
        pub fn new(script: Vec<ScriptEntry>) -> (Self, WireProbe) {
            let probe = WireProbe {
                state: Arc::new(Mutex::new(WireState {
                    script: script.into(),
                    ..WireState::default()
                })),
            };
            (
                Self {
                    state: probe.state.clone(),
                },
                probe,
            )
        }
    }

    impl WireLink for ScriptedWire {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.state.lock().unwrap();
            if state.fail_reads {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "wire dropped"));
            }
            // Promote matured pending bytes.
            let now = Instant::now();
            loop {
                let matured = matches!(state.pending.front(), Some((ready_at, _)) if *ready_at <= now);
                if !matured {
                    break;
                }
                if let Some((_, bytes)) = state.pending.pop_front() {
                    state.inbound.extend(bytes);
                }
            }
            if state.inbound.is_empty() {
                drop(state);
                // Pace the polling loop like a real port read timeout would.
                std::thread::sleep(Duration::from_millis(2));
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let mut n = 0;
            while n < buf.len() {
                match state.inbound.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            let text = String::from_utf8_lossy(bytes).trim_end().to_string();
            let mut state = self.state.lock().unwrap();
            state.writes.push(text.clone());
            if let Some(front) = state.script.front() {
                if front.expect == text {
                    let entry = state.script.pop_front().unwrap();
                    let mut bytes = Vec::new();
                    for line in &entry.respond {
                        bytes.extend(line.as_bytes());
                        bytes.extend(b"\r\n");
                    }
                    if entry.delay.is_zero() {
                        state.inbound.extend(bytes);
                    } else {
                        let at = Instant::now() + entry.delay;
                        state.pending.push_back((at, bytes));
                    }
                }
            }
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn clear_buffers(&mut self) -> io::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.clears += 1;
            state.inbound.clear();
            Ok(())
        }
    }
}
