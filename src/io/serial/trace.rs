// Rolling diagnostic trace of wire traffic.
//
// Every line written to or read from the port lands here (commands already
// redacted), so boot-reset detection and support bundles have raw material
// without a second read of the wire.

use std::collections::VecDeque;

use crate::io::now_us;

/// Entries kept before the oldest are dropped.
const TRACE_CAP: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceDir {
    Tx,
    Rx,
    Note,
}

#[derive(Clone, Debug)]
pub struct TraceEntry {
    pub timestamp_us: u64,
    pub dir: TraceDir,
    pub text: String,
}

#[derive(Default)]
pub struct TraceBuffer {
    entries: VecDeque<TraceEntry>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, dir: TraceDir, text: String) {
        if self.entries.len() >= TRACE_CAP {
            self.entries.pop_front();
        }
        self.entries.push_back(TraceEntry {
            timestamp_us: now_us(),
            dir,
            text,
        });
    }

    /// Record an outbound command line. The caller must redact first; this
    /// type never sees raw secrets.
    pub fn push_tx(&mut self, redacted: String) {
        self.push(TraceDir::Tx, redacted);
    }

    pub fn push_rx(&mut self, text: String) {
        self.push(TraceDir::Rx, text);
    }

    pub fn push_note(&mut self, text: String) {
        self.push(TraceDir::Note, text);
    }

    pub fn snapshot(&self) -> Vec<TraceEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Render the trace as text for log files / support bundles.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let tag = match entry.dir {
                TraceDir::Tx => ">>",
                TraceDir::Rx => "<<",
                TraceDir::Note => "--",
            };
            out.push_str(&format!("{} {} {}\n", entry.timestamp_us, tag, entry.text));
        }
        out
    }
}
