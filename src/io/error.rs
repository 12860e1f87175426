// Error taxonomy for the device protocol engine.
//
// Expected failures (timeouts, @ERR responses, malformed payloads) travel as
// values through the protocol and workflow layers; only programming errors
// panic. `Cancelled` is never retried; `Io` forces the port closed before the
// next attempt; `Timeout` and `Protocol` leave the port open.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// No protocol-prefixed line arrived within the deadline.
    Timeout { context: String, waited_ms: u64 },
    /// The device answered `@ERR <reason>`. The port stays open.
    Protocol { reason: String, raw: String },
    /// A protocol line arrived but not the one the operation expected.
    Unexpected { expected: &'static str, got: String },
    /// A payload (usually JSON) failed to parse.
    Parse { context: &'static str, detail: String },
    /// The operator cancelled the operation.
    Cancelled,
    /// Port open/read/write fault. The port is closed before the next command.
    Io { context: String, detail: String },
    /// Caller misuse (bad retry policy, missing port, ...).
    Configuration(String),
}

impl ProtoError {
    pub fn timeout(context: impl Into<String>, waited_ms: u64) -> Self {
        ProtoError::Timeout {
            context: context.into(),
            waited_ms,
        }
    }

    pub fn protocol(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        ProtoError::Protocol {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    pub fn unexpected(expected: &'static str, got: impl Into<String>) -> Self {
        ProtoError::Unexpected {
            expected,
            got: got.into(),
        }
    }

    pub fn parse(context: &'static str, detail: impl Into<String>) -> Self {
        ProtoError::Parse {
            context,
            detail: detail.into(),
        }
    }

    pub fn io(context: impl Into<String>, detail: impl Into<String>) -> Self {
        ProtoError::Io {
            context: context.into(),
            detail: detail.into(),
        }
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        ProtoError::Configuration(detail.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProtoError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtoError::Timeout { .. })
    }

    pub fn is_io(&self) -> bool {
        matches!(self, ProtoError::Io { .. })
    }

    /// True for `@ERR unknown_key: ...` responses, the compatibility-fallback
    /// signal from older firmware.
    pub fn is_unknown_key(&self) -> bool {
        matches!(self, ProtoError::Protocol { reason, .. } if reason.starts_with("unknown_key"))
    }
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtoError::Timeout { context, waited_ms } => {
                write!(f, "timeout after {}ms ({})", waited_ms, context)
            }
            ProtoError::Protocol { reason, .. } => write!(f, "device error: {}", reason),
            ProtoError::Unexpected { expected, got } => {
                write!(f, "unexpected response (wanted {}, got {:?})", expected, got)
            }
            ProtoError::Parse { context, detail } => {
                write!(f, "malformed {} payload: {}", context, detail)
            }
            ProtoError::Cancelled => write!(f, "cancelled"),
            ProtoError::Io { context, detail } => write!(f, "io failure ({}): {}", context, detail),
            ProtoError::Configuration(detail) => write!(f, "configuration error: {}", detail),
        }
    }
}

impl std::error::Error for ProtoError {}
