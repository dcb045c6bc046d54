//! Stable error codes and the cross-boundary error object.
//!
//! Errors that cross the sandbox boundary or reach an HTTP client are reduced
//! to a `code` + `message` pair. Stack detail stays on the host side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error code strings.
///
/// These are part of the wire contract: plugins and HTTP clients match on
/// them, so they never change once shipped.
pub mod codes {
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const HOOK_TIMEOUT: &str = "HOOK_TIMEOUT";
    pub const HOOK_ERROR: &str = "HOOK_ERROR";
    pub const SANDBOX_READY_TIMEOUT: &str = "SANDBOX_READY_TIMEOUT";
    pub const INIT_FAILED: &str = "INIT_FAILED";
    pub const WORKER_STOPPED: &str = "WORKER_STOPPED";
    pub const SYSCALL_RATE_LIMITED: &str = "SYSCALL_RATE_LIMITED";
    pub const UNKNOWN_SYSCALL: &str = "UNKNOWN_SYSCALL";
    pub const SIGNATURE_MISMATCH: &str = "SIGNATURE_MISMATCH";
}

/// A coded error as seen by plugins and HTTP clients.
///
/// This is the only error shape allowed across the trust boundary: a stable
/// code and a human-readable message. Anything richer (stack traces, source
/// chains) is logged host-side and stripped before forwarding.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

impl ErrorObject {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Box an uncoded plugin failure as `HOOK_ERROR`, preserving the message.
    pub fn hook_error(message: impl Into<String>) -> Self {
        Self::new(codes::HOOK_ERROR, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(codes::PERMISSION_DENIED, message)
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}
