//! The RPC envelope exchanged between the host and a sandboxed worker.
//!
//! One envelope per message, in both directions. Requests carry a fresh
//! random id; responses echo it. The envelope is the only shape that crosses
//! the trust boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    /// Host → worker: invoke a named hook.
    Hook,
    /// Worker → host: request an effectful operation.
    SysCall,
    /// Successful reply to a HOOK or SYS_CALL, echoing its id.
    Response,
    /// Failed reply to a HOOK or SYS_CALL, echoing its id.
    Error,
    /// Host → worker: runtime context after the ready signal.
    Init,
    /// Worker → host: sandbox finished booting.
    SandboxReady,
}

/// Error shape carried inside an `Error` envelope.
///
/// `stack` is populated only in development mode and only for host-side
/// logging; the bridge strips it before an envelope crosses the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl WireError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Copy with the stack removed. Applied to every envelope before it is
    /// written to a worker or forwarded from one.
    pub fn redacted(&self) -> Self {
        Self {
            code: self.code.clone(),
            message: self.message.clone(),
            stack: None,
        }
    }
}

/// A single framed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Milliseconds since the Unix epoch at creation time.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Envelope {
    fn base(kind: EnvelopeKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: chrono::Utc::now().timestamp_millis(),
            method: None,
            payload: None,
            result: None,
            error: None,
        }
    }

    /// New hook invocation with a fresh id.
    pub fn hook(method: impl Into<String>, payload: Value) -> Self {
        let mut env = Self::base(EnvelopeKind::Hook);
        env.method = Some(method.into());
        env.payload = Some(payload);
        env
    }

    /// New sys-call request with a fresh id.
    pub fn sys_call(method: impl Into<String>, payload: Value) -> Self {
        let mut env = Self::base(EnvelopeKind::SysCall);
        env.method = Some(method.into());
        env.payload = Some(payload);
        env
    }

    /// Successful response echoing `request_id`.
    pub fn response(request_id: Uuid, result: Value) -> Self {
        let mut env = Self::base(EnvelopeKind::Response);
        env.id = request_id;
        env.result = Some(result);
        env
    }

    /// Failed response echoing `request_id`. The error is redacted: no stack
    /// text ever leaves the host.
    pub fn error(request_id: Uuid, error: &WireError) -> Self {
        let mut env = Self::base(EnvelopeKind::Error);
        env.id = request_id;
        env.error = Some(error.redacted());
        env
    }

    /// INIT message delivering runtime context to a freshly booted worker.
    pub fn init(payload: Value) -> Self {
        let mut env = Self::base(EnvelopeKind::Init);
        env.payload = Some(payload);
        env
    }

    pub fn sandbox_ready() -> Self {
        Self::base(EnvelopeKind::SandboxReady)
    }

    /// True for the two terminal reply kinds.
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, EnvelopeKind::Response | EnvelopeKind::Error)
    }
}
