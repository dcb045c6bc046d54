//! Permission grants as declared in a plugin manifest.
//!
//! Grants are deserialized from the manifest's `permissions` object. An
//! absent sub-grant means that entire capability family is denied; the guard
//! in `frontclaw-permissions` enforces that fail-closed reading.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The full permission block of one manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionGrants {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<DbGrant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkGrant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmGrant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiGrant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<SocketGrant>,
    /// Skill names this plugin may invoke: `name`, `plugin__name`, or
    /// `plugin__*`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryGrant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogGrant>,
}

/// Database table access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbGrant {
    /// Allowed table names; `"*"` grants every table.
    pub tables: Vec<String>,
    pub access: DbAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbAccess {
    #[serde(rename = "read-only")]
    ReadOnly,
    #[serde(rename = "read-write")]
    ReadWrite,
}

/// Outbound network access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkGrant {
    /// Exact hosts or `*.suffix` wildcard entries.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub allow_all: bool,
}

/// Participation in the LLM request pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmGrant {
    #[serde(default)]
    pub can_intercept_task: bool,
    #[serde(default)]
    pub can_modify_prompt: bool,
    #[serde(default)]
    pub can_modify_system_message: bool,
    #[serde(default)]
    pub can_modify_response: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_request: Option<u32>,
}

/// HTTP routes the plugin may serve under its mount point.
///
/// A route spec is `"<VERBS> <pattern>"` (comma-separated verbs) or just a
/// pattern. A pattern ending in `/*` matches any suffix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiGrant {
    #[serde(default)]
    pub routes: Vec<String>,
    /// Fallback verb list for route specs without their own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
}

/// Socket event participation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocketGrant {
    #[serde(default)]
    pub can_intercept: bool,
    #[serde(default)]
    pub can_emit: bool,
    /// Event names the plugin sees; `"*"` for all.
    #[serde(default)]
    pub events: Vec<String>,
}

/// Memory key-space access. Entries are exact keys, `prefix:*` patterns, or
/// `"*"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryGrant {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
}

/// Host-logger access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogGrant {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub levels: Vec<LogLevel>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl PermissionGrants {
    /// Serialize the grants for delivery to the sandbox in the INIT payload.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }

    /// Grants used by built-in host plugins and tests: everything allowed.
    pub fn allow_all() -> Self {
        Self {
            db: Some(DbGrant {
                tables: vec!["*".into()],
                access: DbAccess::ReadWrite,
            }),
            network: Some(NetworkGrant {
                allowed_domains: vec![],
                allow_all: true,
            }),
            llm: Some(LlmGrant {
                can_intercept_task: true,
                can_modify_prompt: true,
                can_modify_system_message: true,
                can_modify_response: true,
                max_tokens_per_request: None,
            }),
            api: Some(ApiGrant {
                routes: vec!["/*".into()],
                methods: None,
            }),
            socket: Some(SocketGrant {
                can_intercept: true,
                can_emit: true,
                events: vec!["*".into()],
            }),
            skills: Some(vec!["*".into()]),
            memory: Some(MemoryGrant {
                read: vec!["*".into()],
                write: vec!["*".into()],
            }),
            log: Some(LogGrant {
                enabled: true,
                levels: vec![
                    LogLevel::Debug,
                    LogLevel::Info,
                    LogLevel::Warn,
                    LogLevel::Error,
                ],
            }),
        }
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}
