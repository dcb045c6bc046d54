//! Server configuration.
//!
//! Loaded from a TOML file with `${ENV_VAR}` substitution, so secrets like
//! the memory encryption key stay out of the file itself.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpConfig,
    pub plugins: PluginsConfig,
    pub sandbox: SandboxConfig,
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub dir: PathBuf,
    /// Plugin ids excluded regardless of their enabled flag.
    pub deny: Vec<String>,
    /// Per-plugin configuration overrides: `[plugins.config.<id>]` tables.
    pub config: HashMap<String, HashMap<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Sandbox runner command; the plugin entry path is appended.
    pub command: Vec<String>,
    pub hook_timeout_ms: u64,
    pub syscall_timeout_ms: u64,
    pub ready_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// 32-byte key, hex or base64. Supports `${ENV_VAR}` substitution.
    /// When set, values are stored in the AEAD envelope.
    pub encryption_key: Option<String>,
    /// Optional separate HMAC signing key; defaults to the encryption key.
    pub signing_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `echo` is the built-in development provider.
    pub provider: String,
    pub model: String,
    /// Supports `${ENV_VAR}` substitution.
    pub api_key: String,
    pub max_tokens_per_request: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: HttpConfig::default(),
            plugins: PluginsConfig::default(),
            sandbox: SandboxConfig::default(),
            memory: MemoryConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8710,
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./plugins"),
            deny: Vec::new(),
            config: HashMap::new(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command: vec!["frontclaw-sandbox-runner".to_string()],
            hook_timeout_ms: 5_000,
            syscall_timeout_ms: 30_000,
            ready_timeout_ms: 5_000,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            signing_key: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "echo".to_string(),
            model: String::new(),
            api_key: String::new(),
            max_tokens_per_request: 4096,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("env expansion failed: {0}")]
    Expansion(String),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ServerConfig {
    /// Load and expand a TOML config file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let expanded =
            shellexpand::env(&content).map_err(|e| ConfigError::Expansion(e.to_string()))?;
        Ok(toml::from_str(&expanded)?)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
