//! Plugin manifest model and validation.
//!
//! A manifest is the static declaration at a plugin's root (`frontclaw.json`):
//! identity, version, permissions, entry point, configuration defaults.
//! Immutable after load.

use crate::permissions::PermissionGrants;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Manifest file name expected at each plugin root.
pub const MANIFEST_FILE: &str = "frontclaw.json";

/// Priority assigned when the manifest omits one. Lower runs first.
pub const DEFAULT_PRIORITY: u32 = 100;

/// Upper bound on declared priority.
pub const MAX_PRIORITY: u32 = 1000;

/// Validation failure covering every bad field in one message.
#[derive(Debug, Error)]
#[error("invalid manifest: {}", issues.join("; "))]
pub struct ManifestError {
    /// One `field: problem` entry per offending field.
    pub issues: Vec<String>,
}

/// Strict `MAJOR.MINOR.PATCH` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PluginVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl PluginVersion {
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for PluginVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PluginVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PluginVersion::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid version: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The static declaration of one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Stable identifier: lowercase letters, digits, hyphens; starts with a
    /// letter. The sole namespace prefix for tools, skills, and memory keys.
    pub id: String,
    pub name: String,
    pub version: PluginVersion,
    /// Entry path, resolved against the plugin directory.
    pub main: String,
    pub permissions: PermissionGrants,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<PluginAuthor>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// JSON Schema applied to user configuration overrides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
    #[serde(default)]
    pub default_config: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_frontclaw_version: Option<PluginVersion>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

fn default_true() -> bool {
    true
}

/// A plugin after loading: manifest plus resolved paths and merged
/// configuration. Created at orchestrator start, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    pub manifest: PluginManifest,
    /// Absolute plugin directory.
    pub dir: std::path::PathBuf,
    /// Absolute entry path (`dir` + manifest `main`).
    pub entry: std::path::PathBuf,
    /// Manifest defaults with user overrides applied on top.
    pub config: HashMap<String, Value>,
}

impl LoadedPlugin {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }
}

/// True iff `id` matches `^[a-z][a-z0-9-]*$`.
pub fn is_valid_plugin_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl PluginManifest {
    /// Validate the fields that serde cannot: identifier shape, priority
    /// range, non-empty name and entry. Collects every problem into one
    /// error rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut issues = Vec::new();

        if !is_valid_plugin_id(&self.id) {
            issues.push(format!(
                "id: '{}' must match ^[a-z][a-z0-9-]*$",
                self.id
            ));
        }
        if self.name.trim().is_empty() {
            issues.push("name: must not be empty".to_string());
        }
        if self.main.trim().is_empty() {
            issues.push("main: must not be empty".to_string());
        }
        if self.priority > MAX_PRIORITY {
            issues.push(format!(
                "priority: {} exceeds maximum {MAX_PRIORITY}",
                self.priority
            ));
        }
        if let Some(schema) = &self.config_schema {
            if !schema.is_object() && !schema.is_boolean() {
                issues.push("configSchema: must be an object or boolean schema".to_string());
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ManifestError { issues })
        }
    }

    /// Parse and validate a manifest from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        let manifest: PluginManifest = serde_json::from_str(text).map_err(|e| ManifestError {
            issues: vec![e.to_string()],
        })?;
        manifest.validate()?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_json() -> Value {
        json!({
            "id": "echo",
            "name": "Echo",
            "version": "1.0.0",
            "main": "index.js",
            "permissions": {}
        })
    }

    #[test]
    fn minimal_manifest_parses_with_defaults() {
        let manifest = PluginManifest::from_json(&minimal_json().to_string()).unwrap();
        assert_eq!(manifest.priority, DEFAULT_PRIORITY);
        assert!(manifest.enabled);
        assert!(manifest.tags.is_empty());
        assert!(manifest.default_config.is_empty());
    }

    #[test]
    fn version_is_strict_three_component() {
        assert!(PluginVersion::parse("1.2.3").is_some());
        assert!(PluginVersion::parse("1.2").is_none());
        assert!(PluginVersion::parse("1.2.3.4").is_none());
        assert!(PluginVersion::parse("1.2.x").is_none());
        assert!(PluginVersion::parse("v1.2.3").is_none());
    }

    #[test]
    fn version_ordering() {
        let a = PluginVersion::parse("1.2.3").unwrap();
        let b = PluginVersion::parse("1.10.0").unwrap();
        assert!(a < b);
    }

    #[test]
    fn id_regex_enforced() {
        assert!(is_valid_plugin_id("security-guardian"));
        assert!(is_valid_plugin_id("a1"));
        assert!(!is_valid_plugin_id("1abc"));
        assert!(!is_valid_plugin_id("Upper"));
        assert!(!is_valid_plugin_id("has_underscore"));
        assert!(!is_valid_plugin_id(""));
    }

    #[test]
    fn validation_collects_all_issues() {
        let mut value = minimal_json();
        value["id"] = json!("Bad_Id");
        value["name"] = json!("");
        value["priority"] = json!(5000);
        let manifest: PluginManifest = serde_json::from_value(value).unwrap();
        let err = manifest.validate().unwrap_err();
        assert_eq!(err.issues.len(), 3);
        assert!(err.to_string().contains("id:"));
        assert!(err.to_string().contains("name:"));
        assert!(err.to_string().contains("priority:"));
    }

    #[test]
    fn camel_case_optional_fields() {
        let mut value = minimal_json();
        value["defaultConfig"] = json!({"greeting": "hello"});
        value["minFrontclawVersion"] = json!("0.3.0");
        value["configSchema"] = json!({"type": "object"});
        let manifest: PluginManifest = serde_json::from_value(value).unwrap();
        assert_eq!(manifest.default_config["greeting"], json!("hello"));
        assert_eq!(
            manifest.min_frontclaw_version,
            Some(PluginVersion::parse("0.3.0").unwrap())
        );
        assert!(manifest.config_schema.is_some());
    }
}
