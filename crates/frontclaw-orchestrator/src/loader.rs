//! Plugin discovery.
//!
//! Scans a directory, treating each immediate subdirectory as a candidate
//! plugin. A candidate needs a `frontclaw.json` manifest and a readme.
//! One plugin failing to load never prevents the others from loading.

use frontclaw_contract::manifest::MANIFEST_FILE;
use frontclaw_contract::{LoadedPlugin, PluginManifest};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error("manifest missing or unreadable: {0}")]
    Manifest(String),

    #[error("readme file is required")]
    MissingReadme,

    #[error("entry file does not exist: {0}")]
    MissingEntry(PathBuf),

    #[error("duplicate plugin id '{0}'")]
    DuplicateId(String),

    #[error("config rejected by schema: {0}")]
    ConfigSchema(String),
}

/// What the scan produced: loaded plugins sorted by priority (id breaks
/// ties), plus per-directory failures for diagnostics.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub plugins: Vec<LoadedPlugin>,
    pub failures: Vec<(PathBuf, LoadFailure)>,
    /// Plugins dropped because they were disabled or denied.
    pub skipped: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct LoaderOptions {
    /// Per-plugin-id configuration overrides merged atop manifest defaults.
    pub config_overrides: HashMap<String, HashMap<String, Value>>,
    /// Plugin ids excluded regardless of their enabled flag.
    pub deny_list: HashSet<String>,
}

fn has_readme(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .to_ascii_lowercase()
                    .starts_with("readme")
            })
        })
        .unwrap_or(false)
}

fn validate_config(
    schema: &Value,
    config: &HashMap<String, Value>,
) -> Result<(), LoadFailure> {
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| LoadFailure::ConfigSchema(format!("invalid configSchema: {e}")))?;
    let instance = serde_json::to_value(config)
        .map_err(|e| LoadFailure::ConfigSchema(e.to_string()))?;
    if let Err(errors) = compiled.validate(&instance) {
        let joined = errors
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(LoadFailure::ConfigSchema(joined));
    }
    Ok(())
}

fn load_candidate(
    dir: &Path,
    options: &LoaderOptions,
) -> Result<Option<LoadedPlugin>, LoadFailure> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let text = std::fs::read_to_string(&manifest_path)
        .map_err(|e| LoadFailure::Manifest(format!("{}: {e}", manifest_path.display())))?;
    let manifest =
        PluginManifest::from_json(&text).map_err(|e| LoadFailure::Manifest(e.to_string()))?;

    if !has_readme(dir) {
        return Err(LoadFailure::MissingReadme);
    }

    if !manifest.enabled || options.deny_list.contains(&manifest.id) {
        debug!(plugin_id = %manifest.id, "plugin disabled or denied");
        return Ok(None);
    }

    let entry = dir.join(&manifest.main);
    if !entry.is_file() {
        return Err(LoadFailure::MissingEntry(entry));
    }

    let mut config = manifest.default_config.clone();
    if let Some(overrides) = options.config_overrides.get(&manifest.id) {
        config.extend(overrides.clone());
    }
    if let Some(schema) = &manifest.config_schema {
        validate_config(schema, &config)?;
    }

    Ok(Some(LoadedPlugin {
        manifest,
        dir: dir.to_path_buf(),
        entry,
        config,
    }))
}

/// Scan `plugins_dir` and materialize every loadable plugin.
pub fn load_plugins(plugins_dir: &Path, options: &LoaderOptions) -> LoadReport {
    let mut report = LoadReport::default();
    let mut seen_ids: HashSet<String> = HashSet::new();

    let entries = match std::fs::read_dir(plugins_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %plugins_dir.display(), error = %e, "plugin directory unreadable");
            return report;
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        match load_candidate(&dir, options) {
            Ok(Some(plugin)) => {
                if !seen_ids.insert(plugin.manifest.id.clone()) {
                    let id = plugin.manifest.id.clone();
                    warn!(plugin_id = %id, dir = %dir.display(), "duplicate plugin id, skipping");
                    report.failures.push((dir, LoadFailure::DuplicateId(id)));
                    continue;
                }
                report.plugins.push(plugin);
            }
            Ok(None) => {
                // Disabled or denied: remember the id for diagnostics.
                if let Ok(text) = std::fs::read_to_string(dir.join(MANIFEST_FILE)) {
                    if let Ok(manifest) = PluginManifest::from_json(&text) {
                        report.skipped.push(manifest.id);
                    }
                }
            }
            Err(failure) => {
                warn!(dir = %dir.display(), error = %failure, "plugin failed to load");
                report.failures.push((dir, failure));
            }
        }
    }

    report
        .plugins
        .sort_by(|a, b| {
            a.manifest
                .priority
                .cmp(&b.manifest.priority)
                .then_with(|| a.manifest.id.cmp(&b.manifest.id))
        });

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write_plugin(root: &Path, dir_name: &str, manifest: Value, with_readme: bool) {
        let dir = root.join(dir_name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), manifest.to_string()).unwrap();
        if with_readme {
            fs::write(dir.join("README.md"), "# plugin").unwrap();
        }
        if let Some(main) = manifest.get("main").and_then(Value::as_str) {
            fs::write(dir.join(main), "// entry").unwrap();
        }
    }

    fn manifest(id: &str, priority: u32) -> Value {
        json!({
            "id": id,
            "name": id,
            "version": "1.0.0",
            "main": "index.js",
            "priority": priority,
            "permissions": {}
        })
    }

    #[test]
    fn loads_and_sorts_by_priority_then_id() {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(tmp.path(), "zeta", manifest("zeta", 10), true);
        write_plugin(tmp.path(), "alpha", manifest("alpha", 20), true);
        write_plugin(tmp.path(), "beta", manifest("beta", 10), true);

        let report = load_plugins(tmp.path(), &LoaderOptions::default());
        let ids: Vec<&str> = report.plugins.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["beta", "zeta", "alpha"]);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn missing_readme_fails_that_plugin_only() {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(tmp.path(), "good", manifest("good", 10), true);
        write_plugin(tmp.path(), "bad", manifest("bad", 10), false);

        let report = load_plugins(tmp.path(), &LoaderOptions::default());
        assert_eq!(report.plugins.len(), 1);
        assert_eq!(report.plugins[0].id(), "good");
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].1, LoadFailure::MissingReadme));
    }

    #[test]
    fn missing_entry_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("noentry");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), manifest("noentry", 10).to_string()).unwrap();
        fs::write(dir.join("README.md"), "#").unwrap();

        let report = load_plugins(tmp.path(), &LoaderOptions::default());
        assert!(report.plugins.is_empty());
        assert!(matches!(report.failures[0].1, LoadFailure::MissingEntry(_)));
    }

    #[test]
    fn disabled_and_denied_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut disabled = manifest("off", 10);
        disabled["enabled"] = json!(false);
        write_plugin(tmp.path(), "off", disabled, true);
        write_plugin(tmp.path(), "denied", manifest("denied", 10), true);

        let options = LoaderOptions {
            deny_list: ["denied".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let report = load_plugins(tmp.path(), &options);
        assert!(report.plugins.is_empty());
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn config_overrides_merge_atop_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manifest("cfg", 10);
        m["defaultConfig"] = json!({"a": 1, "b": 2});
        write_plugin(tmp.path(), "cfg", m, true);

        let options = LoaderOptions {
            config_overrides: [(
                "cfg".to_string(),
                [("b".to_string(), json!(9))].into_iter().collect(),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let report = load_plugins(tmp.path(), &options);
        let config = &report.plugins[0].config;
        assert_eq!(config["a"], json!(1));
        assert_eq!(config["b"], json!(9));
    }

    #[test]
    fn config_schema_rejects_bad_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manifest("strict", 10);
        m["configSchema"] = json!({
            "type": "object",
            "properties": {"level": {"type": "integer"}},
            "required": ["level"]
        });
        m["defaultConfig"] = json!({"level": 1});
        write_plugin(tmp.path(), "strict", m, true);

        let options = LoaderOptions {
            config_overrides: [(
                "strict".to_string(),
                [("level".to_string(), json!("high"))].into_iter().collect(),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let report = load_plugins(tmp.path(), &options);
        assert!(report.plugins.is_empty());
        assert!(matches!(report.failures[0].1, LoadFailure::ConfigSchema(_)));
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(tmp.path(), "a-copy", manifest("twin", 10), true);
        write_plugin(tmp.path(), "b-copy", manifest("twin", 10), true);

        let report = load_plugins(tmp.path(), &LoaderOptions::default());
        assert_eq!(report.plugins.len(), 1);
        assert!(matches!(report.failures[0].1, LoadFailure::DuplicateId(_)));
    }

    #[test]
    fn invalid_manifest_collects_issue_text() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("broken");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(MANIFEST_FILE),
            json!({"id": "Bad Id", "name": "", "version": "1.0.0", "main": "x.js", "permissions": {}})
                .to_string(),
        )
        .unwrap();
        fs::write(dir.join("README.md"), "#").unwrap();

        let report = load_plugins(tmp.path(), &LoaderOptions::default());
        match &report.failures[0].1 {
            LoadFailure::Manifest(msg) => {
                assert!(msg.contains("id:"));
                assert!(msg.contains("name:"));
            }
            other => panic!("expected Manifest failure, got {other:?}"),
        }
    }
}
