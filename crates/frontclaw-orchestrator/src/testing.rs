//! Test doubles shared by the pipeline test modules.

use crate::dispatch::HookDispatcher;
use async_trait::async_trait;
use frontclaw_contract::{ErrorObject, LoadedPlugin, PermissionGrants, PluginManifest, PluginVersion};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// What a scripted host does when a given hook is called.
#[derive(Clone)]
pub enum Scripted {
    /// Return this value.
    Reply(Value),
    /// Return no value (hook passes).
    Silent,
    /// Fail with this error.
    Fail(ErrorObject),
}

/// In-process hook dispatcher driven by a method → behavior script.
/// Records every call into a shared log for ordering assertions.
pub struct FakeHost {
    plugin_id: String,
    script: HashMap<String, Scripted>,
    pub calls: Arc<Mutex<Vec<(String, String, Value)>>>,
    pub stopped: Arc<Mutex<bool>>,
}

impl FakeHost {
    pub fn new(plugin_id: &str, log: Arc<Mutex<Vec<(String, String, Value)>>>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            script: HashMap::new(),
            calls: log,
            stopped: Arc::new(Mutex::new(false)),
        }
    }

    pub fn on(mut self, method: &str, behavior: Scripted) -> Self {
        self.script.insert(method.to_string(), behavior);
        self
    }
}

#[async_trait]
impl HookDispatcher for FakeHost {
    async fn call_hook(
        &self,
        method: &str,
        payload: Value,
    ) -> Result<Option<Value>, ErrorObject> {
        self.calls
            .lock()
            .unwrap()
            .push((self.plugin_id.clone(), method.to_string(), payload));
        match self.script.get(method) {
            Some(Scripted::Reply(value)) => Ok(Some(value.clone())),
            Some(Scripted::Fail(err)) => Err(err.clone()),
            Some(Scripted::Silent) | None => Ok(None),
        }
    }

    async fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
    }
}

pub fn make_plugin(id: &str, priority: u32, permissions: PermissionGrants) -> Arc<LoadedPlugin> {
    Arc::new(LoadedPlugin {
        manifest: PluginManifest {
            id: id.to_string(),
            name: id.to_string(),
            version: PluginVersion::parse("1.0.0").unwrap(),
            main: "index.js".into(),
            permissions,
            description: None,
            author: None,
            priority,
            config_schema: None,
            default_config: Default::default(),
            min_frontclaw_version: None,
            tags: vec![],
            enabled: true,
        },
        dir: format!("/plugins/{id}").into(),
        entry: format!("/plugins/{id}/index.js").into(),
        config: Default::default(),
    })
}

pub fn call_log() -> Arc<Mutex<Vec<(String, String, Value)>>> {
    Arc::new(Mutex::new(Vec::new()))
}
