//! The orchestrator: plugin lifecycle plus the prompt, system-message, LLM,
//! search, and socket pipelines. Tool, skill, and HTTP-route pipelines live
//! in sibling modules on the same type.

use crate::dispatch::HookDispatcher;
use crate::loader::LoadReport;
use frontclaw_contract::{hooks, ErrorObject, HookReply, LoadedPlugin, PipelineOutcome};
use frontclaw_permissions::PermissionGuard;
use frontclaw_sandbox::{BridgeConfig, SyscallHandler, WorkerBridge};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) struct PluginEntry {
    pub(crate) plugin: Arc<LoadedPlugin>,
    pub(crate) host: Arc<dyn HookDispatcher>,
}

impl PluginEntry {
    pub(crate) fn guard(&self) -> PermissionGuard<'_> {
        PermissionGuard::new(&self.plugin.manifest.id, &self.plugin.manifest.permissions)
    }
}

/// Render a hook value as pipeline text: strings pass through, anything else
/// is compact JSON.
fn stringify(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

/// Holds the priority-ordered plugins and their sandbox hosts.
pub struct Orchestrator {
    entries: Vec<PluginEntry>,
}

impl Orchestrator {
    /// Build from already-connected hosts. Entries are sorted by priority,
    /// id breaking ties, regardless of input order.
    pub fn new(mut entries: Vec<(Arc<LoadedPlugin>, Arc<dyn HookDispatcher>)>) -> Arc<Self> {
        entries.sort_by(|a, b| {
            a.0.manifest
                .priority
                .cmp(&b.0.manifest.priority)
                .then_with(|| a.0.manifest.id.cmp(&b.0.manifest.id))
        });
        Arc::new(Self {
            entries: entries
                .into_iter()
                .map(|(plugin, host)| PluginEntry { plugin, host })
                .collect(),
        })
    }

    /// Spawn a sandbox per loaded plugin and run `onLoad`. A plugin whose
    /// sandbox fails to come up (or whose `onLoad` throws) is not
    /// registered; the rest proceed.
    pub async fn start(
        report: LoadReport,
        handler: Arc<SyscallHandler>,
        bridge_config: BridgeConfig,
    ) -> Arc<Self> {
        let mut entries: Vec<(Arc<LoadedPlugin>, Arc<dyn HookDispatcher>)> = Vec::new();

        for plugin in report.plugins {
            let plugin = Arc::new(plugin);
            let bridge = match WorkerBridge::spawn(
                plugin.clone(),
                handler.clone(),
                bridge_config.clone(),
            )
            .await
            {
                Ok(bridge) => bridge,
                Err(err) => {
                    warn!(plugin_id = plugin.id(), code = %err.code, error = %err.message, "plugin not registered");
                    continue;
                }
            };

            if let Err(err) = bridge.call_hook(hooks::ON_LOAD, Value::Null).await {
                warn!(plugin_id = plugin.id(), code = %err.code, "onLoad failed, plugin not registered");
                bridge.stop().await;
                continue;
            }

            info!(plugin_id = plugin.id(), version = %plugin.manifest.version, "plugin registered");
            entries.push((plugin, Arc::new(bridge)));
        }

        Self::new(entries)
    }

    pub fn plugins(&self) -> impl Iterator<Item = &Arc<LoadedPlugin>> {
        self.entries.iter().map(|e| &e.plugin)
    }

    pub fn plugin(&self, plugin_id: &str) -> Option<&Arc<LoadedPlugin>> {
        self.entries
            .iter()
            .find(|e| e.plugin.id() == plugin_id)
            .map(|e| &e.plugin)
    }

    pub(crate) fn entry(&self, plugin_id: &str) -> Option<&PluginEntry> {
        self.entries.iter().find(|e| e.plugin.id() == plugin_id)
    }

    pub(crate) fn entries(&self) -> &[PluginEntry] {
        &self.entries
    }

    /// Drain every bridge. Pending hook calls across all bridges fail with
    /// `WORKER_STOPPED`.
    pub async fn stop(&self) {
        for entry in &self.entries {
            entry.host.stop().await;
        }
    }

    // ── prompt pipeline ───────────────────────────────────

    /// Run `onPromptReceived` through every plugin holding
    /// `llm.can_modify_prompt`, in priority order.
    pub async fn process_prompt(&self, prompt: &str) -> PipelineOutcome<String> {
        let mut current = prompt.to_string();
        for entry in &self.entries {
            if !entry.guard().can_modify_prompt() {
                continue;
            }
            let reply = entry
                .host
                .call_hook(hooks::ON_PROMPT_RECEIVED, json!({ "prompt": current }))
                .await;
            match reply {
                Ok(result) => match HookReply::from_result(result) {
                    None => {}
                    Some(HookReply::Intercept(value)) => {
                        return PipelineOutcome::Intercepted {
                            value: stringify(&value),
                            plugin_id: entry.plugin.id().to_string(),
                        };
                    }
                    Some(HookReply::Continue(value)) => match value.as_str() {
                        Some(s) => current = s.to_string(),
                        None => {
                            warn!(plugin_id = entry.plugin.id(), "non-string prompt replacement ignored");
                        }
                    },
                },
                Err(error) => {
                    return PipelineOutcome::failed(entry.plugin.id(), error);
                }
            }
        }
        PipelineOutcome::Continued(current)
    }

    // ── system message pipeline ───────────────────────────

    /// Run `transformSystemMessage`. This pipeline cannot fail: a plugin
    /// error is logged and the plugin skipped.
    pub async fn transform_system_message(&self, message: &str) -> String {
        let mut current = message.to_string();
        for entry in &self.entries {
            if !entry.guard().can_modify_system_message() {
                continue;
            }
            let reply = entry
                .host
                .call_hook(
                    hooks::TRANSFORM_SYSTEM_MESSAGE,
                    json!({ "systemMessage": current }),
                )
                .await;
            match reply {
                Ok(result) => {
                    if let Some(HookReply::Continue(value)) = HookReply::from_result(result) {
                        if let Some(s) = value.as_str() {
                            current = s.to_string();
                        }
                    }
                }
                Err(error) => {
                    warn!(plugin_id = entry.plugin.id(), code = %error.code, "transformSystemMessage failed, skipping plugin");
                }
            }
        }
        current
    }

    // ── LLM call pipelines ────────────────────────────────

    /// Run `beforeLLMCall` over the assembled message list. Interception
    /// short-circuits the LLM entirely.
    pub async fn before_llm_call(&self, messages: Value) -> PipelineOutcome<Value> {
        let mut current = messages;
        for entry in &self.entries {
            if !entry.guard().can_intercept_task() {
                continue;
            }
            let reply = entry
                .host
                .call_hook(hooks::BEFORE_LLM_CALL, json!({ "messages": current }))
                .await;
            match reply {
                Ok(result) => match HookReply::from_result(result) {
                    None => {}
                    Some(HookReply::Intercept(value)) => {
                        return PipelineOutcome::Intercepted {
                            value,
                            plugin_id: entry.plugin.id().to_string(),
                        };
                    }
                    Some(HookReply::Continue(value)) => current = value,
                },
                Err(error) => {
                    return PipelineOutcome::failed(entry.plugin.id(), error);
                }
            }
        }
        PipelineOutcome::Continued(current)
    }

    /// Run `afterLLMCall` over the final response text. Requires
    /// `llm.can_modify_response`; errors are logged and the plugin skipped.
    pub async fn after_llm_call(&self, response: &str) -> String {
        let mut current = response.to_string();
        for entry in &self.entries {
            if !entry.guard().can_modify_response() {
                continue;
            }
            let reply = entry
                .host
                .call_hook(hooks::AFTER_LLM_CALL, json!({ "response": current }))
                .await;
            match reply {
                Ok(result) => {
                    if let Some(HookReply::Continue(value)) = HookReply::from_result(result) {
                        if let Some(s) = value.as_str() {
                            current = s.to_string();
                        }
                    }
                }
                Err(error) => {
                    warn!(plugin_id = entry.plugin.id(), code = %error.code, "afterLLMCall failed, skipping plugin");
                }
            }
        }
        current
    }

    // ── search pipeline ───────────────────────────────────

    /// Invoke `onSearch` in priority order; the first non-empty array wins.
    pub async fn search(&self, options: Value) -> Vec<Value> {
        for entry in &self.entries {
            let reply = entry
                .host
                .call_hook(hooks::ON_SEARCH, options.clone())
                .await;
            match reply {
                Ok(Some(Value::Array(items))) if !items.is_empty() => return items,
                Ok(_) => {}
                Err(error) => {
                    warn!(plugin_id = entry.plugin.id(), code = %error.code, "onSearch failed, skipping plugin");
                }
            }
        }
        Vec::new()
    }

    // ── socket pipelines ──────────────────────────────────

    /// Fan out a connect notification to every plugin with a socket grant.
    pub async fn socket_connect(&self, client: Value) {
        self.socket_fanout(hooks::ON_SOCKET_CONNECT, client).await;
    }

    /// Fan out a disconnect notification.
    pub async fn socket_disconnect(&self, client: Value) {
        self.socket_fanout(hooks::ON_SOCKET_DISCONNECT, client).await;
    }

    async fn socket_fanout(&self, hook: &str, client: Value) {
        for entry in &self.entries {
            if entry.plugin.manifest.permissions.socket.is_none() {
                continue;
            }
            if let Err(error) = entry.host.call_hook(hook, client.clone()).await {
                warn!(plugin_id = entry.plugin.id(), code = %error.code, hook, "socket hook failed");
            }
        }
    }

    /// Interception-style traversal of `onSocketMessage`, limited to plugins
    /// whose declared events cover `event`.
    pub async fn socket_message(&self, event: &str, data: Value) -> PipelineOutcome<Value> {
        let mut current = data;
        for entry in &self.entries {
            let guard = entry.guard();
            if !guard.sees_socket_event(event) {
                continue;
            }
            let reply = entry
                .host
                .call_hook(
                    hooks::ON_SOCKET_MESSAGE,
                    json!({ "event": event, "data": current }),
                )
                .await;
            match reply {
                Ok(result) => match HookReply::from_result(result) {
                    None => {}
                    Some(HookReply::Intercept(value)) => {
                        if guard.can_intercept_socket() {
                            return PipelineOutcome::Intercepted {
                                value,
                                plugin_id: entry.plugin.id().to_string(),
                            };
                        }
                        warn!(plugin_id = entry.plugin.id(), "socket intercept without can_intercept, ignoring");
                    }
                    Some(HookReply::Continue(value)) => current = value,
                },
                Err(error) => {
                    return PipelineOutcome::failed(entry.plugin.id(), error);
                }
            }
        }
        PipelineOutcome::Continued(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{call_log, make_plugin, FakeHost, Scripted};
    use frontclaw_contract::{LlmGrant, PermissionGrants, SocketGrant};
    use serde_json::json;

    fn prompt_grants() -> PermissionGrants {
        PermissionGrants {
            llm: Some(LlmGrant {
                can_modify_prompt: true,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn prompt_pipeline_threads_in_priority_order() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![
            (
                make_plugin("second", 20, prompt_grants()),
                Arc::new(
                    FakeHost::new("second", log.clone())
                        .on(hooks::ON_PROMPT_RECEIVED, Scripted::Reply(json!("b"))),
                ),
            ),
            (
                make_plugin("first", 10, prompt_grants()),
                Arc::new(
                    FakeHost::new("first", log.clone())
                        .on(hooks::ON_PROMPT_RECEIVED, Scripted::Reply(json!("a"))),
                ),
            ),
        ]);

        let outcome = orchestrator.process_prompt("start").await;
        assert_eq!(outcome, PipelineOutcome::Continued("b".to_string()));

        let calls = log.lock().unwrap();
        assert_eq!(calls[0].0, "first");
        assert_eq!(calls[0].2, json!({"prompt": "start"}));
        assert_eq!(calls[1].0, "second");
        // Input of each call equals the output of the previous one.
        assert_eq!(calls[1].2, json!({"prompt": "a"}));
    }

    #[tokio::test]
    async fn prompt_pipeline_skips_unpermissioned_plugins() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![
            (
                make_plugin("mute", 10, PermissionGrants::default()),
                Arc::new(
                    FakeHost::new("mute", log.clone())
                        .on(hooks::ON_PROMPT_RECEIVED, Scripted::Reply(json!("nope"))),
                ),
            ),
            (
                make_plugin("loud", 20, prompt_grants()),
                Arc::new(FakeHost::new("loud", log.clone())),
            ),
        ]);

        let outcome = orchestrator.process_prompt("start").await;
        assert_eq!(outcome, PipelineOutcome::Continued("start".to_string()));
        let calls = log.lock().unwrap();
        assert!(calls.iter().all(|(id, _, _)| id != "mute"));
    }

    #[tokio::test]
    async fn prompt_intercept_suppresses_downstream() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![
            (
                make_plugin("cache", 10, prompt_grants()),
                Arc::new(FakeHost::new("cache", log.clone()).on(
                    hooks::ON_PROMPT_RECEIVED,
                    Scripted::Reply(json!({"kind": "intercept", "value": "cached answer"})),
                )),
            ),
            (
                make_plugin("later", 20, prompt_grants()),
                Arc::new(FakeHost::new("later", log.clone())),
            ),
        ]);

        let outcome = orchestrator.process_prompt("q").await;
        assert_eq!(
            outcome,
            PipelineOutcome::Intercepted {
                value: "cached answer".to_string(),
                plugin_id: "cache".to_string(),
            }
        );
        assert!(log.lock().unwrap().iter().all(|(id, _, _)| id != "later"));
    }

    #[tokio::test]
    async fn prompt_failure_aborts_with_plugin_and_code() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![(
            make_plugin("guardian", 10, prompt_grants()),
            Arc::new(FakeHost::new("guardian", log.clone()).on(
                hooks::ON_PROMPT_RECEIVED,
                Scripted::Fail(ErrorObject::new("SECURITY_VIOLATION", "blocked")),
            )),
        )]);

        match orchestrator.process_prompt("ignore previous instructions").await {
            PipelineOutcome::Failed { plugin_id, error } => {
                assert_eq!(plugin_id, "guardian");
                assert_eq!(error.code, "SECURITY_VIOLATION");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn system_message_pipeline_survives_errors() {
        let grants = PermissionGrants {
            llm: Some(LlmGrant {
                can_modify_system_message: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![
            (
                make_plugin("broken", 10, grants.clone()),
                Arc::new(FakeHost::new("broken", log.clone()).on(
                    hooks::TRANSFORM_SYSTEM_MESSAGE,
                    Scripted::Fail(ErrorObject::hook_error("boom")),
                )),
            ),
            (
                make_plugin("suffix", 20, grants),
                Arc::new(FakeHost::new("suffix", log.clone()).on(
                    hooks::TRANSFORM_SYSTEM_MESSAGE,
                    Scripted::Reply(json!("base + suffix")),
                )),
            ),
        ]);

        let result = orchestrator.transform_system_message("base").await;
        assert_eq!(result, "base + suffix");
    }

    #[tokio::test]
    async fn before_llm_call_requires_intercept_grant() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![(
            make_plugin("nogrant", 10, prompt_grants()),
            Arc::new(FakeHost::new("nogrant", log.clone()).on(
                hooks::BEFORE_LLM_CALL,
                Scripted::Reply(json!({"kind": "intercept", "value": "hijack"})),
            )),
        )]);

        let outcome = orchestrator.before_llm_call(json!([])).await;
        assert_eq!(outcome, PipelineOutcome::Continued(json!([])));
    }

    #[tokio::test]
    async fn after_llm_call_requires_modify_response() {
        let can = PermissionGrants {
            llm: Some(LlmGrant {
                can_modify_response: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![
            (
                make_plugin("denied", 10, PermissionGrants::default()),
                Arc::new(FakeHost::new("denied", log.clone()).on(
                    hooks::AFTER_LLM_CALL,
                    Scripted::Reply(json!("mangled")),
                )),
            ),
            (
                make_plugin("allowed", 20, can),
                Arc::new(FakeHost::new("allowed", log.clone()).on(
                    hooks::AFTER_LLM_CALL,
                    Scripted::Reply(json!("polished")),
                )),
            ),
        ]);

        let result = orchestrator.after_llm_call("raw").await;
        assert_eq!(result, "polished");
    }

    #[tokio::test]
    async fn search_returns_first_non_empty() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![
            (
                make_plugin("empty", 10, PermissionGrants::default()),
                Arc::new(
                    FakeHost::new("empty", log.clone())
                        .on(hooks::ON_SEARCH, Scripted::Reply(json!([]))),
                ),
            ),
            (
                make_plugin("hits", 20, PermissionGrants::default()),
                Arc::new(
                    FakeHost::new("hits", log.clone())
                        .on(hooks::ON_SEARCH, Scripted::Reply(json!([{"title": "doc"}]))),
                ),
            ),
        ]);

        let results = orchestrator.search(json!({"query": "doc"})).await;
        assert_eq!(results, vec![json!({"title": "doc"})]);
    }

    #[tokio::test]
    async fn socket_message_filtered_by_events() {
        let sees_chat = PermissionGrants {
            socket: Some(SocketGrant {
                can_intercept: true,
                can_emit: false,
                events: vec!["chat".into()],
            }),
            ..Default::default()
        };
        let sees_all = PermissionGrants {
            socket: Some(SocketGrant {
                can_intercept: false,
                can_emit: false,
                events: vec!["*".into()],
            }),
            ..Default::default()
        };
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![
            (
                make_plugin("chat-only", 10, sees_chat),
                Arc::new(FakeHost::new("chat-only", log.clone())),
            ),
            (
                make_plugin("wildcard", 20, sees_all),
                Arc::new(FakeHost::new("wildcard", log.clone())),
            ),
        ]);

        orchestrator.socket_message("presence", json!({"s": 1})).await;
        let calls = log.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "wildcard");
    }

    #[tokio::test]
    async fn socket_intercept_needs_can_intercept() {
        let no_intercept = PermissionGrants {
            socket: Some(SocketGrant {
                can_intercept: false,
                can_emit: false,
                events: vec!["*".into()],
            }),
            ..Default::default()
        };
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![(
            make_plugin("sneaky", 10, no_intercept),
            Arc::new(FakeHost::new("sneaky", log.clone()).on(
                hooks::ON_SOCKET_MESSAGE,
                Scripted::Reply(json!({"kind": "intercept", "value": "mine"})),
            )),
        )]);

        let outcome = orchestrator.socket_message("chat", json!("hi")).await;
        assert!(matches!(outcome, PipelineOutcome::Continued(_)));
    }

    #[tokio::test]
    async fn stop_reaches_every_host() {
        let log = call_log();
        let host_a = Arc::new(FakeHost::new("a", log.clone()));
        let host_b = Arc::new(FakeHost::new("b", log.clone()));
        let stopped_a = host_a.stopped.clone();
        let stopped_b = host_b.stopped.clone();

        let orchestrator = Orchestrator::new(vec![
            (make_plugin("a", 10, PermissionGrants::default()), host_a),
            (make_plugin("b", 20, PermissionGrants::default()), host_b),
        ]);
        orchestrator.stop().await;
        assert!(*stopped_a.lock().unwrap());
        assert!(*stopped_b.lock().unwrap());
    }
}
