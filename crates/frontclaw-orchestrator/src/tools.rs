//! Tool and skill pipelines.
//!
//! Every tool or skill a plugin declares is advertised under
//! `pluginId__localName` (the plugin id is the sole namespace), and
//! execution splits on the first `__` to route back to the declaring plugin.

use crate::orchestrator::Orchestrator;
use frontclaw_contract::{hooks, ErrorObject};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// A namespaced tool as shown to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvertisedTool {
    /// `pluginId__localName`.
    pub name: String,
    pub description: String,
    /// JSON schema for arguments.
    pub parameters: Value,
    pub plugin_id: String,
}

/// A namespaced skill, filtered by the declaring plugin's own skill grant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvertisedSkill {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub plugin_id: String,
}

/// The `{success, result | error}` shape surfaced by `executeTool` and
/// `executeSkill` hooks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolExecution {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolExecution {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(message.into()),
        }
    }
}

#[derive(Deserialize)]
struct DeclaredCallable {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "empty_schema")]
    parameters: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

fn parse_declarations(plugin_id: &str, hook: &str, result: Option<Value>) -> Vec<DeclaredCallable> {
    let Some(value) = result else {
        return Vec::new();
    };
    match serde_json::from_value::<Vec<DeclaredCallable>>(value) {
        Ok(declared) => declared,
        Err(e) => {
            warn!(plugin_id, hook, error = %e, "malformed declaration list ignored");
            Vec::new()
        }
    }
}

/// Split `pluginId__localName`; `None` when there is no namespace.
fn split_namespaced(full_name: &str) -> Option<(&str, &str)> {
    full_name
        .split_once("__")
        .filter(|(plugin, local)| !plugin.is_empty() && !local.is_empty())
}

impl Orchestrator {
    // ── tools ─────────────────────────────────────────────

    /// Ask every plugin for its tools. Failures are per-plugin and logged.
    pub async fn collect_tools(&self) -> Vec<AdvertisedTool> {
        let mut tools = Vec::new();
        for entry in self.entries() {
            let reply = entry.host.call_hook(hooks::GET_TOOLS, Value::Null).await;
            let result = match reply {
                Ok(result) => result,
                Err(error) => {
                    warn!(plugin_id = entry.plugin.id(), code = %error.code, "getTools failed, skipping plugin");
                    continue;
                }
            };
            for declared in parse_declarations(entry.plugin.id(), hooks::GET_TOOLS, result) {
                tools.push(AdvertisedTool {
                    name: format!("{}__{}", entry.plugin.id(), declared.name),
                    description: declared.description,
                    parameters: declared.parameters,
                    plugin_id: entry.plugin.id().to_string(),
                });
            }
        }
        tools
    }

    /// Route a namespaced tool invocation to its declaring plugin.
    pub async fn execute_tool(
        &self,
        full_name: &str,
        args: Value,
    ) -> Result<ToolExecution, ErrorObject> {
        let Some((plugin_id, local_name)) = split_namespaced(full_name) else {
            return Err(ErrorObject::new(
                "TOOL_NOT_FOUND",
                format!("'{full_name}' is not a namespaced tool name"),
            ));
        };
        let Some(entry) = self.entry(plugin_id) else {
            return Err(ErrorObject::new(
                "TOOL_NOT_FOUND",
                format!("no plugin '{plugin_id}' for tool '{full_name}'"),
            ));
        };

        let result = entry
            .host
            .call_hook(
                hooks::EXECUTE_TOOL,
                json!({ "tool": local_name, "args": args }),
            )
            .await?;
        Ok(parse_execution(full_name, result))
    }

    // ── skills ────────────────────────────────────────────

    /// Ask every plugin for its skills. A declared skill is advertised only
    /// when the declaring plugin's own grant covers its local name.
    pub async fn collect_skills(&self) -> Vec<AdvertisedSkill> {
        let mut skills = Vec::new();
        for entry in self.entries() {
            let reply = entry.host.call_hook(hooks::GET_SKILLS, Value::Null).await;
            let result = match reply {
                Ok(result) => result,
                Err(error) => {
                    warn!(plugin_id = entry.plugin.id(), code = %error.code, "getSkills failed, skipping plugin");
                    continue;
                }
            };
            let guard = entry.guard();
            for declared in parse_declarations(entry.plugin.id(), hooks::GET_SKILLS, result) {
                if guard.check_skill(&declared.name).is_err() {
                    debug!(
                        plugin_id = entry.plugin.id(),
                        skill = %declared.name,
                        "skill declared without matching grant, not advertised"
                    );
                    continue;
                }
                skills.push(AdvertisedSkill {
                    name: format!("{}__{}", entry.plugin.id(), declared.name),
                    description: declared.description,
                    parameters: declared.parameters,
                    plugin_id: entry.plugin.id().to_string(),
                });
            }
        }
        skills
    }

    /// Execute a skill. A namespaced name routes directly; a bare name is
    /// tried against every plugin in priority order until one reports
    /// success.
    pub async fn execute_skill(
        &self,
        skill_name: &str,
        args: Value,
    ) -> Result<ToolExecution, ErrorObject> {
        if let Some((plugin_id, local_name)) = split_namespaced(skill_name) {
            if let Some(entry) = self.entry(plugin_id) {
                entry
                    .guard()
                    .check_skill(local_name)
                    .map_err(ErrorObject::from)?;
                let result = entry
                    .host
                    .call_hook(
                        hooks::EXECUTE_SKILL,
                        json!({ "skill": local_name, "args": args }),
                    )
                    .await?;
                return Ok(parse_execution(skill_name, result));
            }
        }

        // No namespace (or unknown prefix): first plugin that succeeds wins.
        for entry in self.entries() {
            if entry.guard().check_skill(skill_name).is_err() {
                continue;
            }
            let reply = entry
                .host
                .call_hook(
                    hooks::EXECUTE_SKILL,
                    json!({ "skill": skill_name, "args": args.clone() }),
                )
                .await;
            match reply {
                Ok(result) => {
                    let execution = parse_execution(skill_name, result);
                    if execution.success {
                        return Ok(execution);
                    }
                }
                Err(error) => {
                    debug!(plugin_id = entry.plugin.id(), code = %error.code, "executeSkill failed, trying next plugin");
                }
            }
        }
        Err(ErrorObject::new(
            "SKILL_NOT_FOUND",
            format!("no plugin handled skill '{skill_name}'"),
        ))
    }
}

fn parse_execution(name: &str, result: Option<Value>) -> ToolExecution {
    let Some(value) = result else {
        return ToolExecution::failure(format!("'{name}' returned no result"));
    };
    match serde_json::from_value::<ToolExecution>(value.clone()) {
        Ok(execution) => execution,
        // A bare value counts as a successful result.
        Err(_) => ToolExecution {
            success: true,
            result: value,
            error: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{call_log, make_plugin, FakeHost, Scripted};
    use frontclaw_contract::PermissionGrants;
    use std::sync::Arc;

    fn skill_grants(entries: Vec<&str>) -> PermissionGrants {
        PermissionGrants {
            skills: Some(entries.into_iter().map(String::from).collect()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn tools_are_namespaced_by_plugin_id() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![(
            make_plugin("web", 10, PermissionGrants::default()),
            Arc::new(FakeHost::new("web", log.clone()).on(
                hooks::GET_TOOLS,
                Scripted::Reply(serde_json::json!([
                    {"name": "search_web", "description": "Search the web"},
                    {"name": "fetch_page"}
                ])),
            )),
        )]);

        let tools = orchestrator.collect_tools().await;
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "web__search_web");
        assert_eq!(tools[1].name, "web__fetch_page");
        assert_eq!(tools[0].plugin_id, "web");
    }

    #[tokio::test]
    async fn tool_collection_survives_one_broken_plugin() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![
            (
                make_plugin("broken", 10, PermissionGrants::default()),
                Arc::new(FakeHost::new("broken", log.clone()).on(
                    hooks::GET_TOOLS,
                    Scripted::Fail(ErrorObject::hook_error("boom")),
                )),
            ),
            (
                make_plugin("ok", 20, PermissionGrants::default()),
                Arc::new(FakeHost::new("ok", log.clone()).on(
                    hooks::GET_TOOLS,
                    Scripted::Reply(serde_json::json!([{"name": "ping"}])),
                )),
            ),
        ]);

        let tools = orchestrator.collect_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "ok__ping");
    }

    #[tokio::test]
    async fn execute_tool_routes_by_namespace() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![(
            make_plugin("web", 10, PermissionGrants::default()),
            Arc::new(FakeHost::new("web", log.clone()).on(
                hooks::EXECUTE_TOOL,
                Scripted::Reply(serde_json::json!({"success": true, "result": {"hits": 3}})),
            )),
        )]);

        let execution = orchestrator
            .execute_tool("web__search_web", serde_json::json!({"q": "rust"}))
            .await
            .unwrap();
        assert!(execution.success);
        assert_eq!(execution.result["hits"], 3);

        let calls = log.lock().unwrap();
        assert_eq!(
            calls[0].2,
            serde_json::json!({"tool": "search_web", "args": {"q": "rust"}})
        );
    }

    #[tokio::test]
    async fn execute_tool_unknown_plugin_is_typed() {
        let orchestrator = Orchestrator::new(vec![]);
        let err = orchestrator
            .execute_tool("ghost__x", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is("TOOL_NOT_FOUND"));

        let err = orchestrator
            .execute_tool("not-namespaced", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is("TOOL_NOT_FOUND"));
    }

    #[tokio::test]
    async fn skills_filtered_by_declaring_plugins_grant() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![(
            make_plugin("helper", 10, skill_grants(vec!["summarize"])),
            Arc::new(FakeHost::new("helper", log.clone()).on(
                hooks::GET_SKILLS,
                Scripted::Reply(serde_json::json!([
                    {"name": "summarize"},
                    {"name": "translate"}
                ])),
            )),
        )]);

        let skills = orchestrator.collect_skills().await;
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "helper__summarize");
    }

    #[tokio::test]
    async fn execute_skill_namespaced_checks_grant() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![(
            make_plugin("helper", 10, skill_grants(vec!["summarize"])),
            Arc::new(FakeHost::new("helper", log.clone()).on(
                hooks::EXECUTE_SKILL,
                Scripted::Reply(serde_json::json!({"success": true, "result": "short"})),
            )),
        )]);

        let execution = orchestrator
            .execute_skill("helper__summarize", serde_json::json!({"text": "..."}))
            .await
            .unwrap();
        assert!(execution.success);
        assert_eq!(execution.result, serde_json::json!("short"));

        let err = orchestrator
            .execute_skill("helper__translate", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is("PERMISSION_DENIED"));
    }

    #[tokio::test]
    async fn bare_skill_name_takes_first_success() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![
            (
                make_plugin("miss", 10, skill_grants(vec!["*"])),
                Arc::new(FakeHost::new("miss", log.clone()).on(
                    hooks::EXECUTE_SKILL,
                    Scripted::Reply(
                        serde_json::json!({"success": false, "error": "unknown skill"}),
                    ),
                )),
            ),
            (
                make_plugin("hit", 20, skill_grants(vec!["*"])),
                Arc::new(FakeHost::new("hit", log.clone()).on(
                    hooks::EXECUTE_SKILL,
                    Scripted::Reply(serde_json::json!({"success": true, "result": 42})),
                )),
            ),
        ]);

        let execution = orchestrator
            .execute_skill("answer", Value::Null)
            .await
            .unwrap();
        assert!(execution.success);
        assert_eq!(execution.result, serde_json::json!(42));
    }

    #[tokio::test]
    async fn unhandled_bare_skill_is_not_found() {
        let orchestrator = Orchestrator::new(vec![]);
        let err = orchestrator
            .execute_skill("nothing", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is("SKILL_NOT_FOUND"));
    }

    #[tokio::test]
    async fn bare_tool_value_counts_as_success() {
        let log = call_log();
        let orchestrator = Orchestrator::new(vec![(
            make_plugin("simple", 10, PermissionGrants::default()),
            Arc::new(FakeHost::new("simple", log.clone()).on(
                hooks::EXECUTE_TOOL,
                Scripted::Reply(serde_json::json!("plain text result")),
            )),
        )]);

        let execution = orchestrator
            .execute_tool("simple__echo", Value::Null)
            .await
            .unwrap();
        assert!(execution.success);
        assert_eq!(execution.result, serde_json::json!("plain text result"));
    }
}
