//! The sys-call entry point.
//!
//! Every SYS_CALL envelope from every worker lands here: rate limit first,
//! then a permission guard over the caller's manifest, then dispatch to the
//! matching backend. Unknown methods are a typed error, not a panic.

use crate::backend::{DbBackend, DbQueryOptions, FetchRequest, HttpFetcher, SkillInvoker};
use crate::rate_limit::RateLimiter;
use frontclaw_contract::{codes, ErrorObject, LogLevel, PluginManifest};
use frontclaw_memory::{KeyTtl, MemoryStore};
use frontclaw_permissions::{sql, PermissionGuard};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

fn invalid_args(method: &str, err: impl std::fmt::Display) -> ErrorObject {
    ErrorObject::new("INVALID_ARGUMENTS", format!("{method}: {err}"))
}

fn parse<T: serde::de::DeserializeOwned>(method: &str, payload: Value) -> Result<T, ErrorObject> {
    serde_json::from_value(payload).map_err(|e| invalid_args(method, e))
}

#[derive(Deserialize)]
struct QueryArgs {
    sql: String,
    #[serde(default)]
    params: Vec<Value>,
}

#[derive(Deserialize)]
struct GetItemsArgs {
    table: String,
    #[serde(flatten)]
    options: DbQueryOptions,
}

#[derive(Deserialize)]
struct GetItemArgs {
    table: String,
    id: Value,
}

#[derive(Deserialize)]
struct LogArgs {
    level: String,
    message: String,
    #[serde(default)]
    meta: Option<Value>,
}

#[derive(Deserialize)]
struct KeyArgs {
    key: String,
}

#[derive(Deserialize)]
struct SetArgs {
    key: String,
    value: Value,
    ttl: Option<u64>,
}

#[derive(Deserialize)]
struct ListArgs {
    prefix: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct InvokeSkillArgs {
    #[serde(alias = "skill")]
    #[serde(rename = "skillName")]
    skill_name: String,
    #[serde(default)]
    args: Value,
}

/// Routes sandbox requests through the guard to backends.
pub struct SyscallHandler {
    db: Arc<dyn DbBackend>,
    http: Arc<dyn HttpFetcher>,
    memory: Arc<dyn MemoryStore>,
    skills: Arc<dyn SkillInvoker>,
    rate: RateLimiter,
}

impl SyscallHandler {
    pub fn new(
        db: Arc<dyn DbBackend>,
        http: Arc<dyn HttpFetcher>,
        memory: Arc<dyn MemoryStore>,
        skills: Arc<dyn SkillInvoker>,
    ) -> Self {
        Self {
            db,
            http,
            memory,
            skills,
            rate: RateLimiter::new(),
        }
    }

    pub fn with_rate_limiter(mut self, rate: RateLimiter) -> Self {
        self.rate = rate;
        self
    }

    /// Handle one sys-call on behalf of `manifest`'s plugin.
    pub async fn handle(
        &self,
        manifest: &PluginManifest,
        method: &str,
        payload: Value,
    ) -> Result<Value, ErrorObject> {
        self.rate.check(&manifest.id)?;
        let guard = PermissionGuard::new(&manifest.id, &manifest.permissions);

        match method {
            "db.query" => self.db_query(&guard, payload).await,
            "db.getItems" => {
                let args: GetItemsArgs = parse(method, payload)?;
                guard
                    .check_db_table(&args.table, false)
                    .map_err(ErrorObject::from)?;
                self.db.get_items(&args.table, args.options).await
            }
            "db.getItem" => {
                let args: GetItemArgs = parse(method, payload)?;
                guard
                    .check_db_table(&args.table, false)
                    .map_err(ErrorObject::from)?;
                self.db.get_item(&args.table, &args.id).await
            }
            "network.fetch" => {
                let request: FetchRequest = parse(method, payload)?;
                guard
                    .check_network_url(&request.url)
                    .map_err(ErrorObject::from)?;
                let response = self.http.fetch(request).await?;
                serde_json::to_value(response).map_err(|e| invalid_args(method, e))
            }
            "log" => {
                let args: LogArgs = parse(method, payload)?;
                self.forward_log(&guard, &manifest.id, args);
                Ok(Value::Null)
            }
            "memory.get" => {
                let args: KeyArgs = parse(method, payload)?;
                guard
                    .check_memory_read(&args.key)
                    .map_err(ErrorObject::from)?;
                let value = self.memory.get(&args.key).await.map_err(ErrorObject::from)?;
                Ok(value.map(Value::String).unwrap_or(Value::Null))
            }
            "memory.set" => {
                let args: SetArgs = parse(method, payload)?;
                guard
                    .check_memory_write(&args.key)
                    .map_err(ErrorObject::from)?;
                let stored = match args.value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                self.memory
                    .set(&args.key, stored, args.ttl)
                    .await
                    .map_err(ErrorObject::from)?;
                Ok(Value::Bool(true))
            }
            "memory.delete" => {
                let args: KeyArgs = parse(method, payload)?;
                guard
                    .check_memory_write(&args.key)
                    .map_err(ErrorObject::from)?;
                let removed = self
                    .memory
                    .delete(&args.key)
                    .await
                    .map_err(ErrorObject::from)?;
                Ok(Value::Bool(removed))
            }
            "memory.list" => {
                let args: ListArgs = parse(method, payload)?;
                // Listing everything needs the wildcard read grant.
                let checked_key = args.prefix.as_deref().unwrap_or("*");
                guard
                    .check_memory_read(checked_key)
                    .map_err(ErrorObject::from)?;
                let keys = self
                    .memory
                    .list(args.prefix.as_deref(), args.limit)
                    .await
                    .map_err(ErrorObject::from)?;
                Ok(json!(keys))
            }
            "memory.ttl" => {
                let args: KeyArgs = parse(method, payload)?;
                guard
                    .check_memory_read(&args.key)
                    .map_err(ErrorObject::from)?;
                let ttl = self.memory.ttl(&args.key).await.map_err(ErrorObject::from)?;
                Ok(match ttl {
                    KeyTtl::Missing => json!(-2),
                    KeyTtl::Persistent => json!(-1),
                    KeyTtl::ExpiresIn(secs) => json!(secs),
                })
            }
            "skills.invoke" => {
                let args: InvokeSkillArgs = parse(method, payload)?;
                guard
                    .check_skill(&args.skill_name)
                    .map_err(ErrorObject::from)?;
                self.skills.invoke(&args.skill_name, args.args).await
            }
            other => Err(ErrorObject::new(
                codes::UNKNOWN_SYSCALL,
                format!("unknown sys-call '{other}'"),
            )),
        }
    }

    /// Forward a plugin log line to the host logger. Disallowed levels are
    /// dropped silently; this sys-call never fails.
    fn forward_log(&self, guard: &PermissionGuard<'_>, plugin_id: &str, args: LogArgs) {
        let Some(level) = LogLevel::parse(&args.level) else {
            debug!(plugin_id, level = %args.level, "dropping log with unknown level");
            return;
        };
        if !guard.may_log(level) {
            return;
        }
        let message = format!("[{plugin_id}] {}", args.message);
        let meta = args.meta.unwrap_or(Value::Null);
        match level {
            LogLevel::Debug => debug!(plugin_id, %meta, "{message}"),
            LogLevel::Info => info!(plugin_id, %meta, "{message}"),
            LogLevel::Warn => warn!(plugin_id, %meta, "{message}"),
            LogLevel::Error => error!(plugin_id, %meta, "{message}"),
        }
    }

    async fn db_query(
        &self,
        guard: &PermissionGuard<'_>,
        payload: Value,
    ) -> Result<Value, ErrorObject> {
        let args: QueryArgs = parse("db.query", payload)?;

        let audit = sql::audit(&args.sql).map_err(|e| {
            ErrorObject::new(codes::PERMISSION_DENIED, format!("sql rejected: {e}"))
        })?;

        if audit.tables.is_empty() {
            // Nothing extractable: only the wildcard grant may run this.
            guard
                .check_db_table("*", audit.is_write)
                .map_err(ErrorObject::from)?;
        } else {
            for table in &audit.tables {
                guard
                    .check_db_table(table, audit.is_write)
                    .map_err(ErrorObject::from)?;
            }
        }
        if guard.has_db_wildcard() {
            warn!(
                plugin_id = guard.plugin_id(),
                "wildcard db grant used for query"
            );
        }

        self.db.query(&args.sql, args.params).await
    }
}
