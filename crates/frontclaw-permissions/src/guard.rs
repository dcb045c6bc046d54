//! Per-plugin capability guard.

use crate::matchers::{
    denamespace_skill, domain_matches, memory_key_matches, parse_route_spec, route_spec_matches,
    skill_matches,
};
use crate::PermissionError;
use frontclaw_contract::{DbAccess, LogLevel, PermissionGrants};
use url::Url;

/// Stateless predicate wrapper around one plugin's grants.
///
/// Constructed per sys-call or pipeline phase; holds only borrows, so it is
/// free to build.
pub struct PermissionGuard<'a> {
    plugin_id: &'a str,
    grants: &'a PermissionGrants,
}

impl<'a> PermissionGuard<'a> {
    pub fn new(plugin_id: &'a str, grants: &'a PermissionGrants) -> Self {
        Self { plugin_id, grants }
    }

    pub fn plugin_id(&self) -> &str {
        self.plugin_id
    }

    fn deny(&self, permission: &str, action: impl Into<String>) -> PermissionError {
        PermissionError::new(self.plugin_id, permission, action)
    }

    // ── db ────────────────────────────────────────────────

    /// Check access to one table. `write` requires the `read-write` grant.
    pub fn check_db_table(&self, table: &str, write: bool) -> Result<(), PermissionError> {
        let verb = if write { "write" } else { "read" };
        let grant = self
            .grants
            .db
            .as_ref()
            .ok_or_else(|| self.deny("db", format!("{verb} table '{table}'")))?;

        let allowed = grant
            .tables
            .iter()
            .any(|t| t == "*" || t == table);
        if !allowed {
            return Err(self.deny("db.tables", format!("{verb} table '{table}'")));
        }
        if write && grant.access != DbAccess::ReadWrite {
            return Err(self.deny("db.access", format!("write table '{table}'")));
        }
        Ok(())
    }

    /// True iff the plugin holds the unrestricted `"*"` table grant.
    pub fn has_db_wildcard(&self) -> bool {
        self.grants
            .db
            .as_ref()
            .map(|g| g.tables.iter().any(|t| t == "*"))
            .unwrap_or(false)
    }

    // ── network ───────────────────────────────────────────

    pub fn check_network_url(&self, raw_url: &str) -> Result<(), PermissionError> {
        let grant = self
            .grants
            .network
            .as_ref()
            .ok_or_else(|| self.deny("network", format!("fetch '{raw_url}'")))?;

        if grant.allow_all {
            return Ok(());
        }

        let url = Url::parse(raw_url)
            .map_err(|_| self.deny("network", format!("fetch invalid URL '{raw_url}'")))?;
        let host = url
            .host_str()
            .ok_or_else(|| self.deny("network", format!("fetch URL without host '{raw_url}'")))?;

        if grant
            .allowed_domains
            .iter()
            .any(|entry| domain_matches(entry, host))
        {
            Ok(())
        } else {
            Err(self.deny("network.allowed_domains", format!("fetch host '{host}'")))
        }
    }

    // ── llm ───────────────────────────────────────────────

    pub fn can_intercept_task(&self) -> bool {
        self.grants
            .llm
            .as_ref()
            .map(|g| g.can_intercept_task)
            .unwrap_or(false)
    }

    pub fn can_modify_prompt(&self) -> bool {
        self.grants
            .llm
            .as_ref()
            .map(|g| g.can_modify_prompt)
            .unwrap_or(false)
    }

    pub fn can_modify_system_message(&self) -> bool {
        self.grants
            .llm
            .as_ref()
            .map(|g| g.can_modify_system_message)
            .unwrap_or(false)
    }

    pub fn can_modify_response(&self) -> bool {
        self.grants
            .llm
            .as_ref()
            .map(|g| g.can_modify_response)
            .unwrap_or(false)
    }

    // ── memory ────────────────────────────────────────────

    pub fn check_memory_read(&self, key: &str) -> Result<(), PermissionError> {
        let grant = self
            .grants
            .memory
            .as_ref()
            .ok_or_else(|| self.deny("memory", format!("read key '{key}'")))?;
        if grant.read.iter().any(|e| memory_key_matches(e, key)) {
            Ok(())
        } else {
            Err(self.deny("memory.read", format!("read key '{key}'")))
        }
    }

    pub fn check_memory_write(&self, key: &str) -> Result<(), PermissionError> {
        let grant = self
            .grants
            .memory
            .as_ref()
            .ok_or_else(|| self.deny("memory", format!("write key '{key}'")))?;
        if grant.write.iter().any(|e| memory_key_matches(e, key)) {
            Ok(())
        } else {
            Err(self.deny("memory.write", format!("write key '{key}'")))
        }
    }

    // ── skills ────────────────────────────────────────────

    /// Check skill access. `plugin__name` is reduced to `name` before
    /// matching, so grants are written against local skill names.
    pub fn check_skill(&self, skill_name: &str) -> Result<(), PermissionError> {
        let local = denamespace_skill(skill_name);
        let grant = self
            .grants
            .skills
            .as_ref()
            .ok_or_else(|| self.deny("skills", format!("invoke skill '{skill_name}'")))?;
        if grant.iter().any(|e| skill_matches(e, local)) {
            Ok(())
        } else {
            Err(self.deny("skills", format!("invoke skill '{skill_name}'")))
        }
    }

    // ── api routes ────────────────────────────────────────

    /// Check an inbound HTTP request against the route grants.
    ///
    /// The first spec whose pattern matches the path decides: its own verb
    /// list if it has one, else the grant-level `methods`, else any verb.
    pub fn check_api_route(&self, method: &str, path: &str) -> Result<(), PermissionError> {
        let grant = self
            .grants
            .api
            .as_ref()
            .ok_or_else(|| self.deny("api", format!("{method} {path}")))?;

        for spec in &grant.routes {
            let parsed = parse_route_spec(spec);
            if !route_spec_matches(parsed.pattern, path) {
                continue;
            }
            let verb_ok = match &parsed.verbs {
                Some(verbs) => verbs.iter().any(|v| v.eq_ignore_ascii_case(method)),
                None => match &grant.methods {
                    Some(methods) => methods.iter().any(|m| m.eq_ignore_ascii_case(method)),
                    None => true,
                },
            };
            if verb_ok {
                return Ok(());
            }
            return Err(self.deny("api.routes", format!("{method} {path}")));
        }
        Err(self.deny("api.routes", format!("{method} {path}")))
    }

    // ── socket ────────────────────────────────────────────

    pub fn can_intercept_socket(&self) -> bool {
        self.grants
            .socket
            .as_ref()
            .map(|g| g.can_intercept)
            .unwrap_or(false)
    }

    pub fn can_emit_socket(&self) -> bool {
        self.grants
            .socket
            .as_ref()
            .map(|g| g.can_emit)
            .unwrap_or(false)
    }

    /// True when the plugin declared interest in this socket event.
    pub fn sees_socket_event(&self, event: &str) -> bool {
        self.grants
            .socket
            .as_ref()
            .map(|g| g.events.iter().any(|e| e == "*" || e == event))
            .unwrap_or(false)
    }

    // ── log ───────────────────────────────────────────────

    pub fn may_log(&self, level: LogLevel) -> bool {
        match &self.grants.log {
            Some(grant) => grant.enabled && (grant.levels.is_empty() || grant.levels.contains(&level)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frontclaw_contract::{ApiGrant, DbGrant, MemoryGrant, NetworkGrant, SocketGrant};

    fn grants() -> PermissionGrants {
        PermissionGrants {
            db: Some(DbGrant {
                tables: vec!["items".into(), "tags".into()],
                access: DbAccess::ReadOnly,
            }),
            network: Some(NetworkGrant {
                allowed_domains: vec!["api.example.com".into(), "*.trusted.io".into()],
                allow_all: false,
            }),
            memory: Some(MemoryGrant {
                read: vec!["profile:*".into()],
                write: vec!["profile:*".into()],
            }),
            skills: Some(vec!["summarize".into(), "web__*".into()]),
            api: Some(ApiGrant {
                routes: vec!["GET /status".into(), "/files/*".into()],
                methods: Some(vec!["GET".into(), "POST".into()]),
            }),
            socket: Some(SocketGrant {
                can_intercept: true,
                can_emit: false,
                events: vec!["chat".into()],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn db_read_allowed_write_denied() {
        let g = grants();
        let guard = PermissionGuard::new("p", &g);
        assert!(guard.check_db_table("items", false).is_ok());
        let err = guard.check_db_table("items", true).unwrap_err();
        assert_eq!(err.permission, "db.access");
        let err = guard.check_db_table("users", false).unwrap_err();
        assert_eq!(err.permission, "db.tables");
    }

    #[test]
    fn absent_db_grant_denies() {
        let g = PermissionGrants::default();
        let guard = PermissionGuard::new("p", &g);
        let err = guard.check_db_table("items", false).unwrap_err();
        assert_eq!(err.permission, "db");
        assert_eq!(err.plugin_id, "p");
    }

    #[test]
    fn network_exact_wildcard_and_denied() {
        let g = grants();
        let guard = PermissionGuard::new("p", &g);
        assert!(guard.check_network_url("https://api.example.com/v1").is_ok());
        assert!(guard.check_network_url("https://sub.trusted.io/x").is_ok());
        assert!(guard.check_network_url("https://trusted.io/x").is_ok());
        assert!(guard.check_network_url("https://evil.com").is_err());
        assert!(guard.check_network_url("not a url").is_err());
    }

    #[test]
    fn allow_all_short_circuits() {
        let g = PermissionGrants {
            network: Some(NetworkGrant {
                allowed_domains: vec![],
                allow_all: true,
            }),
            ..Default::default()
        };
        let guard = PermissionGuard::new("p", &g);
        assert!(guard.check_network_url("https://anything.example").is_ok());
    }

    #[test]
    fn memory_namespace_prefix() {
        let g = grants();
        let guard = PermissionGuard::new("p", &g);
        assert!(guard.check_memory_write("profile:42").is_ok());
        assert!(guard.check_memory_read("profile:42").is_ok());
        let err = guard.check_memory_read("other:1").unwrap_err();
        assert_eq!(err.permission, "memory.read");
    }

    #[test]
    fn skill_namespace_stripping() {
        let g = grants();
        let guard = PermissionGuard::new("p", &g);
        assert!(guard.check_skill("summarize").is_ok());
        assert!(guard.check_skill("helper__summarize").is_ok());
        assert!(guard.check_skill("web__search").is_err());
        // web__* entry matches local names that start with "web__".
        assert!(guard.check_skill("other__web__scrape").is_ok());
    }

    #[test]
    fn api_route_verb_resolution() {
        let g = grants();
        let guard = PermissionGuard::new("p", &g);
        // Spec-level verbs win.
        assert!(guard.check_api_route("GET", "/status").is_ok());
        assert!(guard.check_api_route("DELETE", "/status").is_err());
        // Bare pattern falls back to grant-level methods.
        assert!(guard.check_api_route("POST", "/files/a").is_ok());
        assert!(guard.check_api_route("DELETE", "/files/a").is_err());
        // No matching pattern at all.
        assert!(guard.check_api_route("GET", "/admin").is_err());
    }

    #[test]
    fn api_route_any_verb_without_methods() {
        let g = PermissionGrants {
            api: Some(ApiGrant {
                routes: vec!["/hook".into()],
                methods: None,
            }),
            ..Default::default()
        };
        let guard = PermissionGuard::new("p", &g);
        assert!(guard.check_api_route("PATCH", "/hook").is_ok());
    }

    #[test]
    fn socket_event_visibility() {
        let g = grants();
        let guard = PermissionGuard::new("p", &g);
        assert!(guard.can_intercept_socket());
        assert!(!guard.can_emit_socket());
        assert!(guard.sees_socket_event("chat"));
        assert!(!guard.sees_socket_event("presence"));
    }

    #[test]
    fn llm_flags_default_closed() {
        let g = PermissionGrants::default();
        let guard = PermissionGuard::new("p", &g);
        assert!(!guard.can_modify_prompt());
        assert!(!guard.can_intercept_task());
        assert!(!guard.can_modify_response());
    }

    #[test]
    fn log_levels() {
        use frontclaw_contract::LogGrant;
        let g = PermissionGrants {
            log: Some(LogGrant {
                enabled: true,
                levels: vec![LogLevel::Info, LogLevel::Error],
            }),
            ..Default::default()
        };
        let guard = PermissionGuard::new("p", &g);
        assert!(guard.may_log(LogLevel::Info));
        assert!(!guard.may_log(LogLevel::Debug));

        let none = PermissionGrants::default();
        let guard = PermissionGuard::new("p", &none);
        assert!(!guard.may_log(LogLevel::Error));
    }
}
