//! Pattern predicates shared by the guard.

/// Domain entry match: exact host, or `*.suffix` matching the suffix itself
/// and any subdomain of it.
pub fn domain_matches(entry: &str, host: &str) -> bool {
    if let Some(suffix) = entry.strip_prefix("*.") {
        return host == suffix || host.ends_with(&format!(".{suffix}"));
    }
    entry == host
}

/// Memory key entry match: `*` matches everything, `prefix:*` matches by
/// literal prefix, anything else requires exact equality.
pub fn memory_key_matches(entry: &str, key: &str) -> bool {
    if entry == "*" {
        return true;
    }
    if let Some(prefix) = entry.strip_suffix('*') {
        if prefix.ends_with(':') {
            return key.starts_with(prefix);
        }
    }
    entry == key
}

/// Skill entry match against an already-denamespaced skill name. Entries
/// ending `__*` match by literal prefix up to the wildcard; `*` matches all.
pub fn skill_matches(entry: &str, name: &str) -> bool {
    if entry == "*" {
        return true;
    }
    if let Some(prefix) = entry.strip_suffix('*') {
        if prefix.ends_with("__") {
            return name.starts_with(prefix);
        }
    }
    entry == name
}

/// Strip a `plugin__` namespace from a skill name, if present.
pub fn denamespace_skill(name: &str) -> &str {
    match name.split_once("__") {
        Some((_, local)) => local,
        None => name,
    }
}

/// Drop a trailing slash, except on the bare root.
fn normalize_path(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

/// One parsed route spec: optional verb list plus a path pattern.
#[derive(Debug, PartialEq)]
pub struct RouteSpec<'a> {
    pub verbs: Option<Vec<&'a str>>,
    pub pattern: &'a str,
}

/// Parse `"<VERBS> <pattern>"` or a bare pattern. Verbs are comma-separated
/// and uppercase by convention; the split only happens when the first token
/// looks like a verb list (no `/`).
pub fn parse_route_spec(spec: &str) -> RouteSpec<'_> {
    let spec = spec.trim();
    if let Some((head, rest)) = spec.split_once(char::is_whitespace) {
        if !head.contains('/') {
            let verbs = head.split(',').map(str::trim).filter(|v| !v.is_empty());
            return RouteSpec {
                verbs: Some(verbs.collect()),
                pattern: rest.trim(),
            };
        }
    }
    RouteSpec {
        verbs: None,
        pattern: spec,
    }
}

/// Path match for one pattern: exact after trailing-slash normalization, or
/// prefix match when the pattern ends in `/*`.
pub fn route_spec_matches(pattern: &str, path: &str) -> bool {
    let path = normalize_path(path);
    if let Some(prefix) = pattern.strip_suffix("/*") {
        // "/files/*" matches "/files" itself and anything below it.
        return path == prefix || path.starts_with(&format!("{prefix}/"));
    }
    normalize_path(pattern) == path
}
