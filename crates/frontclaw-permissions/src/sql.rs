//! Best-effort SQL auditor.
//!
//! Extracts every table reference from a query and classifies it as read or
//! write, so the sys-call handler can guard each table against the plugin's
//! `db.tables` allow-list. The extractor is regex-based and anchored on
//! FROM/JOIN/INTO/UPDATE; deeply nested subqueries that reference tables
//! outside those anchors are not caught, which is why the allow-list is
//! mandatory and the wildcard grant is reserved for privileged plugins.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SqlAuditError {
    #[error("multi-statement SQL is not allowed")]
    MultiStatement,

    #[error("empty SQL statement")]
    Empty,
}

/// Audit result: referenced tables and read/write classification.
///
/// An empty `tables` list means no reference could be extracted; callers
/// must treat that as requiring the wildcard `*` grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlAudit {
    pub tables: Vec<String>,
    pub is_write: bool,
}

fn table_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:from|join|into|update)\s+([^\s,;()]+)"#)
            .expect("table ref regex is valid")
    })
}

fn write_keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:insert|update|delete|create|alter|drop|truncate|replace)\b"#)
            .expect("write keyword regex is valid")
    })
}

fn ident_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^[A-Za-z_][A-Za-z0-9_$]*$"#).expect("ident regex is valid"))
}

/// Strip `-- …` and `/* … */` comments and elide single-quoted literals
/// (including `''` escapes), so keyword and semicolon scans cannot be fooled
/// by quoted or commented text.
fn normalize(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                out.push(' ');
            }
            b'\'' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2; // escaped quote inside the literal
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                out.push_str("''");
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }

    out
}

/// Reduce a raw table reference to a bare identifier: final dotted segment,
/// quoting stripped. Returns `None` for anything that is not a plain name.
fn clean_table_ref(raw: &str) -> Option<String> {
    let last = raw.rsplit('.').next().unwrap_or(raw);
    let cleaned: String = last
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect();
    if ident_regex().is_match(&cleaned) {
        Some(cleaned)
    } else {
        None
    }
}

/// Audit a single SQL statement.
pub fn audit(sql: &str) -> Result<SqlAudit, SqlAuditError> {
    let normalized = normalize(sql);
    let trimmed = normalized.trim().trim_end_matches(';').trim();

    if trimmed.is_empty() {
        return Err(SqlAuditError::Empty);
    }
    if trimmed.contains(';') {
        return Err(SqlAuditError::MultiStatement);
    }

    let mut tables = Vec::new();
    for cap in table_ref_regex().captures_iter(trimmed) {
        if let Some(table) = clean_table_ref(&cap[1]) {
            if !tables.contains(&table) {
                tables.push(table);
            }
        }
    }

    let is_write = write_keyword_regex().is_match(trimmed);

    Ok(SqlAudit { tables, is_write })
}
