//! Capability enforcement for the frontclaw plugin host.
//!
//! A [`PermissionGuard`] wraps one plugin's manifest grants and answers
//! per-call questions: may this plugin touch this table, this host, this
//! memory key, this skill, this route, this socket event? Every predicate is
//! fail-closed: an absent grant or an empty pattern list denies.
//!
//! The [`sql`] module is the best-effort SQL auditor paired with the
//! `db.tables` allow-list. It is called by the sys-call handler, not by the
//! guard itself.

mod guard;
mod matchers;
pub mod sql;

pub use guard::PermissionGuard;
pub use matchers::{domain_matches, memory_key_matches, route_spec_matches, skill_matches};

use frontclaw_contract::{codes, ErrorObject};
use thiserror::Error;

/// A denied capability check.
///
/// Carries the plugin, the grant path that failed, and a description of the
/// attempted action, enough for an operator to write the missing grant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("plugin '{plugin_id}' denied by '{permission}': {action}")]
pub struct PermissionError {
    pub plugin_id: String,
    /// Dotted grant path, e.g. `db.tables` or `memory.write`.
    pub permission: String,
    /// Human-readable action description, e.g. `write table 'items'`.
    pub action: String,
}

impl PermissionError {
    pub fn new(
        plugin_id: impl Into<String>,
        permission: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            permission: permission.into(),
            action: action.into(),
        }
    }
}

impl From<PermissionError> for ErrorObject {
    fn from(err: PermissionError) -> Self {
        ErrorObject::new(codes::PERMISSION_DENIED, err.to_string())
    }
}
