//! Outcome of a pipeline stage run.

use crate::error::ErrorObject;

/// What happened when a pipeline traversed the plugin list.
///
/// `Continued` carries the (possibly transformed) value through to the next
/// stage. `Intercepted` replaces the final value and suppresses downstream
/// plugins. `Failed` aborts the request.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome<T> {
    Continued(T),
    Intercepted { value: T, plugin_id: String },
    Failed { plugin_id: String, error: ErrorObject },
}

impl<T> PipelineOutcome<T> {
    pub fn failed(plugin_id: impl Into<String>, error: ErrorObject) -> Self {
        Self::Failed {
            plugin_id: plugin_id.into(),
            error,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The carried value, unless the pipeline failed.
    pub fn into_value(self) -> Result<T, (String, ErrorObject)> {
        match self {
            Self::Continued(value) | Self::Intercepted { value, .. } => Ok(value),
            Self::Failed { plugin_id, error } => Err((plugin_id, error)),
        }
    }

    /// Plugin that intercepted, if any.
    pub fn intercepted_by(&self) -> Option<&str> {
        match self {
            Self::Intercepted { plugin_id, .. } => Some(plugin_id),
            _ => None,
        }
    }
}
