//! Late-bound skill invoker.
//!
//! The sys-call handler needs to re-enter the orchestrator for
//! `skills.invoke`, but the orchestrator is built after the handler. The
//! router breaks that cycle: the handler holds the router from the start,
//! and the router is pointed at the orchestrator once it exists. It holds a
//! weak reference, so shutdown ordering stays simple.

use crate::orchestrator::Orchestrator;
use async_trait::async_trait;
use frontclaw_contract::ErrorObject;
use frontclaw_sandbox::SkillInvoker;
use serde_json::Value;
use std::sync::{Arc, RwLock, Weak};

#[derive(Default)]
pub struct SkillRouter {
    target: RwLock<Weak<Orchestrator>>,
}

impl SkillRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Point the router at a live orchestrator.
    pub fn bind(&self, orchestrator: &Arc<Orchestrator>) {
        *self.target.write().expect("skill router lock") = Arc::downgrade(orchestrator);
    }
}

#[async_trait]
impl SkillInvoker for SkillRouter {
    async fn invoke(&self, skill_name: &str, args: Value) -> Result<Value, ErrorObject> {
        let target = self.target.read().expect("skill router lock").upgrade();
        let Some(orchestrator) = target else {
            return Err(ErrorObject::new(
                "SKILL_NOT_FOUND",
                "skill pipeline is not available",
            ));
        };
        let execution = orchestrator.execute_skill(skill_name, args).await?;
        if execution.success {
            Ok(execution.result)
        } else {
            Err(ErrorObject::new(
                "SKILL_ERROR",
                execution
                    .error
                    .unwrap_or_else(|| format!("skill '{skill_name}' failed")),
            ))
        }
    }
}
