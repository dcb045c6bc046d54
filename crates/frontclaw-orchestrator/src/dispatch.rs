//! The seam between pipelines and sandbox transports.

use async_trait::async_trait;
use frontclaw_contract::ErrorObject;
use frontclaw_sandbox::WorkerBridge;
use serde_json::Value;

/// One plugin's hook surface as the orchestrator sees it.
///
/// Production dispatchers are [`WorkerBridge`]s; tests substitute scripted
/// implementations without a sandbox.
#[async_trait]
pub trait HookDispatcher: Send + Sync {
    async fn call_hook(&self, method: &str, payload: Value)
        -> Result<Option<Value>, ErrorObject>;

    async fn stop(&self);
}

#[async_trait]
impl HookDispatcher for WorkerBridge {
    async fn call_hook(
        &self,
        method: &str,
        payload: Value,
    ) -> Result<Option<Value>, ErrorObject> {
        WorkerBridge::call_hook(self, method, payload).await
    }

    async fn stop(&self) {
        WorkerBridge::stop(self).await;
    }
}
