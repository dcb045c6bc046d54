//! Host-side ownership of one sandboxed worker.
//!
//! The bridge spawns (or attaches to) the sandbox transport, performs the
//! ready/INIT handshake, owns the id → pending-call table, and mediates both
//! directions of traffic: hook calls out, sys-calls in. All pending calls are
//! settled exactly once; late responses are dropped.

use crate::syscall::SyscallHandler;
use frontclaw_contract::{
    codes, Envelope, EnvelopeKind, ErrorObject, FrameReader, FrameWriter, LoadedPlugin, WireError,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Timeouts and the sandbox launch command.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Deadline for each hook call.
    pub hook_timeout: Duration,
    /// Deadline for servicing one sys-call.
    pub syscall_timeout: Duration,
    /// Deadline for the SANDBOX_READY signal after spawn.
    pub ready_timeout: Duration,
    /// Sandbox runner command; the plugin entry path is appended as the
    /// final argument.
    pub sandbox_command: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hook_timeout: Duration::from_secs(5),
            syscall_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(5),
            sandbox_command: vec!["frontclaw-sandbox-runner".to_string()],
        }
    }
}

type PendingReply = Result<Option<Value>, ErrorObject>;
type PendingMap = Arc<StdMutex<HashMap<Uuid, oneshot::Sender<PendingReply>>>>;

#[derive(Debug)]
struct Active {
    writer_tx: mpsc::UnboundedSender<Envelope>,
    child: Option<tokio::process::Child>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

fn worker_stopped() -> ErrorObject {
    ErrorObject::new(codes::WORKER_STOPPED, "worker is not running")
}

/// Exclusive owner of one sandbox.
#[derive(Debug)]
pub struct WorkerBridge {
    plugin: Arc<LoadedPlugin>,
    config: BridgeConfig,
    pending: PendingMap,
    state: Mutex<Option<Active>>,
}

impl WorkerBridge {
    /// Spawn the sandbox process for `plugin` and complete the handshake.
    pub async fn spawn(
        plugin: Arc<LoadedPlugin>,
        handler: Arc<SyscallHandler>,
        config: BridgeConfig,
    ) -> Result<Self, ErrorObject> {
        let program = config.sandbox_command.first().cloned().ok_or_else(|| {
            ErrorObject::new(codes::INIT_FAILED, "sandbox command is empty")
        })?;

        let mut child = tokio::process::Command::new(&program)
            .args(&config.sandbox_command[1..])
            .arg(&plugin.entry)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ErrorObject::new(
                    codes::INIT_FAILED,
                    format!("failed to spawn sandbox '{program}': {e}"),
                )
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ErrorObject::new(codes::INIT_FAILED, "sandbox stdin unavailable")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ErrorObject::new(codes::INIT_FAILED, "sandbox stdout unavailable")
        })?;

        Self::start(plugin, handler, config, stdout, stdin, Some(child)).await
    }

    /// Attach to a pre-connected transport (tests, embedded runtimes). The
    /// handshake is identical to the spawned path.
    pub async fn attach<R, W>(
        plugin: Arc<LoadedPlugin>,
        handler: Arc<SyscallHandler>,
        config: BridgeConfig,
        read: R,
        write: W,
    ) -> Result<Self, ErrorObject>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(plugin, handler, config, read, write, None).await
    }

    async fn start<R, W>(
        plugin: Arc<LoadedPlugin>,
        handler: Arc<SyscallHandler>,
        config: BridgeConfig,
        read: R,
        write: W,
        child: Option<tokio::process::Child>,
    ) -> Result<Self, ErrorObject>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = FrameReader::new(read);
        let mut writer = FrameWriter::new(write);

        // Phase 1: the worker announces itself.
        wait_for_ready(&mut reader, config.ready_timeout, plugin.id()).await?;

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Envelope>();

        let writer_handle = tokio::spawn(async move {
            while let Some(envelope) = writer_rx.recv().await {
                if let Err(e) = writer.write(&envelope).await {
                    debug!(error = %e, "sandbox writer closed");
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(reader_loop(
            reader,
            pending.clone(),
            writer_tx.clone(),
            handler,
            plugin.clone(),
            config.syscall_timeout,
        ));

        let bridge = Self {
            plugin,
            config,
            pending,
            state: Mutex::new(Some(Active {
                writer_tx,
                child,
                reader_handle,
                writer_handle,
            })),
        };

        // Phase 2: deliver runtime context and wait for the acknowledgement.
        let init_payload = json!({
            "pluginId": bridge.plugin.id(),
            "config": bridge.plugin.config,
            "permissions": bridge.plugin.manifest.permissions.to_value(),
        });
        bridge
            .request(Envelope::init(init_payload), bridge.config.hook_timeout)
            .await
            .map_err(|e| {
                ErrorObject::new(
                    codes::INIT_FAILED,
                    format!("plugin '{}' init failed: {}", bridge.plugin.id(), e.message),
                )
            })?;

        Ok(bridge)
    }

    pub fn plugin(&self) -> &Arc<LoadedPlugin> {
        &self.plugin
    }

    /// Invoke a hook. Returns the hook's result, `None` when the plugin did
    /// not return a value. Times out with `HOOK_TIMEOUT`; the worker is left
    /// alive and a late reply is dropped.
    pub async fn call_hook(
        &self,
        method: &str,
        payload: Value,
    ) -> Result<Option<Value>, ErrorObject> {
        let envelope = Envelope::hook(method, payload);
        match self.request(envelope, self.config.hook_timeout).await {
            Err(err) if err.code == "REQUEST_TIMEOUT" => Err(ErrorObject::new(
                codes::HOOK_TIMEOUT,
                format!("hook '{method}' timed out on plugin '{}'", self.plugin.id()),
            )),
            other => other,
        }
    }

    async fn request(
        &self,
        envelope: Envelope,
        deadline: Duration,
    ) -> Result<Option<Value>, ErrorObject> {
        let id = envelope.id;
        let rx = {
            let state = self.state.lock().await;
            let Some(active) = state.as_ref() else {
                return Err(worker_stopped());
            };
            let (tx, rx) = oneshot::channel();
            self.pending.lock().expect("pending lock").insert(id, tx);
            if active.writer_tx.send(envelope).is_err() {
                self.pending.lock().expect("pending lock").remove(&id);
                return Err(worker_stopped());
            }
            rx
        };

        match timeout(deadline, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(worker_stopped()),
            Err(_) => {
                self.pending.lock().expect("pending lock").remove(&id);
                Err(ErrorObject::new("REQUEST_TIMEOUT", "request timed out"))
            }
        }
    }

    /// Stop the worker: best-effort `onUnload`, cancel every pending call
    /// with `WORKER_STOPPED`, terminate the process. Safe to call twice.
    pub async fn stop(&self) {
        // Only proceed if still active; keeps shutdown idempotent.
        if self.state.lock().await.is_none() {
            return;
        }

        if let Err(e) = self
            .call_hook(frontclaw_contract::hooks::ON_UNLOAD, Value::Null)
            .await
        {
            debug!(plugin_id = self.plugin.id(), error = %e, "onUnload failed during stop");
        }

        let Some(mut active) = self.state.lock().await.take() else {
            return;
        };

        let cancelled: Vec<_> = {
            let mut pending = self.pending.lock().expect("pending lock");
            pending.drain().collect()
        };
        for (_, tx) in cancelled {
            let _ = tx.send(Err(ErrorObject::new(
                codes::WORKER_STOPPED,
                "bridge shut down",
            )));
        }

        // Close the writer channel first so the writer task drains and drops
        // the stream, then the worker sees EOF; only then abort the reader.
        drop(active.writer_tx);
        let _ = active.writer_handle.await;
        if let Some(mut child) = active.child.take() {
            let _ = child.kill().await;
        }
        active.reader_handle.abort();
    }
}

async fn wait_for_ready<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    deadline: Duration,
    plugin_id: &str,
) -> Result<(), ErrorObject> {
    let ready = timeout(deadline, async {
        loop {
            match reader.read().await {
                Ok(Some(env)) if env.kind == EnvelopeKind::SandboxReady => return Ok(()),
                Ok(Some(env)) => {
                    debug!(plugin_id, kind = ?env.kind, "ignoring pre-ready message");
                }
                Ok(None) => return Err("sandbox closed the stream before ready".to_string()),
                Err(e) => return Err(e.to_string()),
            }
        }
    })
    .await;

    match ready {
        Ok(Ok(())) => Ok(()),
        Ok(Err(msg)) => Err(ErrorObject::new(codes::SANDBOX_READY_TIMEOUT, msg)),
        Err(_) => Err(ErrorObject::new(
            codes::SANDBOX_READY_TIMEOUT,
            format!("plugin '{plugin_id}' sandbox not ready in time"),
        )),
    }
}

async fn reader_loop<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    pending: PendingMap,
    writer_tx: mpsc::UnboundedSender<Envelope>,
    handler: Arc<SyscallHandler>,
    plugin: Arc<LoadedPlugin>,
    syscall_timeout: Duration,
) {
    loop {
        match reader.read().await {
            Ok(Some(envelope)) => {
                handle_message(
                    envelope,
                    &pending,
                    &writer_tx,
                    &handler,
                    &plugin,
                    syscall_timeout,
                );
            }
            Ok(None) => {
                debug!(plugin_id = plugin.id(), "sandbox stream closed");
                break;
            }
            Err(e) => {
                warn!(plugin_id = plugin.id(), error = %e, "sandbox stream error");
                break;
            }
        }
    }

    // The worker is gone; everything in flight fails.
    let orphaned: Vec<_> = {
        let mut map = pending.lock().expect("pending lock");
        map.drain().collect()
    };
    for (_, tx) in orphaned {
        let _ = tx.send(Err(ErrorObject::new(
            codes::WORKER_STOPPED,
            "worker exited",
        )));
    }
}

fn handle_message(
    envelope: Envelope,
    pending: &PendingMap,
    writer_tx: &mpsc::UnboundedSender<Envelope>,
    handler: &Arc<SyscallHandler>,
    plugin: &Arc<LoadedPlugin>,
    syscall_timeout: Duration,
) {
    match envelope.kind {
        EnvelopeKind::Response | EnvelopeKind::Error => {
            let entry = pending.lock().expect("pending lock").remove(&envelope.id);
            let Some(tx) = entry else {
                debug!(plugin_id = plugin.id(), id = %envelope.id, "dropping late reply");
                return;
            };
            let reply = match envelope.kind {
                EnvelopeKind::Response => {
                    Ok(envelope.result.filter(|v| !v.is_null()))
                }
                _ => {
                    let wire = envelope.error.unwrap_or_else(|| {
                        WireError::new(codes::HOOK_ERROR, "worker sent an empty error")
                    });
                    // Any stack text stays host-side, at most in this log line.
                    if wire.stack.is_some() {
                        debug!(plugin_id = plugin.id(), code = %wire.code, "worker error carried stack text");
                    }
                    Err(ErrorObject::new(wire.code, wire.message))
                }
            };
            let _ = tx.send(reply);
        }

        EnvelopeKind::SysCall => {
            let Some(method) = envelope.method.clone() else {
                let err = WireError::new("INVALID_ARGUMENTS", "sys-call without method");
                let _ = writer_tx.send(Envelope::error(envelope.id, &err));
                return;
            };
            let payload = envelope.payload.clone().unwrap_or(Value::Null);
            let handler = handler.clone();
            let plugin = plugin.clone();
            let writer_tx = writer_tx.clone();
            let id = envelope.id;
            tokio::spawn(async move {
                let outcome = timeout(
                    syscall_timeout,
                    handler.handle(&plugin.manifest, &method, payload),
                )
                .await;
                let reply = match outcome {
                    Ok(Ok(value)) => Envelope::response(id, value),
                    Ok(Err(err)) => {
                        debug!(plugin_id = plugin.id(), method = %method, code = %err.code, "sys-call failed");
                        Envelope::error(id, &WireError::new(err.code, err.message))
                    }
                    Err(_) => Envelope::error(
                        id,
                        &WireError::new("SYSCALL_TIMEOUT", format!("sys-call '{method}' timed out")),
                    ),
                };
                let _ = writer_tx.send(reply);
            });
        }

        kind => {
            warn!(plugin_id = plugin.id(), ?kind, "unexpected message from worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DbBackend, DbQueryOptions, FetchRequest, FetchResponse, HttpFetcher, SkillInvoker};
    use async_trait::async_trait;
    use frontclaw_contract::{hooks, MemoryGrant, PermissionGrants, PluginManifest, PluginVersion};
    use frontclaw_memory::InMemoryStore;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    struct NullDb;

    #[async_trait]
    impl DbBackend for NullDb {
        async fn query(&self, _sql: &str, _params: Vec<Value>) -> Result<Value, ErrorObject> {
            Ok(Value::Null)
        }
        async fn get_items(&self, _t: &str, _o: DbQueryOptions) -> Result<Value, ErrorObject> {
            Ok(Value::Null)
        }
        async fn get_item(&self, _t: &str, _id: &Value) -> Result<Value, ErrorObject> {
            Ok(Value::Null)
        }
    }

    struct NullFetch;

    #[async_trait]
    impl HttpFetcher for NullFetch {
        async fn fetch(&self, _r: FetchRequest) -> Result<FetchResponse, ErrorObject> {
            Err(ErrorObject::new("FETCH_ERROR", "offline"))
        }
    }

    struct NullSkills;

    #[async_trait]
    impl SkillInvoker for NullSkills {
        async fn invoke(&self, _s: &str, _a: Value) -> Result<Value, ErrorObject> {
            Err(ErrorObject::new("SKILL_NOT_FOUND", "no skills"))
        }
    }

    fn test_plugin() -> Arc<LoadedPlugin> {
        Arc::new(LoadedPlugin {
            manifest: PluginManifest {
                id: "echo".into(),
                name: "Echo".into(),
                version: PluginVersion::parse("1.0.0").unwrap(),
                main: "index.js".into(),
                permissions: PermissionGrants {
                    memory: Some(MemoryGrant {
                        read: vec!["echo:*".into()],
                        write: vec!["echo:*".into()],
                    }),
                    ..Default::default()
                },
                description: None,
                author: None,
                priority: 100,
                config_schema: None,
                default_config: Default::default(),
                min_frontclaw_version: None,
                tags: vec![],
                enabled: true,
            },
            dir: "/plugins/echo".into(),
            entry: "/plugins/echo/index.js".into(),
            config: Default::default(),
        })
    }

    fn test_handler() -> Arc<SyscallHandler> {
        Arc::new(SyscallHandler::new(
            Arc::new(NullDb),
            Arc::new(NullFetch),
            Arc::new(InMemoryStore::new()),
            Arc::new(NullSkills),
        ))
    }

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            hook_timeout: Duration::from_millis(300),
            syscall_timeout: Duration::from_millis(300),
            ready_timeout: Duration::from_millis(300),
            sandbox_command: vec!["unused".into()],
        }
    }

    struct FakeWorker {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    /// A scripted worker on the far end of a duplex pipe. Performs the
    /// ready/INIT handshake, then hands control to the test.
    async fn connect_worker(
        plugin: Arc<LoadedPlugin>,
        handler: Arc<SyscallHandler>,
        config: BridgeConfig,
    ) -> (WorkerBridge, FakeWorker) {
        let (host_side, worker_side) = tokio::io::duplex(64 * 1024);
        let (host_read, host_write) = tokio::io::split(host_side);
        let (worker_read, worker_write) = tokio::io::split(worker_side);

        let worker_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(worker_read);
            let mut writer = FrameWriter::new(worker_write);
            writer.write(&Envelope::sandbox_ready()).await.unwrap();
            let init = reader.read().await.unwrap().unwrap();
            assert_eq!(init.kind, EnvelopeKind::Init);
            writer
                .write(&Envelope::response(init.id, json!(true)))
                .await
                .unwrap();
            FakeWorker { reader, writer }
        });

        let bridge = WorkerBridge::attach(plugin, handler, config, host_read, host_write)
            .await
            .unwrap();
        let worker = worker_task.await.unwrap();
        (bridge, worker)
    }

    #[tokio::test]
    async fn handshake_and_hook_roundtrip() {
        let (bridge, mut worker) =
            connect_worker(test_plugin(), test_handler(), fast_config()).await;

        let worker_task = tokio::spawn(async move {
            let hook = worker.reader.read().await.unwrap().unwrap();
            assert_eq!(hook.kind, EnvelopeKind::Hook);
            assert_eq!(hook.method.as_deref(), Some(hooks::ON_PROMPT_RECEIVED));
            worker
                .writer
                .write(&Envelope::response(hook.id, json!("rewritten")))
                .await
                .unwrap();
        });

        let result = bridge
            .call_hook(hooks::ON_PROMPT_RECEIVED, json!({"prompt": "hi"}))
            .await
            .unwrap();
        assert_eq!(result, Some(json!("rewritten")));
        worker_task.await.unwrap();
        bridge.stop().await;
    }

    #[tokio::test]
    async fn ready_timeout_when_worker_stays_silent() {
        let (host_side, _worker_side) = tokio::io::duplex(1024);
        let (host_read, host_write) = tokio::io::split(host_side);

        let err = WorkerBridge::attach(
            test_plugin(),
            test_handler(),
            fast_config(),
            host_read,
            host_write,
        )
        .await
        .unwrap_err();
        assert!(err.is(codes::SANDBOX_READY_TIMEOUT));
    }

    #[tokio::test]
    async fn hook_timeout_leaves_worker_alive() {
        let (bridge, mut worker) =
            connect_worker(test_plugin(), test_handler(), fast_config()).await;

        // The worker reads the hook but never answers it.
        let worker_task = tokio::spawn(async move {
            let hook = worker.reader.read().await.unwrap().unwrap();
            (worker, hook)
        });

        let err = bridge
            .call_hook(hooks::GET_TOOLS, Value::Null)
            .await
            .unwrap_err();
        assert!(err.is(codes::HOOK_TIMEOUT));

        // A late reply is dropped; the bridge still services new calls.
        let (mut worker, stale_hook) = worker_task.await.unwrap();
        worker
            .writer
            .write(&Envelope::response(stale_hook.id, json!("late")))
            .await
            .unwrap();

        let worker_task = tokio::spawn(async move {
            let hook = worker.reader.read().await.unwrap().unwrap();
            worker
                .writer
                .write(&Envelope::response(hook.id, json!("fresh")))
                .await
                .unwrap();
        });
        let result = bridge.call_hook(hooks::GET_SKILLS, Value::Null).await.unwrap();
        assert_eq!(result, Some(json!("fresh")));
        worker_task.await.unwrap();
        bridge.stop().await;
    }

    #[tokio::test]
    async fn syscall_is_serviced_through_the_handler() {
        let (bridge, mut worker) =
            connect_worker(test_plugin(), test_handler(), fast_config()).await;

        let worker_task = tokio::spawn(async move {
            let call = Envelope::sys_call(
                "memory.set",
                json!({"key": "echo:greeting", "value": "hello"}),
            );
            worker.writer.write(&call).await.unwrap();
            let reply = worker.reader.read().await.unwrap().unwrap();
            assert_eq!(reply.id, call.id);
            assert_eq!(reply.kind, EnvelopeKind::Response);

            let get = Envelope::sys_call("memory.get", json!({"key": "echo:greeting"}));
            worker.writer.write(&get).await.unwrap();
            let reply = worker.reader.read().await.unwrap().unwrap();
            assert_eq!(reply.result, Some(json!("hello")));
        });

        worker_task.await.unwrap();
        bridge.stop().await;
    }

    #[tokio::test]
    async fn denied_syscall_returns_error_without_stack() {
        let (bridge, mut worker) =
            connect_worker(test_plugin(), test_handler(), fast_config()).await;

        let worker_task = tokio::spawn(async move {
            let call = Envelope::sys_call("memory.get", json!({"key": "other:1"}));
            worker.writer.write(&call).await.unwrap();
            let reply = worker.reader.read().await.unwrap().unwrap();
            assert_eq!(reply.kind, EnvelopeKind::Error);
            let err = reply.error.unwrap();
            assert_eq!(err.code, codes::PERMISSION_DENIED);
            assert!(err.stack.is_none());
        });

        worker_task.await.unwrap();
        bridge.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_pending_and_is_idempotent() {
        let (bridge, mut worker) =
            connect_worker(test_plugin(), test_handler(), fast_config()).await;
        let bridge = Arc::new(bridge);

        // Swallow everything the host sends (including onUnload) silently.
        let worker_task = tokio::spawn(async move {
            while let Ok(Some(_)) = worker.reader.read().await {}
        });

        let caller = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.call_hook(hooks::GET_TOOLS, Value::Null).await })
        };
        // Give the hook a moment to register as pending.
        tokio::time::sleep(Duration::from_millis(20)).await;

        bridge.stop().await;
        let result = caller.await.unwrap();
        let err = result.unwrap_err();
        assert!(err.is(codes::WORKER_STOPPED) || err.is(codes::HOOK_TIMEOUT));

        // Second stop is a no-op.
        bridge.stop().await;
        worker_task.abort();
    }

    #[tokio::test]
    async fn calls_after_stop_fail_fast() {
        let (bridge, mut worker) =
            connect_worker(test_plugin(), test_handler(), fast_config()).await;
        let worker_task = tokio::spawn(async move {
            while let Ok(Some(_)) = worker.reader.read().await {}
        });

        bridge.stop().await;
        let err = bridge
            .call_hook(hooks::GET_TOOLS, Value::Null)
            .await
            .unwrap_err();
        assert!(err.is(codes::WORKER_STOPPED));
        worker_task.abort();
    }
}
