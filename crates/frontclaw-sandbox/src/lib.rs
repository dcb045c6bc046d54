//! Sandbox ownership and the permissioned sys-call surface.
//!
//! A [`WorkerBridge`] owns exactly one sandboxed worker process (or an
//! attached in-process transport), dispatches hook calls into it, and
//! services the sys-calls it sends back through the [`SyscallHandler`].
//! Every sys-call is rate-limited and checked against the caller's manifest
//! before it reaches a backend.

mod backend;
mod bridge;
mod rate_limit;
mod syscall;

pub use backend::{
    DbBackend, DbQueryOptions, FetchRequest, FetchResponse, HttpFetcher, ReqwestFetcher,
    SkillInvoker,
};
pub use bridge::{BridgeConfig, WorkerBridge};
pub use rate_limit::RateLimiter;
pub use syscall::SyscallHandler;
