//! Shared contracts for the frontclaw plugin host.
//!
//! Everything that crosses a crate boundary lives here: the RPC envelope and
//! its length-prefixed frame codec, the plugin manifest model, permission
//! grant types, pipeline outcomes, tool lifecycle events, and the stable
//! error codes used across the sandbox boundary.

pub mod control;
pub mod envelope;
pub mod error;
pub mod event;
pub mod frame;
pub mod hooks;
pub mod manifest;
pub mod permissions;
pub mod pipeline;

pub use control::ToolControl;
pub use envelope::{Envelope, EnvelopeKind, WireError};
pub use error::{codes, ErrorObject};
pub use event::{preview, ToolEvent, ToolSource};
pub use frame::{FrameError, FrameReader, FrameWriter};
pub use hooks::HookReply;
pub use manifest::{LoadedPlugin, ManifestError, PluginAuthor, PluginManifest, PluginVersion};
pub use permissions::{
    ApiGrant, DbAccess, DbGrant, LogGrant, LogLevel, LlmGrant, MemoryGrant, NetworkGrant,
    PermissionGrants, SocketGrant,
};
pub use pipeline::PipelineOutcome;
