//! Shared contracts for the armature framework.
//!
//! Every other crate in the workspace depends on this one and nothing else
//! in the workspace, which keeps the dependency graph a strict tree:
//! the debug emitter is a pure sink, the logger mirrors into it, and the
//! fetch engine and updater consume both through the trait seams defined
//! here.
//!
//! # Contents
//!
//! - [`config`] - The in-process configuration record
//! - [`state`] - Explicit framework state (monotonic indexes, boolean flags)
//! - [`event`] - The per-request [`NetworkEvent`] telemetry record
//! - [`options`] - [`FetchOptions`] recognized by the fetch engine
//! - [`release`] - Release catalog metadata (`__upmeta__`, deploy manifests)
//! - [`usage`] - The opaque usage-stat record mirrored to the debugger
//! - [`traits`] - Capability seams: `Debugger`, `Logger`, `Checksummer`,
//!   `Fetcher`, `ProgressHandle`

pub mod algo;
pub mod config;
pub mod error;
pub mod event;
pub mod options;
pub mod release;
pub mod state;
pub mod traits;
pub mod usage;

pub use algo::{HashAlgorithm, SigAlgorithm};
pub use config::{FrameworkConfig, UpdaterAppConfig};
pub use error::{EmitError, LogError, NetError};
pub use event::{
    Headers, HttpMethod, Initiator, NetDirection, NetPriority, NetState, NetworkEvent, StepMode,
};
pub use options::FetchOptions;
pub use release::{
    DeployFile, ForgeAsset, ForgeRelease, ReleaseData, ReleaseInfo, SourceInfo, UpMeta,
};
pub use state::{FlagRegistry, FrameworkState, IndexRegistry};
pub use traits::{
    Checksummer, Debugger, Fetcher, LogLevel, LogThrough, Logger, NoopDebugger, ProgressHandle,
    Progressor,
};
pub use usage::UsageStat;

/// Wire protocol version injected into every outbound debugger envelope.
pub const PROTOCOL_VERSION: u32 = 1;
