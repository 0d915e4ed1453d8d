//! The unified HTTP fetch engine.
//!
//! This crate is the hub of the framework: the updater and the chibit
//! resolver are both clients of it, and every request it carries mirrors
//! a full [`armature_core::NetworkEvent`] to the progressor and any
//! attached debug emitter.
//!
//! # Key Features
//!
//! - **Streaming and one-shot bodies** with automatic file sinks
//! - **Per-request retry on timeout**, bounded by the configured budget
//! - **Rich per-event telemetry**: connect time, TTFB, speed,
//!   transferred/size, lifecycle state machine
//! - **Progress throttling** for both the progressor and the emitter
//! - **Response prefix handlers** that peek at the first bytes of a
//!   response and restart the fetch against a rewritten URL
//! - **Chibit resolution**: ordered, checksum-verified chunk
//!   reassembly driven by a two-hop JSON index

pub use self::chibit::{ChibitChecksum, ChibitMetadata, ChibitType, ChibitVersion};
pub use self::engine::FetchEngine;
pub use self::handlers::{PrefixHandler, PrefixParser, PrefixValidator};
pub use self::report::ProgressReport;

mod chibit;
mod engine;
mod handlers;
mod report;
mod util;
