//! armature: an application framework for programs that fetch remote
//! resources, verify and apply their own updates, and mirror live
//! telemetry to an out-of-process debugger.
//!
//! [`Framework::new`] wires the components in dependency order: the debug
//! emitter has no upward dependencies and is injected everywhere as a
//! pure sink; the logger mirrors into it; the fetch engine is the hub the
//! updater and chibit resolver are clients of.
//!
//! ```no_run
//! use armature::{Fetcher, Framework, FrameworkConfig, ProgressHandle};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let fw = Framework::new(FrameworkConfig::default());
//! fw.debugger.activate().await?;
//! let report = fw.net.fetch_body("https://example.com/").await?;
//! println!("{}", report.content().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub use armature_core::{
    Checksummer, Debugger, EmitError, Fetcher, FetchOptions, FrameworkConfig, FrameworkState,
    HashAlgorithm, Headers, HttpMethod, Initiator, LogError, LogLevel, LogThrough, Logger,
    NetDirection, NetError, NetPriority, NetState, NetworkEvent, ProgressHandle, Progressor,
    ReleaseInfo, SigAlgorithm, SourceInfo, StepMode, UpMeta, UpdaterAppConfig, UsageStat,
    PROTOCOL_VERSION,
};
pub use armature_debug::DebugEmitter;
pub use armature_fetch::{FetchEngine, PrefixHandler, ProgressReport};
pub use armature_log::FileLogger;
pub use armature_update::{UpdateError, Updater};
pub use armature_verify::Checker;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// The assembled framework: construct once, share by reference.
pub struct Framework {
    pub config: Arc<FrameworkConfig>,
    pub state: Arc<FrameworkState>,
    pub debugger: Arc<DebugEmitter>,
    pub log: Arc<FileLogger>,
    pub chck: Arc<Checker>,
    pub net: Arc<FetchEngine>,
    pub update: Option<Updater>,
    usage_cancel: CancellationToken,
}

impl Framework {
    pub fn new(config: FrameworkConfig) -> Self {
        let config = Arc::new(config);
        let state = Arc::new(FrameworkState::default());

        let debugger = Arc::new(DebugEmitter::new(Arc::clone(&config)));
        let log = Arc::new(FileLogger::new(
            Arc::clone(&config),
            debugger.clone() as Arc<dyn Debugger>,
        ));
        let chck = Arc::new(Checker::new(log.clone() as Arc<dyn Logger>));
        let net = Arc::new(FetchEngine::new(
            Arc::clone(&config),
            Arc::clone(&state),
            debugger.clone() as Arc<dyn Debugger>,
            log.clone() as Arc<dyn Logger>,
            chck.clone() as Arc<dyn Checksummer>,
            None,
        ));

        let update = config.updater.as_ref().and_then(|_| {
            Updater::new(
                Arc::clone(&config),
                net.clone() as Arc<dyn Fetcher>,
                log.clone() as Arc<dyn Logger>,
                Arc::clone(&state),
            )
            .ok()
        });

        Framework {
            config,
            state,
            debugger,
            log,
            chck,
            net,
            update,
            usage_cancel: CancellationToken::new(),
        }
    }

    /// Start the periodic usage-stat mirror, when configured. Samples the
    /// provider on the configured interval and emits `usage:stats` while
    /// the emitter is active. Returns the task handle, or `None` when
    /// usage sending is disabled or no provider is configured.
    pub fn start_usage_loop(&self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.debug_send_usage {
            return None;
        }
        let provider = self.config.usage_provider.clone()?;
        let emitter = Arc::clone(&self.debugger);
        let interval_ms = self.config.debug_send_usage_interval_ms.max(1);
        let cancel = self.usage_cancel.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if !emitter.is_active() {
                            continue;
                        }
                        let stats = provider();
                        if let Ok(value) = serde_json::to_value(&stats) {
                            let _ = emitter.usage_stats(value);
                        }
                    }
                }
            }
        }))
    }

    /// Stop the usage-stat mirror, if running.
    pub fn stop_usage_loop(&self) {
        self.usage_cancel.cancel();
    }
}
