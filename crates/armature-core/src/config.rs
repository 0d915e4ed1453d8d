use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::LogError;
use crate::options::FetchOptions;
use crate::traits::LogLevel;
use crate::usage::UsageStat;

/// Custom log handler invoked after the built-in sinks.
pub type LoggerCallable = Arc<dyn Fn(LogLevel, &str) -> Result<(), LogError> + Send + Sync>;

/// Opaque provider of process usage samples; platform collection itself
/// is outside the framework.
pub type UsageProvider = Arc<dyn Fn() -> UsageStat + Send + Sync>;

/// The in-process configuration record the framework is constructed with.
#[derive(Clone)]
pub struct FrameworkConfig {
    /// Port the debugger listens on for our envelopes.
    pub debug_send_port: u16,
    /// Port we listen on for debugger commands.
    pub debug_listen_port: u16,
    /// Send usage samples to the debugger on an interval.
    pub debug_send_usage: bool,
    pub debug_send_usage_interval_ms: u64,
    /// Debugger host override. Defaults to loopback; change only when
    /// absolutely needed.
    pub debug_override_host: Option<String>,

    /// Path to the log file; unset disables file logging.
    pub logger_file: Option<PathBuf>,
    /// Log line template with three `{}` placeholders substituted in
    /// order: timestamp, level, message.
    pub logger_format: Option<String>,
    pub logger_callable: Option<LoggerCallable>,

    /// Default options for network fetches.
    pub fetch_options: FetchOptions,

    pub updater: Option<UpdaterAppConfig>,

    /// Whether `log_through` writes framework-internal errors to the log
    /// sinks. An attached debugger receives them either way.
    pub log_framework_internal_errors: bool,

    /// When disabled, Debug-level lines are never written to the log file.
    /// They still reach the callable and any attached debugger.
    pub write_debug_logs: bool,

    pub usage_provider: Option<UsageProvider>,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        FrameworkConfig {
            debug_send_port: 9000,
            debug_listen_port: 9001,
            debug_send_usage: false,
            debug_send_usage_interval_ms: 1000,
            debug_override_host: None,
            logger_file: None,
            logger_format: None,
            logger_callable: None,
            fetch_options: FetchOptions::default(),
            updater: None,
            log_framework_internal_errors: true,
            write_debug_logs: false,
            usage_provider: None,
        }
    }
}

impl fmt::Debug for FrameworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameworkConfig")
            .field("debug_send_port", &self.debug_send_port)
            .field("debug_listen_port", &self.debug_listen_port)
            .field("debug_send_usage", &self.debug_send_usage)
            .field("debug_override_host", &self.debug_override_host)
            .field("logger_file", &self.logger_file)
            .field("logger_format", &self.logger_format)
            .field("logger_callable", &self.logger_callable.as_ref().map(|_| "{ ... }"))
            .field("fetch_options", &self.fetch_options)
            .field("updater", &self.updater)
            .field(
                "log_framework_internal_errors",
                &self.log_framework_internal_errors,
            )
            .field("write_debug_logs", &self.write_debug_logs)
            .field("usage_provider", &self.usage_provider.as_ref().map(|_| "{ ... }"))
            .finish()
    }
}

impl FrameworkConfig {
    /// The debugger host, falling back to loopback.
    pub fn debug_host(&self) -> &str {
        self.debug_override_host.as_deref().unwrap_or("127.0.0.1")
    }
}

/// Application identity and release-channel settings for the updater.
#[derive(Debug, Clone)]
pub struct UpdaterAppConfig {
    pub semver: String,
    /// Monotonic release ordinal of the running binary, independent of
    /// semver.
    pub uind: i64,
    /// Release stream this installation follows. `ugit.<c>` and `git.<c>`
    /// prefixes select the source-forge catalogs; anything else selects
    /// the JSON deploy manifest.
    pub channel: String,
    pub released: String,
    pub commit: String,
    /// PEM-encoded public key used to verify downloaded releases.
    pub public_key_pem: String,
    /// URL of the JSON deploy manifest.
    pub deploy_url: Option<String>,
    /// Source-forge repository as `owner/repo`.
    pub forge_repo: Option<String>,
    /// Target triple of the running binary, `<os>-<arch>`.
    pub target: String,
}
