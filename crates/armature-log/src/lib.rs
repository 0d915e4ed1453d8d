//! Level-filtered logging for the armature framework.
//!
//! Each line is rendered through a configurable template and fanned out to
//! up to three sinks: the log file (open-append-close per call), an active
//! debug emitter as `console:log`, and a user-supplied callable.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::sync::Arc;

use armature_core::{Debugger, FrameworkConfig, LogError, LogLevel, Logger};

const DEFAULT_FORMAT: &str = "[{} {}] {}";

/// The framework logger. Cheap to construct, cheap to clone; no handles
/// are held open between calls.
pub struct FileLogger {
    config: Arc<FrameworkConfig>,
    emitter: Arc<dyn Debugger>,
}

impl FileLogger {
    pub fn new(config: Arc<FrameworkConfig>, emitter: Arc<dyn Debugger>) -> Self {
        FileLogger { config, emitter }
    }

    /// Substitute timestamp, level and message into the template, in
    /// order. Placeholders beyond the template's `{}` count are ignored;
    /// extra `{}` stay verbatim.
    fn render(format: &str, timestamp: &str, level: LogLevel, message: &str) -> String {
        let mut out = String::with_capacity(format.len() + message.len() + 32);
        let mut rest = format;
        for piece in [timestamp, level.as_str(), message] {
            match rest.split_once("{}") {
                Some((before, after)) => {
                    out.push_str(before);
                    out.push_str(piece);
                    rest = after;
                }
                None => break,
            }
        }
        out.push_str(rest);
        let _ = out.write_char('\n');
        out
    }
}

impl Logger for FileLogger {
    fn log(&self, level: LogLevel, message: &str) -> Result<(), LogError> {
        let format = self
            .config
            .logger_format
            .as_deref()
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_FORMAT);
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let line = Self::render(format, &timestamp, level, message);

        let write_debug = self.config.write_debug_logs || level != LogLevel::Debug;

        if let Some(path) = &self.config.logger_file {
            if write_debug {
                if path.as_os_str().is_empty() {
                    return Err(LogError::EmptyPath);
                }
                let mut file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .map_err(|e| LogError::Open(e.to_string()))?;
                file.write_all(line.as_bytes())
                    .map_err(|e| LogError::Write(e.to_string()))?;
            }
        }

        if self.emitter.is_active() {
            let _ = self.emitter.console_log(level, message, None);
        }

        if let Some(callable) = &self.config.logger_callable {
            callable(level, message).map_err(|e| LogError::Callable(e.to_string()))?;
        }

        Ok(())
    }

    fn log_through_line(&self, line: &str) {
        if self.config.log_framework_internal_errors {
            let _ = self.error(line);
        } else if self.emitter.is_active() {
            let _ = self.emitter.console_log(LogLevel::Error, line, None);
        }
    }
}
