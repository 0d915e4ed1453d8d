use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use crate::algo::{HashAlgorithm, SigAlgorithm};
use crate::error::{EmitError, LogError, NetError};
use crate::event::{Headers, HttpMethod, Initiator, NetworkEvent};
use crate::options::FetchOptions;

/// Log severity. The numeric value is what crosses the debugger wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The debug emitter seam: a pure telemetry sink from the rest of the
/// framework's perspective.
///
/// Every typed helper is a thin envelope constructor over [`send`];
/// implementations only have to provide activation state and the enqueue
/// itself. All methods are non-blocking.
///
/// [`send`]: Debugger::send
pub trait Debugger: Send + Sync {
    fn is_active(&self) -> bool;

    fn protocol_version(&self) -> u32 {
        crate::PROTOCOL_VERSION
    }

    /// Enqueue one envelope for transmission. The `protocol` and `sent`
    /// fields are injected by the sender, not the caller.
    fn send(&self, envelope: Value) -> Result<(), EmitError>;

    fn console_log(
        &self,
        level: LogLevel,
        text: &str,
        object: Option<Value>,
    ) -> Result<(), EmitError> {
        self.send(json!({
            "signal": "console:log",
            "type": level as i64,
            "text": text,
            "object": object,
        }))
    }

    fn elements_tree(&self, tree: Value) -> Result<(), EmitError> {
        self.send(json!({
            "signal": "elements:tree",
            "tree": tree,
        }))
    }

    fn elements_update(&self, element: Value, properties: Value) -> Result<(), EmitError> {
        self.send(json!({
            "signal": "elements:update",
            "element": element,
            "properties": properties,
        }))
    }

    fn net_start(&self, event: &NetworkEvent) -> Result<(), EmitError> {
        let properties =
            serde_json::to_value(event).map_err(|e| EmitError::Serialize(e.to_string()))?;
        self.send(json!({
            "signal": "net:start",
            "properties": properties,
        }))
    }

    fn net_update(&self, id: &str, properties: Value) -> Result<(), EmitError> {
        self.send(json!({
            "signal": "net:update",
            "id": id,
            "properties": properties,
        }))
    }

    fn net_update_full(&self, event: &NetworkEvent) -> Result<(), EmitError> {
        let properties =
            serde_json::to_value(event).map_err(|e| EmitError::Serialize(e.to_string()))?;
        self.send(json!({
            "signal": "net:update",
            "id": event.id,
            "properties": properties,
        }))
    }

    fn net_stop(&self, id: &str) -> Result<(), EmitError> {
        self.send(json!({
            "signal": "net:stop",
            "id": id,
        }))
    }

    fn net_stop_event(&self, event: &NetworkEvent) -> Result<(), EmitError> {
        self.net_stop(&event.id)
    }

    /// Equivalent to a final `net:update` and a `net:stop` in one datagram.
    fn net_stop_with_update(&self, event: &NetworkEvent) -> Result<(), EmitError> {
        let properties =
            serde_json::to_value(event).map_err(|e| EmitError::Serialize(e.to_string()))?;
        self.send(json!({
            "signal": "net:stop.update",
            "id": event.id,
            "properties": properties,
        }))
    }

    fn usage_stats(&self, stats: Value) -> Result<(), EmitError> {
        self.send(json!({
            "signal": "usage:stats",
            "stats": stats,
        }))
    }

    fn ping(&self) -> Result<(), EmitError> {
        self.send(json!({ "signal": "misc:ping" }))
    }

    fn pong(&self) -> Result<(), EmitError> {
        self.send(json!({ "signal": "misc:pong" }))
    }

    fn custom_envelope(&self, kind: &str, body: Value) -> Result<(), EmitError> {
        self.send(json!({
            "signal": "custom:envelope",
            "kind": kind,
            "body": body,
        }))
    }
}

/// Debugger stand-in for builds and tests that run without an attached
/// debugger; accepts and discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDebugger;

impl Debugger for NoopDebugger {
    fn is_active(&self) -> bool {
        false
    }

    fn send(&self, _envelope: Value) -> Result<(), EmitError> {
        Ok(())
    }
}

/// The logger seam.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str) -> Result<(), LogError>;

    fn debug(&self, message: &str) -> Result<(), LogError> {
        self.log(LogLevel::Debug, message)
    }

    fn info(&self, message: &str) -> Result<(), LogError> {
        self.log(LogLevel::Info, message)
    }

    fn warn(&self, message: &str) -> Result<(), LogError> {
        self.log(LogLevel::Warn, message)
    }

    fn error(&self, message: &str) -> Result<(), LogError> {
        self.log(LogLevel::Error, message)
    }

    /// Record one error line through the internal-error policy: the
    /// configuration decides whether it reaches the log sinks or only an
    /// attached debugger.
    fn log_through_line(&self, line: &str);
}

/// Drop-in error pass-through: log the error, hand it back unchanged.
///
/// This is the framework's error-propagation primitive; it is the only
/// side effect errors have on their way up.
pub trait LogThrough {
    fn log_through<E: fmt::Display>(&self, err: E) -> E;
}

impl<L: Logger + ?Sized> LogThrough for L {
    fn log_through<E: fmt::Display>(&self, err: E) -> E {
        self.log_through_line(&err.to_string());
        err
    }
}

/// The checksum/signature seam.
///
/// Hash output is lowercase hex; comparisons are case-insensitive. CRC32
/// sums are additionally accepted in their decimal `u32` form, since chibit
/// indexes encode them as JSON numbers.
pub trait Checksummer: Send + Sync {
    fn hash_file(&self, path: &Path, algo: HashAlgorithm) -> String;
    fn hash_buf(&self, buf: &[u8], algo: HashAlgorithm) -> String;
    fn hash_str(&self, content: &str, algo: HashAlgorithm) -> String;

    fn check_file(&self, path: &Path, sum: &str, algo: HashAlgorithm) -> bool;
    fn check_buf(&self, buf: &[u8], sum: &str, algo: HashAlgorithm) -> bool;
    fn check_str(&self, content: &str, sum: &str, algo: HashAlgorithm) -> bool;

    fn sig_file(&self, path: &Path, algo: SigAlgorithm, public_key_pem: &str, signature: &[u8])
        -> bool;
    fn sig_buf(&self, buf: &[u8], algo: SigAlgorithm, public_key_pem: &str, signature: &[u8])
        -> bool;
    fn sig_str(
        &self,
        content: &str,
        algo: SigAlgorithm,
        public_key_pem: &str,
        signature: &[u8],
    ) -> bool;

    /// Infer the hash algorithm from a hex digest's length; returns
    /// `Unknown` for non-hex input or unrecognized lengths.
    fn guess_algo(&self, sum: &str) -> HashAlgorithm;
}

/// Callback invoked on every event-state change and, subject to
/// throttling, on every transfer chunk.
pub type Progressor = Arc<dyn Fn(&mut dyn ProgressHandle, Option<&NetError>) + Send + Sync>;

/// A live view onto one request: its event record, response metadata, and
/// (exclusively owned) body reader.
///
/// The handle must not be retained after [`close`]; closing transitions
/// the event to its terminal state, delivers the final progressor call,
/// and releases the body.
///
/// [`close`]: ProgressHandle::close
#[async_trait]
pub trait ProgressHandle: Send {
    fn event(&self) -> &NetworkEvent;
    fn event_mut(&mut self) -> &mut NetworkEvent;

    /// Response status code.
    fn status(&self) -> u16;
    /// Response headers, when captured.
    fn resp_headers(&self) -> Option<&Headers>;
    /// The URL the response was ultimately served from.
    fn final_url(&self) -> &str;

    /// Body content for non-stream requests, UTF-8 lossy view.
    fn content(&self) -> Option<String>;
    /// Body content for non-stream requests, raw bytes.
    fn content_bytes(&self) -> Option<&[u8]>;

    fn set_step_max(&mut self, max: u32);
    fn set_step_current(&mut self, current: u32);
    fn unset_step_max(&mut self);
    fn unset_step_current(&mut self);
    fn incr_step_current(&mut self);
    fn reset_step_current(&mut self);

    /// Read the next bytes of the body into `buf`, updating transfer
    /// metrics and notifying the progressor. Returns 0 at EOF.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError>;

    /// Drain the remaining body into memory.
    async fn read_to_end(&mut self) -> Result<Vec<u8>, NetError> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; 32 * 1024];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    /// Idempotent: transitions Finished (or leaves Failed), delivers the
    /// terminal progressor call, emits `net:stop.update`, releases the
    /// body.
    async fn close(&mut self) -> Result<(), NetError>;
}

/// The fetch engine seam, as consumed by the updater and other clients.
///
/// Only [`fetch`] must be implemented; every wrapper has a default
/// implementation in terms of it.
///
/// [`fetch`]: Fetcher::fetch
#[async_trait]
pub trait Fetcher: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn fetch(
        &self,
        method: HttpMethod,
        url: &str,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
        progressor: Option<Progressor>,
        body: Option<Bytes>,
        context: Option<String>,
        initiator: Option<Initiator>,
        options: Option<FetchOptions>,
    ) -> Result<Box<dyn ProgressHandle>, NetError>;

    /// [`fetch`](Fetcher::fetch) with engine defaults for progressor and
    /// options, tagged `Fw.Net.AutoFetch.<METHOD>`.
    async fn auto_fetch(
        &self,
        method: HttpMethod,
        url: &str,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
        body: Option<Bytes>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.fetch(
            method,
            url,
            stream,
            as_file,
            file_path,
            None,
            body,
            Some(format!("Fw.Net.AutoFetch.{method}")),
            None,
            None,
        )
        .await
    }

    async fn get(
        &self,
        url: &str,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Get, url, stream, as_file, file_path, None)
            .await
    }

    async fn post(
        &self,
        url: &str,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
        body: Option<Bytes>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Post, url, stream, as_file, file_path, body)
            .await
    }

    async fn put(
        &self,
        url: &str,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
        body: Option<Bytes>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Put, url, stream, as_file, file_path, body)
            .await
    }

    async fn patch(
        &self,
        url: &str,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
        body: Option<Bytes>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Patch, url, stream, as_file, file_path, body)
            .await
    }

    async fn delete(
        &self,
        url: &str,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
        body: Option<Bytes>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Delete, url, stream, as_file, file_path, body)
            .await
    }

    async fn head(
        &self,
        url: &str,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Head, url, stream, as_file, file_path, None)
            .await
    }

    async fn options_request(
        &self,
        url: &str,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
        body: Option<Bytes>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Options, url, stream, as_file, file_path, body)
            .await
    }

    /// GET a URL and return its body as in-memory content on the report.
    async fn fetch_body(&self, url: &str) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Get, url, false, false, None, None)
            .await
    }

    /// GET a URL and return a live report to read the body from.
    async fn stream_body(&self, url: &str) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Get, url, true, false, None, None)
            .await
    }

    /// GET a URL and write its body to a file in one shot.
    async fn fetch_file(
        &self,
        url: &str,
        file_path: Option<PathBuf>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Get, url, false, true, file_path, None)
            .await
    }

    /// GET a URL and stream its body to a file.
    async fn stream_file(
        &self,
        url: &str,
        file_path: Option<PathBuf>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.auto_fetch(HttpMethod::Get, url, true, true, file_path, None)
            .await
    }
}
