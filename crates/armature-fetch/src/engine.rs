use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use armature_core::state::NET_INTERNAL_ERROR_LOG;
use armature_core::{
    Checksummer, Debugger, Fetcher, FetchOptions, FrameworkConfig, FrameworkState, HttpMethod,
    Initiator, LogThrough, Logger, NetError, NetState, NetworkEvent, ProgressHandle, Progressor,
};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::handlers::{self, PrefixHandler};
use crate::report::ProgressReport;
use crate::util::{
    content_disposition_filename, from_header_map, http_version_str, to_header_map,
    to_reqwest_method,
};

/// The request hub: retry loop, telemetry, prefix-handler pipeline, sink
/// selection. Implements [`Fetcher`] for the rest of the framework.
pub struct FetchEngine {
    pub(crate) config: Arc<FrameworkConfig>,
    pub(crate) state: Arc<FrameworkState>,
    pub(crate) emitter: Arc<dyn Debugger>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) chck: Arc<dyn Checksummer>,
    progressor: Option<Progressor>,
    prefix_handlers: RwLock<Vec<PrefixHandler>>,
}

impl FetchEngine {
    pub fn new(
        config: Arc<FrameworkConfig>,
        state: Arc<FrameworkState>,
        emitter: Arc<dyn Debugger>,
        logger: Arc<dyn Logger>,
        chck: Arc<dyn Checksummer>,
        progressor: Option<Progressor>,
    ) -> Self {
        FetchEngine {
            config,
            state,
            emitter,
            logger,
            chck,
            progressor,
            prefix_handlers: RwLock::new(handlers::defaults()),
        }
    }

    /// The state handle this engine allocates event ids and flags from.
    pub fn state(&self) -> &Arc<FrameworkState> {
        &self.state
    }

    /// Register an additional response prefix handler. It still has to be
    /// named in [`FetchOptions::enabled_prefix_handlers`] to run.
    pub fn register_prefix_handler(&self, handler: PrefixHandler) {
        self.prefix_handlers
            .write()
            .expect("prefix handlers poisoned")
            .push(handler);
    }

    pub(crate) fn log_through_net(&self, err: NetError) -> NetError {
        if self.state.flags.is_enabled(NET_INTERNAL_ERROR_LOG) {
            self.logger.log_through(err)
        } else {
            err
        }
    }

    fn build_client(&self, options: &FetchOptions) -> Result<reqwest::Client, NetError> {
        if let Some(client) = &options.client {
            return Ok(client.clone());
        }
        let mut builder = reqwest::Client::builder();
        if options.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if options.dial_timeout_secs > 0 {
            builder = builder.connect_timeout(Duration::from_secs(options.dial_timeout_secs as u64));
        }
        if options.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(options.timeout_secs as u64));
        }
        builder
            .build()
            .map_err(|e| NetError::Transport(format!("failed to build client: {e}")))
    }

    /// Measure connect time and capture the endpoints of one probe
    /// connection. Best-effort: failures leave the fields unknown and the
    /// real request surfaces any error.
    async fn probe_connection(options: &FetchOptions, url: &Url, event: &mut NetworkEvent) {
        let Some(host) = url.host_str() else {
            return;
        };
        let Some(port) = url.port_or_known_default() else {
            return;
        };
        let started = Instant::now();
        let connect = tokio::net::TcpStream::connect((host, port));
        let conn = if options.dial_timeout_secs > 0 {
            match tokio::time::timeout(
                Duration::from_secs(options.dial_timeout_secs as u64),
                connect,
            )
            .await
            {
                Ok(conn) => conn,
                Err(_) => return,
            }
        } else {
            connect.await
        };
        if let Ok(conn) = conn {
            event.meta_time_to_con = started.elapsed().as_millis() as i64;
            if let Ok(local) = conn.local_addr() {
                event.client_ip = local.to_string();
            }
            if let Ok(peer) = conn.peer_addr() {
                event.remote_ip = peer.to_string();
            }
        }
    }

    /// The core request function: one retry loop around the per-attempt
    /// lifecycle, without the prefix-handler pipeline.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_raw(
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
    ) -> Result<ProgressReport, NetError> {
        let mut options = options.unwrap_or_else(|| self.config.fetch_options.clone());
        if options.buffer_size < 0 {
            options.buffer_size = 32 * 1024;
        }

        let resolve = self.emitter.is_active() || options.resolve_additional_info;
        let progressor = progressor.or_else(|| self.progressor.clone());

        let parsed = Url::parse(url).ok();
        if resolve && parsed.as_ref().and_then(|u| u.host_str()).is_none() {
            return Err(NetError::InvalidUrl(url.to_string()));
        }

        let attempts: u32 = if options.timeout_secs > 0 && options.retry_timeouts > 0 {
            options.retry_timeouts as u32 + 1
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            let id = format!("Fw.Net.Fetch:{}", self.state.indexes.next("netevent"));
            let mut event = NetworkEvent::outgoing(id, method, url.to_string(), options.clone());
            event.context = context.clone();
            event.initiator = initiator.clone();
            event.meta_is_stream = stream;
            event.meta_as_file = as_file;
            event.meta_retry_attempt = attempt;
            if resolve {
                if let Some(u) = &parsed {
                    event.scheme = u.scheme().to_string();
                }
            }

            let mut report = ProgressReport::new(
                event,
                progressor.clone(),
                Arc::clone(&self.emitter),
                Arc::clone(&self.logger),
                Arc::clone(&self.state),
            );

            if self.emitter.is_active() {
                let _ = self.emitter.net_start(&report.event);
            }

            if attempt > 1 {
                report.event.event_state = NetState::Retry;
                report.notify(None);
            }

            let client = self.build_client(&options)?;

            if options.dns_pre_check {
                let host = parsed
                    .as_ref()
                    .and_then(|u| u.host_str())
                    .ok_or_else(|| NetError::InvalidUrl(url.to_string()))?
                    .to_string();
                let lookup_error = tokio::net::lookup_host((host.as_str(), 0))
                    .await
                    .err()
                    .map(|e| e.to_string());
                if let Some(message) = lookup_error {
                    report.event.event_state = NetState::Failed;
                    let err = NetError::Dns { host, message };
                    report.notify(Some(&err));
                    report.close().await.ok();
                    return Err(self.log_through_net(err));
                }
            }

            if resolve {
                if let Some(u) = &parsed {
                    Self::probe_connection(&options, u, &mut report.event).await;
                }
            }

            let mut request = client.request(to_reqwest_method(method), url);
            if let Some(headers) = &options.headers {
                request = request.headers(to_header_map(headers));
            }
            if let Some(body) = &body {
                request = request.body(body.clone());
            }

            let request_start = Instant::now();
            let sent = match options.cancel.clone() {
                Some(cancel) => tokio::select! {
                    _ = cancel.cancelled() => {
                        report.event.event_state = NetState::Failed;
                        let err = NetError::Cancelled;
                        report.notify(Some(&err));
                        report.close().await.ok();
                        return Err(self.log_through_net(err));
                    }
                    sent = request.send() => sent,
                },
                None => request.send().await,
            };

            let resp = match sent {
                Ok(resp) => resp,
                Err(e) => {
                    // Dial timeouts are bounded separately and never
                    // consume the retry budget; only overall timeouts do.
                    if e.is_timeout() && !e.is_connect() && attempt < attempts {
                        // Balance the attempt's net:start for the
                        // debugger without a terminal progressor call.
                        if self.emitter.is_active() {
                            let _ = self.emitter.net_stop(&report.event.id);
                        }
                        attempt += 1;
                        continue;
                    }
                    report.event.event_state = NetState::Failed;
                    let err = if e.is_timeout() && !e.is_connect() {
                        NetError::Timeout {
                            attempt,
                            message: e.to_string(),
                        }
                    } else {
                        NetError::Transport(e.to_string())
                    };
                    report.notify(Some(&err));
                    report.close().await.ok();
                    return Err(self.log_through_net(err));
                }
            };

            report.status = resp.status().as_u16();
            report.event.status = resp.status().as_u16();
            report.final_url = resp.url().to_string();
            report.resp_headers = Some(from_header_map(resp.headers()));
            report.event.meta_got_first_resp = Some(chrono::Utc::now());
            report.event.meta_time_to_first_byte = request_start.elapsed().as_millis() as i64;
            report.first_resp_at = Some(Instant::now());

            if resolve {
                report.event.protocol = http_version_str(resp.version()).to_string();
                report.event.resp_headers = report.resp_headers.clone();
                if let Some(ct) = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                {
                    report.event.content_type = ct.to_string();
                }
                if report.event.remote_ip.is_empty() {
                    if let Some(host) = resp.url().host_str() {
                        let port = resp.url().port_or_known_default().unwrap_or(0);
                        if let Ok(mut addrs) = tokio::net::lookup_host((host, port)).await {
                            if let Some(addr) = addrs.next() {
                                report.event.remote_ip = addr.to_string();
                            }
                        }
                    }
                }
            }

            report.event.event_state = NetState::Established;
            report.notify(None);

            if resp.status().as_u16() != 200 {
                let status = resp.status().as_u16();
                // Drain so the connection can be reused, then terminate
                // as Finished: HTTP errors are not transport failures.
                let _ = resp.bytes().await;
                report.event.event_state = NetState::Finished;
                let err = NetError::HttpStatus(status);
                report.notify(Some(&err));
                report.close().await.ok();
                return Err(self.log_through_net(err));
            }

            report.event.size = resp.content_length().map(|v| v as i64).unwrap_or(-1);
            if options.total_size_override != -2 {
                report.event.size = options.total_size_override;
            }

            report.event.event_state = NetState::Responded;
            report.event.event_success = true;
            report.notify(None);

            report.body = Some(Box::pin(resp.bytes_stream()));

            return self.deliver(report, stream, as_file, file_path, None).await;
        }
    }

    /// Turn an open report into what the caller asked for: a live stream,
    /// a file on disk, or in-memory content.
    pub(crate) async fn deliver(
        &self,
        mut report: ProgressReport,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
        fallback_name: Option<String>,
    ) -> Result<ProgressReport, NetError> {
        if stream && !as_file {
            return Ok(report);
        }

        if as_file {
            let path = match resolve_output_path(file_path.as_deref(), &report, fallback_name) {
                Ok(path) => path,
                Err(e) => {
                    report.event.event_state = NetState::Failed;
                    report.notify(Some(&e));
                    report.close().await.ok();
                    return Err(self.log_through_net(e));
                }
            };

            if stream {
                if let Err(e) = self.copy_report_to_file(&mut report, &path).await {
                    report.close().await.ok();
                    return Err(e);
                }
            } else {
                let bytes = match report.read_to_end().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        report.close().await.ok();
                        return Err(e);
                    }
                };
                if let Err(e) = tokio::fs::write(&path, &bytes).await {
                    report.event.event_state = NetState::Failed;
                    let err =
                        NetError::Io(format!("failed to write to file {}: {e}", path.display()));
                    report.notify(Some(&err));
                    report.close().await.ok();
                    return Err(self.log_through_net(err));
                }
            }
            report.close().await.ok();
            return Ok(report);
        }

        // Neither stream nor file: buffer the body as content.
        match report.read_to_end().await {
            Ok(bytes) => {
                report.content = Some(Bytes::from(bytes));
                report.close().await.ok();
                Ok(report)
            }
            Err(e) => {
                report.close().await.ok();
                Err(e)
            }
        }
    }

    /// Stream-copy the body to a file, chunk by chunk, with progress
    /// flowing through the report's read path.
    async fn copy_report_to_file(
        &self,
        report: &mut ProgressReport,
        path: &Path,
    ) -> Result<(), NetError> {
        let mut file = match tokio::fs::File::create(path).await {
            Ok(file) => file,
            Err(e) => {
                report.event.event_state = NetState::Failed;
                let err = NetError::Io(format!(
                    "failed to create output file {}: {e}",
                    path.display()
                ));
                report.notify(Some(&err));
                return Err(self.log_through_net(err));
            }
        };

        let mut buf = vec![0u8; report.event.options.effective_buffer_size().max(1)];
        loop {
            let n = report.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if let Err(e) = file.write_all(&buf[..n]).await {
                report.event.event_state = NetState::Failed;
                let err = NetError::Io(format!("failed to write to destination: {e}"));
                report.notify(Some(&err));
                return Err(self.log_through_net(err));
            }
        }
        file.flush().await.map_err(|e| {
            self.log_through_net(NetError::Io(format!("failed to flush destination: {e}")))
        })?;
        Ok(())
    }

    /// The public fetch: wraps [`fetch_raw`](FetchEngine::fetch_raw) with
    /// the response prefix-handler pipeline.
    ///
    /// The request always starts as an internal stream so the first bytes
    /// can be peeked. When a handler rewrites the URL the fetch restarts
    /// against it with the caller's original sink semantics; otherwise the
    /// peeked bytes are un-consumed and the response flows through.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch(
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
    ) -> Result<ProgressReport, NetError> {
        let mut irep = self
            .fetch_raw(
                method,
                url,
                true,
                false,
                None,
                progressor.clone(),
                body.clone(),
                context.clone(),
                initiator.clone(),
                options.clone(),
            )
            .await?;

        let enabled_names = irep.event.options.enabled_prefix_handlers.clone();
        if !enabled_names.is_empty() {
            let content_type = irep
                .resp_headers
                .as_ref()
                .and_then(|h| h.get("content-type"))
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or_default();

            let candidates: Vec<PrefixHandler> = {
                let registered = self.prefix_handlers.read().expect("prefix handlers poisoned");
                registered
                    .iter()
                    .filter(|h| enabled_names.iter().any(|n| n == &h.name))
                    .filter(|h| {
                        content_type.is_empty()
                            || h.content_type_contains.is_empty()
                            || content_type.contains(&h.content_type_contains)
                    })
                    .filter(|h| {
                        h.filter_for_urls.is_empty()
                            || h.filter_for_urls
                                .iter()
                                .any(|f| irep.final_url.contains(f.as_str()))
                    })
                    .cloned()
                    .collect()
            };

            if !candidates.is_empty() {
                let max_prefix = candidates.iter().map(|h| h.prefix_len).max().unwrap_or(0);

                let mut peek = vec![0u8; max_prefix];
                let mut read_n = 0;
                while read_n < max_prefix {
                    match irep
                        .len_read(&mut peek, read_n, (max_prefix - read_n) as i64)
                        .await
                    {
                        Ok(0) => break,
                        Ok(n) => read_n += n,
                        Err(e) => {
                            irep.close().await.ok();
                            return Err(e);
                        }
                    }
                }
                peek.truncate(read_n);

                let matched = candidates
                    .iter()
                    .find(|h| (h.validator)(&peek, &irep.final_url));

                if let Some(handler) = matched {
                    let mut full = peek.clone();
                    if handler.needs_content {
                        // Handlers that only inspect the URL skip this
                        // full-body drain.
                        let mut tmp =
                            vec![0u8; irep.event.options.effective_buffer_size().max(1)];
                        loop {
                            match irep.len_read(&mut tmp, 0, -1).await {
                                Ok(0) => break,
                                Ok(n) => full.extend_from_slice(&tmp[..n]),
                                Err(e) => {
                                    irep.close().await.ok();
                                    return Err(e);
                                }
                            }
                        }
                    }

                    let new_url = match (handler.parser)(&full, &irep.final_url) {
                        Ok(url) => url,
                        Err(e) => {
                            self.log_through_net(e);
                            String::new()
                        }
                    };

                    if !new_url.is_empty() {
                        irep.event.interrupted = true;
                        irep.notify(None);
                        irep.close().await.ok();
                        return self
                            .fetch_raw(
                                method, &new_url, stream, as_file, file_path, progressor, body,
                                context, initiator, options,
                            )
                            .await;
                    }
                    // No rewrite: everything consumed so far re-yields.
                    irep.unread(&full);
                } else {
                    irep.unread(&peek);
                }
            }
        }

        self.deliver(irep, stream, as_file, file_path, None).await
    }
}

/// Resolve the output file path: explicit path, else Content-Disposition
/// filename, else URL basename, else the fallback, else `fetched_content`,
/// placed under the working directory.
fn resolve_output_path(
    explicit: Option<&Path>,
    report: &ProgressReport,
    fallback_name: Option<String>,
) -> Result<PathBuf, NetError> {
    if let Some(path) = explicit {
        if !path.as_os_str().is_empty() {
            return Ok(path.to_path_buf());
        }
    }

    let mut name = report
        .resp_headers
        .as_ref()
        .and_then(|h| h.get("content-disposition"))
        .and_then(|v| v.first())
        .and_then(|cd| content_disposition_filename(cd))
        .unwrap_or_default();

    if name.is_empty() {
        if let Ok(u) = Url::parse(&report.final_url) {
            if let Some(segment) = u
                .path_segments()
                .and_then(|mut s| s.next_back().map(|p| p.to_string()))
            {
                name = segment;
            }
        }
    }
    if name.is_empty() {
        name = fallback_name.unwrap_or_default();
    }
    if name.is_empty() || name == "." || name == "/" {
        name = "fetched_content".to_string();
    }

    let cwd = std::env::current_dir()
        .map_err(|e| NetError::Io(format!("failed to get working directory: {e}")))?;
    Ok(cwd.join(name))
}

#[async_trait]
impl Fetcher for FetchEngine {
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
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        let report = FetchEngine::fetch(
            self, method, url, stream, as_file, file_path, progressor, body, context, initiator,
            options,
        )
        .await?;
        Ok(Box::new(report))
    }
}
