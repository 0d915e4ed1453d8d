use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use armature_core::state::NET_INTERNAL_ERROR_LOG;
use armature_core::{
    Debugger, FrameworkState, Headers, LogThrough, Logger, NetError, NetState, NetworkEvent,
    ProgressHandle, Progressor,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

pub(crate) type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Throttle check: has at least `interval_ms` passed since `last`?
/// Non-positive intervals and a missing `last` always pass.
pub(crate) fn at_least_interval(last: Option<Instant>, interval_ms: i64) -> bool {
    if interval_ms < 0 {
        return true;
    }
    match last {
        None => true,
        Some(last) => last.elapsed().as_millis() as i64 >= interval_ms,
    }
}

/// Per-request state: the telemetry event, response metadata, and the
/// exclusively-owned body reader.
///
/// Reads transition the event to `Transfer`, update the transfer metrics
/// and fan out to the progressor and the emitter. [`close`] is idempotent
/// and always delivers the terminal notification exactly once.
///
/// [`close`]: ProgressReport::close
pub struct ProgressReport {
    pub event: NetworkEvent,

    pub(crate) status: u16,
    pub(crate) final_url: String,
    pub(crate) resp_headers: Option<Headers>,
    pub(crate) content: Option<Bytes>,

    pub(crate) leftover: BytesMut,
    pub(crate) body: Option<ByteStream>,
    pub(crate) first_resp_at: Option<Instant>,

    pub(crate) progressor: Option<Progressor>,
    last_sent_progressor: Option<Instant>,
    last_sent_debug: Option<Instant>,
    terminal_notified: bool,
    closed: bool,

    pub(crate) emitter: Arc<dyn Debugger>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) state: Arc<FrameworkState>,
}

impl std::fmt::Debug for ProgressReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReport")
            .field("event", &self.event)
            .field("status", &self.status)
            .field("final_url", &self.final_url)
            .field("resp_headers", &self.resp_headers)
            .field("content", &self.content)
            .finish_non_exhaustive()
    }
}

impl ProgressReport {
    pub(crate) fn new(
        event: NetworkEvent,
        progressor: Option<Progressor>,
        emitter: Arc<dyn Debugger>,
        logger: Arc<dyn Logger>,
        state: Arc<FrameworkState>,
    ) -> Self {
        let remote = event.remote.clone();
        ProgressReport {
            event,
            status: 200,
            final_url: remote,
            resp_headers: None,
            content: None,
            leftover: BytesMut::new(),
            body: None,
            first_resp_at: None,
            progressor,
            last_sent_progressor: None,
            last_sent_debug: None,
            terminal_notified: false,
            closed: false,
            emitter,
            logger,
            state,
        }
    }

    /// Mirror the event to an active emitter, honoring the debugger
    /// interval while in the Transfer state. State changes always pass.
    pub(crate) fn debug_update(&mut self) {
        if !self.emitter.is_active()
            || !self
                .state
                .flags
                .is_enabled(armature_core::state::NET_PROGRESSOR_NETUPDATE)
        {
            return;
        }
        let interval = self.event.options.debugger_interval_ms;
        if interval <= 0
            || self.event.event_state != NetState::Transfer
            || at_least_interval(self.last_sent_debug, interval)
        {
            let _ = self.emitter.net_update_full(&self.event);
            self.last_sent_debug = Some(Instant::now());
        }
    }

    /// Fan the current event out: first to the emitter, then to the
    /// progressor, each behind its own Transfer-state throttle.
    /// Throttling only ever coalesces Transfer updates; every other state
    /// change is delivered unconditionally.
    pub(crate) fn notify(&mut self, err: Option<&NetError>) {
        self.debug_update();

        if let Some(progressor) = self.progressor.clone() {
            let is_terminal = matches!(
                self.event.event_state,
                NetState::Finished | NetState::Failed
            );
            // A terminal state reaches the progressor at most once.
            if is_terminal && self.terminal_notified {
                return;
            }
            let interval = self.event.options.progressor_interval_ms;
            if interval <= 0
                || self.event.event_state != NetState::Transfer
                || at_least_interval(self.last_sent_progressor, interval)
            {
                progressor(self, err);
                self.last_sent_progressor = Some(Instant::now());
                if is_terminal {
                    self.terminal_notified = true;
                }
            }
        }
    }

    pub(crate) fn log_through_gated(&self, err: NetError) -> NetError {
        if self.state.flags.is_enabled(NET_INTERNAL_ERROR_LOG) {
            self.logger.log_through(err)
        } else {
            err
        }
    }

    /// Push bytes back so the next read re-yields them; used by the
    /// prefix-handler pipeline to un-consume the peeked prefix.
    pub(crate) fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut rebuilt = BytesMut::with_capacity(bytes.len() + self.leftover.len());
        rebuilt.extend_from_slice(bytes);
        rebuilt.extend_from_slice(&self.leftover);
        self.leftover = rebuilt;
    }

    /// Pull up to `want` body bytes into `buf[start..]`, leftover first.
    /// Returns 0 at EOF.
    async fn fill(&mut self, buf: &mut [u8], start: usize, want: usize) -> Result<usize, NetError> {
        if self.leftover.is_empty() {
            let Some(body) = self.body.as_mut() else {
                return Ok(0);
            };
            let next = if let Some(cancel) = self.event.options.cancel.clone() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(NetError::Cancelled),
                    item = body.next() => item,
                }
            } else {
                body.next().await
            };
            match next {
                None => return Ok(0),
                Some(Ok(chunk)) => self.leftover.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    return Err(if e.is_timeout() {
                        NetError::Timeout {
                            attempt: self.event.meta_retry_attempt,
                            message: e.to_string(),
                        }
                    } else {
                        NetError::Transport(e.to_string())
                    });
                }
            }
        }

        let n = want.min(self.leftover.len());
        buf[start..start + n].copy_from_slice(&self.leftover.split_to(n));
        Ok(n)
    }

    /// Read into `buf[start..]`, capped at `max_len` bytes when it is
    /// non-negative. The workhorse behind [`read`](ProgressHandle::read)
    /// and the prefix-peek path.
    pub async fn len_read(
        &mut self,
        buf: &mut [u8],
        start: usize,
        max_len: i64,
    ) -> Result<usize, NetError> {
        if self.closed {
            return Ok(0);
        }
        self.event.event_state = NetState::Transfer;

        if start > buf.len() {
            return Err(NetError::Io(format!(
                "invalid start index {start} for buffer of length {}",
                buf.len()
            )));
        }
        let mut want = buf.len() - start;
        if max_len >= 0 {
            want = want.min(max_len as usize);
        }
        if want == 0 {
            return Ok(0);
        }

        match self.fill(buf, start, want).await {
            Ok(0) => {
                if self.event.options.auto_read_eof_close {
                    self.close_inner().await?;
                } else {
                    self.notify(None);
                }
                Ok(0)
            }
            Ok(n) => {
                self.event.transferred += n as i64;
                if let Some(first) = self.first_resp_at {
                    let secs = first.elapsed().as_secs_f64();
                    if secs > 0.0 {
                        self.event.meta_speed = (n as f64 * 8.0) / secs / 1_000_000.0;
                    }
                }
                self.event.calc_step();
                self.notify(None);
                Ok(n)
            }
            Err(e) => {
                self.event.event_state = NetState::Failed;
                self.notify(Some(&e));
                Err(self.log_through_gated(e))
            }
        }
    }

    async fn close_inner(&mut self) -> Result<(), NetError> {
        if self.closed {
            return Ok(());
        }
        if self.event.event_state != NetState::Failed {
            self.event.event_state = NetState::Finished;
        }
        // The terminal call bypasses throttling, and is delivered at
        // most once per request however early the close comes.
        if !self.terminal_notified {
            if let Some(progressor) = self.progressor.clone() {
                progressor(self, None);
                self.terminal_notified = true;
            }
        }
        if self.emitter.is_active() {
            let _ = self.emitter.net_stop_with_update(&self.event);
        }
        self.closed = true;
        self.body = None;
        self.leftover.clear();
        Ok(())
    }
}

#[async_trait]
impl ProgressHandle for ProgressReport {
    fn event(&self) -> &NetworkEvent {
        &self.event
    }

    fn event_mut(&mut self) -> &mut NetworkEvent {
        &mut self.event
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn resp_headers(&self) -> Option<&Headers> {
        self.resp_headers.as_ref()
    }

    fn final_url(&self) -> &str {
        &self.final_url
    }

    fn content(&self) -> Option<String> {
        self.content
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    fn content_bytes(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    fn set_step_max(&mut self, max: u32) {
        self.event.event_step_max = Some(max);
    }

    fn set_step_current(&mut self, current: u32) {
        self.event.event_step_current = Some(current);
    }

    fn unset_step_max(&mut self) {
        self.event.event_step_max = None;
    }

    fn unset_step_current(&mut self) {
        self.event.event_step_current = None;
    }

    fn incr_step_current(&mut self) {
        let (Some(current), Some(max)) = (self.event.event_step_current, self.event.event_step_max)
        else {
            return;
        };
        self.event.event_step_current = Some((current + 1).min(max));
    }

    fn reset_step_current(&mut self) {
        if self.event.event_step_current.is_some() && self.event.event_step_max.is_some() {
            self.event.event_step_current = Some(0);
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        self.len_read(buf, 0, -1).await
    }

    async fn close(&mut self) -> Result<(), NetError> {
        self.close_inner().await
    }
}
