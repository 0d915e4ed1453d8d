use tokio_util::sync::CancellationToken;

use crate::event::{Headers, StepMode};

/// Configuration recognized by the fetch engine, attached to every request.
///
/// Two baselines exist: [`FetchOptions::empty`] disables timeouts and
/// retries entirely, while the [`Default`] implementation carries the
/// engine defaults (32 KiB buffer, 30 s timeout, 2 timeout retries, 5 s
/// dial timeout, automatic stepping).
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Stream/copy chunk size in bytes; negative values fall back to 32 KiB.
    pub buffer_size: i64,
    /// -2 uses the response's content length, -1 marks the size unknown,
    /// anything else overrides it.
    pub total_size_override: i64,
    /// Request headers applied verbatim.
    pub headers: Option<Headers>,
    /// Caller-supplied HTTP client; bypasses internal client construction.
    pub client: Option<reqwest::Client>,
    /// Disable TLS certificate verification.
    pub insecure_skip_verify: bool,
    /// Overall request deadline in seconds; zero or less means none.
    pub timeout_secs: i64,
    /// External cancellation handle, observed at every suspension point.
    pub cancel: Option<CancellationToken>,
    /// Extra attempts on timeout; only effective together with a timeout.
    pub retry_timeouts: i32,
    /// Per-dial deadline in seconds; zero or less means none. Dial
    /// timeouts do not consume retries.
    pub dial_timeout_secs: i64,
    /// Collect IPs, protocol and cloned headers; implicitly enabled while
    /// the debug emitter is active.
    pub resolve_additional_info: bool,
    /// Resolve the hostname before issuing the request.
    pub dns_pre_check: bool,
    /// The progress report closes itself when a read reaches EOF.
    pub auto_read_eof_close: bool,
    /// Enables the stepping counter when set.
    pub event_step_max: Option<u32>,
    pub event_step_mode: StepMode,
    /// Throttle (ms) for progressor calls while in the Transfer state;
    /// zero or less calls through every time.
    pub progressor_interval_ms: i64,
    /// Throttle (ms) for emitter updates while in the Transfer state.
    pub debugger_interval_ms: i64,
    /// Names of response prefix handlers allowed to run for this request.
    pub enabled_prefix_handlers: Vec<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            buffer_size: 32 * 1024,
            total_size_override: -2,
            headers: None,
            client: None,
            insecure_skip_verify: false,
            timeout_secs: 30,
            cancel: None,
            retry_timeouts: 2,
            dial_timeout_secs: 5,
            resolve_additional_info: false,
            dns_pre_check: false,
            auto_read_eof_close: false,
            event_step_max: None,
            event_step_mode: StepMode::Auto,
            progressor_interval_ms: 0,
            debugger_interval_ms: 0,
            enabled_prefix_handlers: Vec::new(),
        }
    }
}

impl FetchOptions {
    /// A sensible empty: no timeout, no retries, manual stepping.
    pub fn empty() -> Self {
        FetchOptions {
            timeout_secs: -1,
            retry_timeouts: -1,
            dial_timeout_secs: -1,
            event_step_mode: StepMode::Manual,
            ..FetchOptions::default()
        }
    }

    #[must_use]
    pub fn buffer_size(mut self, bytes: i64) -> Self {
        self.buffer_size = bytes;
        self
    }

    #[must_use]
    pub fn total_size_override(mut self, size: i64) -> Self {
        self.total_size_override = size;
        self
    }

    /// Add a single request header, keeping any already configured.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Replace all request headers.
    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    #[must_use]
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    #[must_use]
    pub fn timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn retry_timeouts(mut self, retries: i32) -> Self {
        self.retry_timeouts = retries;
        self
    }

    #[must_use]
    pub fn dial_timeout_secs(mut self, secs: i64) -> Self {
        self.dial_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn resolve_additional_info(mut self, resolve: bool) -> Self {
        self.resolve_additional_info = resolve;
        self
    }

    #[must_use]
    pub fn dns_pre_check(mut self, check: bool) -> Self {
        self.dns_pre_check = check;
        self
    }

    #[must_use]
    pub fn auto_read_eof_close(mut self, auto: bool) -> Self {
        self.auto_read_eof_close = auto;
        self
    }

    #[must_use]
    pub fn step_max(mut self, max: Option<u32>) -> Self {
        self.event_step_max = max;
        self
    }

    #[must_use]
    pub fn step_mode(mut self, mode: StepMode) -> Self {
        self.event_step_mode = mode;
        self
    }

    #[must_use]
    pub fn progressor_interval_ms(mut self, ms: i64) -> Self {
        self.progressor_interval_ms = ms;
        self
    }

    #[must_use]
    pub fn debugger_interval_ms(mut self, ms: i64) -> Self {
        self.debugger_interval_ms = ms;
        self
    }

    /// Allow a named prefix handler to run for this request.
    #[must_use]
    pub fn enable_prefix_handler(mut self, name: impl Into<String>) -> Self {
        self.enabled_prefix_handlers.push(name.into());
        self
    }

    /// The effective copy chunk size after the negative-value fallback.
    pub fn effective_buffer_size(&self) -> usize {
        if self.buffer_size < 0 {
            32 * 1024
        } else {
            self.buffer_size as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_carries_engine_defaults() {
        let op = FetchOptions::default();
        assert_eq!(op.buffer_size, 32 * 1024);
        assert_eq!(op.timeout_secs, 30);
        assert_eq!(op.retry_timeouts, 2);
        assert_eq!(op.dial_timeout_secs, 5);
        assert_eq!(op.event_step_mode, StepMode::Auto);
        assert_eq!(op.total_size_override, -2);
    }

    #[test]
    fn empty_disables_deadlines_and_retries() {
        let op = FetchOptions::empty();
        assert_eq!(op.timeout_secs, -1);
        assert_eq!(op.retry_timeouts, -1);
        assert_eq!(op.dial_timeout_secs, -1);
        assert_eq!(op.event_step_mode, StepMode::Manual);
    }

    #[test]
    fn negative_buffer_size_falls_back() {
        let op = FetchOptions::default().buffer_size(-5);
        assert_eq!(op.effective_buffer_size(), 32 * 1024);
    }

    #[test]
    fn header_builder_accumulates() {
        let op = FetchOptions::default()
            .header("Accept", "application/json")
            .header("Accept", "text/html")
            .header("X-Tag", "a");
        let headers = op.headers.unwrap();
        assert_eq!(headers["Accept"], vec!["application/json", "text/html"]);
        assert_eq!(headers["X-Tag"], vec!["a"]);
    }
}
