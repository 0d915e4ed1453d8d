use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::options::FetchOptions;

/// Request/response headers as they appear on the wire: one name, many values.
pub type Headers = BTreeMap<String, Vec<String>>;

/// HTTP request methods recognized by the fetch engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Connect,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a network event relative to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetDirection {
    #[default]
    Outgoing,
    Incoming,
}

/// Lifecycle state of a network event.
///
/// Transitions form a DAG: Waiting → (Retry →)* Established → Responded →
/// Transfer* → (Finished | Failed). Non-OK HTTP responses terminate as
/// `Finished`, not `Failed`; only transport errors fail an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetState {
    #[default]
    Waiting,
    Paused,
    Retry,
    Established,
    Responded,
    Transfer,
    Finished,
    Failed,
}

/// Scheduling priority of a network event. Only `unset` exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetPriority {
    #[default]
    Unset,
}

/// How the stepping counter advances.
///
/// In `Auto` mode the current step tracks `transferred / size`; in `Manual`
/// mode only the explicit stepping operations move it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    #[default]
    Manual,
    Auto,
}

/// Identifies the element that initiated a request: either a textual path
/// tag or an element index path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Initiator {
    Path(String),
    Element(Vec<i64>),
}

impl Initiator {
    /// Prefix an initiator with a context tag, `prefix::existing`.
    ///
    /// Element-path initiators are rendered through their debug form since
    /// they have no textual representation to join onto.
    pub fn prepend(initiator: Option<&Initiator>, prefix: &str) -> Initiator {
        match initiator {
            None => Initiator::Path(prefix.to_string()),
            Some(Initiator::Path(p)) => Initiator::Path(format!("{prefix}::{p}")),
            Some(Initiator::Element(e)) => Initiator::Path(format!("{prefix}::{e:?}")),
        }
    }
}

/// The single telemetry record tracked per request.
///
/// Serialized with snake_case keys onto the debugger wire; the attached
/// [`FetchOptions`] are never part of the encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator: Option<Initiator>,
    pub method: HttpMethod,
    pub priority: NetPriority,

    #[serde(skip)]
    pub options: FetchOptions,

    pub meta_buffer_size: i64,
    pub meta_is_stream: bool,
    pub meta_as_file: bool,
    pub meta_direction: NetDirection,
    /// Mbit/s, -1 when unknown.
    pub meta_speed: f64,
    /// Milliseconds, -1 when unknown.
    pub meta_time_to_con: i64,
    /// Milliseconds, -1 when unknown.
    pub meta_time_to_first_byte: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_got_first_resp: Option<DateTime<Utc>>,
    /// 1-based attempt counter.
    pub meta_retry_attempt: u32,

    pub status: u16,
    pub client_ip: String,
    pub remote: String,
    pub remote_ip: String,
    pub protocol: String,
    pub scheme: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_headers: Option<Headers>,

    pub transferred: i64,
    /// -1 when unknown.
    pub size: i64,

    pub event_state: NetState,
    pub event_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_step_current: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_step_max: Option<u32>,
    pub event_step_mode: StepMode,
    pub interrupted: bool,
}

impl NetworkEvent {
    /// A fresh outgoing event in the `Waiting` state.
    pub fn outgoing(id: String, method: HttpMethod, remote: String, options: FetchOptions) -> Self {
        let headers = options.headers.clone();
        let step_max = options.event_step_max;
        let step_mode = options.event_step_mode;
        let buffer_size = options.buffer_size;
        NetworkEvent {
            id,
            context: None,
            initiator: None,
            method,
            priority: NetPriority::Unset,
            options,
            meta_buffer_size: buffer_size,
            meta_is_stream: false,
            meta_as_file: false,
            meta_direction: NetDirection::Outgoing,
            meta_speed: -1.0,
            meta_time_to_con: -1,
            meta_time_to_first_byte: -1,
            meta_got_first_resp: None,
            meta_retry_attempt: 1,
            status: 200,
            client_ip: String::new(),
            remote,
            remote_ip: String::new(),
            protocol: String::new(),
            scheme: String::new(),
            content_type: String::new(),
            headers,
            resp_headers: None,
            transferred: 0,
            size: -1,
            event_state: NetState::Waiting,
            event_success: false,
            event_step_current: None,
            event_step_max: step_max,
            event_step_mode: step_mode,
            interrupted: false,
        }
    }

    /// Recompute the stepping counter from `transferred / size`.
    ///
    /// Only applies in `Auto` mode with a known size and a configured
    /// maximum; the result is clamped to `0..=step_max`.
    pub fn calc_step(&mut self) {
        if self.event_step_mode != StepMode::Auto {
            return;
        }
        let Some(max) = self.event_step_max else {
            return;
        };
        if self.size <= 0 || self.transferred < 0 {
            return;
        }

        let step = (self.transferred.saturating_mul(i64::from(max))) / self.size;
        let step = step.clamp(0, i64::from(max)) as u32;
        self.event_step_current = Some(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> NetworkEvent {
        NetworkEvent::outgoing(
            "Fw.Net.Fetch:1".into(),
            HttpMethod::Get,
            "http://example.com".into(),
            FetchOptions::default(),
        )
    }

    #[test]
    fn auto_step_tracks_transferred() {
        let mut ev = event();
        ev.event_step_mode = StepMode::Auto;
        ev.event_step_max = Some(10);
        ev.size = 200;

        ev.transferred = 0;
        ev.calc_step();
        assert_eq!(ev.event_step_current, Some(0));

        ev.transferred = 100;
        ev.calc_step();
        assert_eq!(ev.event_step_current, Some(5));

        ev.transferred = 200;
        ev.calc_step();
        assert_eq!(ev.event_step_current, Some(10));

        // Overshoot clamps to the maximum.
        ev.transferred = 999;
        ev.calc_step();
        assert_eq!(ev.event_step_current, Some(10));
    }

    #[test]
    fn manual_mode_never_moves_the_step() {
        let mut ev = event();
        ev.event_step_mode = StepMode::Manual;
        ev.event_step_max = Some(4);
        ev.size = 100;
        ev.transferred = 50;
        ev.calc_step();
        assert_eq!(ev.event_step_current, None);
    }

    #[test]
    fn unknown_size_leaves_the_step_alone() {
        let mut ev = event();
        ev.event_step_mode = StepMode::Auto;
        ev.event_step_max = Some(4);
        ev.size = -1;
        ev.transferred = 50;
        ev.calc_step();
        assert_eq!(ev.event_step_current, None);
    }

    #[test]
    fn json_round_trip_omits_options() {
        let mut ev = event();
        ev.context = Some("ctx".into());
        ev.initiator = Some(Initiator::Path("Fw.Test".into()));
        ev.event_step_max = Some(3);
        ev.event_step_current = Some(1);

        let value = serde_json::to_value(&ev).unwrap();
        assert!(value.get("options").is_none());
        assert!(value.get("buffersize").is_none());
        assert_eq!(value["event_state"], "waiting");
        assert_eq!(value["method"], "GET");
        assert_eq!(value["meta_direction"], "outgoing");

        let back: NetworkEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, ev.id);
        assert_eq!(back.context, ev.context);
        assert_eq!(back.initiator, ev.initiator);
        assert_eq!(back.event_step_current, Some(1));
        assert_eq!(back.size, ev.size);
    }

    #[test]
    fn initiator_forms_serialize_distinctly() {
        let p = serde_json::to_value(Initiator::Path("a::b".into())).unwrap();
        assert_eq!(p, serde_json::json!("a::b"));
        let e = serde_json::to_value(Initiator::Element(vec![0, 3, 1])).unwrap();
        assert_eq!(e, serde_json::json!([0, 3, 1]));
    }

    #[test]
    fn prepend_initiator_builds_path_tags() {
        let none = Initiator::prepend(None, "Fw.Net.Chibit.Chunk");
        assert_eq!(none, Initiator::Path("Fw.Net.Chibit.Chunk".into()));
        let some = Initiator::prepend(Some(&Initiator::Path("app".into())), "Fw.Net.Chibit.Chunk");
        assert_eq!(some, Initiator::Path("Fw.Net.Chibit.Chunk::app".into()));
    }
}
