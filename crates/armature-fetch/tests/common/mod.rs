//! Shared scaffolding for fetch integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use armature_core::{
    Debugger, EmitError, FrameworkConfig, FrameworkState, LogError, LogLevel, Logger, NetState,
    ProgressHandle, Progressor,
};
use armature_fetch::FetchEngine;
use armature_verify::Checker;
use serde_json::Value;

/// Logger that swallows everything; tests assert on events, not lines.
pub struct SilentLogger;

impl Logger for SilentLogger {
    fn log(&self, _level: LogLevel, _message: &str) -> Result<(), LogError> {
        Ok(())
    }

    fn log_through_line(&self, _line: &str) {}
}

/// An always-active debugger that records every envelope it is handed.
#[derive(Default)]
pub struct CaptureDebugger {
    pub envelopes: Mutex<Vec<Value>>,
}

impl CaptureDebugger {
    pub fn count_signal(&self, signal: &str) -> usize {
        self.envelopes
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e["signal"] == signal)
            .count()
    }
}

impl Debugger for CaptureDebugger {
    fn is_active(&self) -> bool {
        true
    }

    fn send(&self, envelope: Value) -> Result<(), EmitError> {
        self.envelopes.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// One observed progressor invocation.
#[derive(Debug, Clone)]
pub struct Observed {
    pub state: NetState,
    pub attempt: u32,
    pub status: u16,
    pub success: bool,
    pub transferred: i64,
    pub size: i64,
    pub error: Option<String>,
}

#[derive(Default, Clone)]
pub struct EventTrace {
    inner: Arc<Mutex<Vec<Observed>>>,
}

impl EventTrace {
    pub fn progressor(&self) -> Progressor {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |report: &mut dyn ProgressHandle, err| {
            let event = report.event();
            inner.lock().unwrap().push(Observed {
                state: event.event_state,
                attempt: event.meta_retry_attempt,
                status: event.status,
                success: event.event_success,
                transferred: event.transferred,
                size: event.size,
                error: err.map(|e| e.to_string()),
            });
        })
    }

    pub fn observed(&self) -> Vec<Observed> {
        self.inner.lock().unwrap().clone()
    }

    pub fn last(&self) -> Observed {
        self.inner.lock().unwrap().last().cloned().expect("no events observed")
    }

    pub fn terminal_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|o| matches!(o.state, NetState::Finished | NetState::Failed))
            .count()
    }
}

/// Engine wired with a silent logger and the given debugger.
pub fn engine_with(emitter: Arc<dyn Debugger>) -> FetchEngine {
    let config = Arc::new(FrameworkConfig::default());
    let state = Arc::new(FrameworkState::default());
    let logger = Arc::new(SilentLogger);
    let chck = Arc::new(Checker::new(logger.clone()));
    FetchEngine::new(config, state, emitter, logger, chck, None)
}

pub fn quiet_engine() -> FetchEngine {
    engine_with(Arc::new(armature_core::NoopDebugger))
}
