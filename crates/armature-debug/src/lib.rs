//! Bidirectional UDP signaling to an out-of-process debugger.
//!
//! The emitter mirrors framework activity (network events, log lines,
//! usage samples) to a debugger as one JSON envelope per datagram, and
//! listens for inbound command signals. It is a pure sink for the rest of
//! the framework: nothing flows back into the engine through it.
//!
//! # Lifecycle
//!
//! [`DebugEmitter::activate`] opens an ephemeral outbound socket, binds
//! the inbound socket, and spawns a sender and a listener task.
//! [`DebugEmitter::deactivate`] stops both (the sender drains its queue
//! first) and releases the sockets. Both calls are idempotent; a
//! deactivated emitter can be activated again.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use armature_core::{Debugger, EmitError, FrameworkConfig};
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Callback invoked for an inbound signal. Runs on its own task so a slow
/// handler cannot block the listener.
pub type SignalHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Outbound queue capacity; envelopes beyond this are dropped.
const SEND_QUEUE_CAPACITY: usize = 100;
/// Largest accepted inbound datagram.
const MAX_DATAGRAM: usize = 64 * 1024;

struct ActiveState {
    tx: mpsc::Sender<Value>,
    cancel: CancellationToken,
    sender: JoinHandle<()>,
    listener: JoinHandle<()>,
    listen_addr: SocketAddr,
}

/// The UDP debug emitter. See the crate docs for the lifecycle contract.
pub struct DebugEmitter {
    config: Arc<FrameworkConfig>,
    handlers: Arc<RwLock<HashMap<String, SignalHandler>>>,
    latency_ms: Arc<AtomicI64>,
    active: AtomicBool,
    state: Mutex<Option<ActiveState>>,
}

impl DebugEmitter {
    pub fn new(config: Arc<FrameworkConfig>) -> Self {
        DebugEmitter {
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            latency_ms: Arc::new(AtomicI64::new(-1)),
            active: AtomicBool::new(false),
            state: Mutex::new(None),
        }
    }

    /// Open both sockets and start the sender and listener tasks.
    /// Calling an already-active emitter is a no-op.
    pub async fn activate(&self) -> std::io::Result<()> {
        if self.active.load(Ordering::SeqCst) {
            return Ok(());
        }

        let host = self.config.debug_host().to_string();
        let send_target = tokio::net::lookup_host((host.as_str(), self.config.debug_send_port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "debugger host did not resolve")
            })?;

        let out_sock = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let in_sock = UdpSocket::bind((host.as_str(), self.config.debug_listen_port)).await?;
        let listen_addr = in_sock.local_addr()?;

        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        let sender = tokio::spawn(send_loop(out_sock, send_target, rx, cancel.clone()));
        let listener = tokio::spawn(listen_loop(
            in_sock,
            cancel.clone(),
            Arc::clone(&self.handlers),
            Arc::clone(&self.latency_ms),
        ));

        let mut state = self.state.lock().expect("emitter state poisoned");
        *state = Some(ActiveState {
            tx,
            cancel,
            sender,
            listener,
            listen_addr,
        });
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop both loops and release the sockets. The sender drains queued
    /// envelopes before exiting. Calling an inactive emitter is a no-op.
    pub async fn deactivate(&self) {
        let taken = {
            let mut state = self.state.lock().expect("emitter state poisoned");
            self.active.store(false, Ordering::SeqCst);
            state.take()
        };

        if let Some(state) = taken {
            state.cancel.cancel();
            drop(state.tx);
            let _ = state.sender.await;
            let _ = state.listener.await;
        }
    }

    /// Alias for [`deactivate`](DebugEmitter::deactivate).
    pub async fn close(&self) {
        self.deactivate().await;
    }

    /// Register a handler for an inbound signal name, replacing any
    /// previous registration.
    pub fn register_for(&self, signal: impl Into<String>, handler: SignalHandler) {
        self.handlers
            .write()
            .expect("emitter handlers poisoned")
            .insert(signal.into(), handler);
    }

    /// Answer inbound `misc:ping` signals with `misc:pong`.
    pub fn register_ping_responder(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.register_for(
            "misc:ping",
            Arc::new(move |_msg| {
                if let Some(emitter) = weak.upgrade() {
                    let _ = emitter.pong();
                }
            }),
        );
    }

    /// Round-trip latency observed from the last timestamped inbound
    /// datagram, in milliseconds. -1 until one has been seen.
    pub fn last_known_latency_ms(&self) -> i64 {
        self.latency_ms.load(Ordering::Relaxed)
    }

    /// The bound inbound address while active. Mainly useful when the
    /// configured listen port is 0.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .expect("emitter state poisoned")
            .as_ref()
            .map(|s| s.listen_addr)
    }
}

impl Debugger for DebugEmitter {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn send(&self, envelope: Value) -> Result<(), EmitError> {
        if !self.is_active() {
            return Err(EmitError::Inactive);
        }
        let tx = {
            let state = self.state.lock().expect("emitter state poisoned");
            match state.as_ref() {
                Some(s) => s.tx.clone(),
                None => return Err(EmitError::Inactive),
            }
        };
        tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EmitError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => EmitError::Inactive,
        })
    }
}

/// Inject the wire metadata and write one datagram.
async fn emit_datagram(sock: &UdpSocket, target: SocketAddr, mut envelope: Value) {
    if let Value::Object(map) = &mut envelope {
        map.insert("protocol".into(), Value::from(armature_core::PROTOCOL_VERSION));
        map.insert(
            "sent".into(),
            Value::from(chrono::Utc::now().timestamp_millis()),
        );
    }
    let Ok(data) = serde_json::to_vec(&envelope) else {
        return;
    };
    // Connectionless send; nobody has to be listening.
    let _ = sock.send_to(&data, target).await;
}

async fn send_loop(
    sock: UdpSocket,
    target: SocketAddr,
    mut rx: mpsc::Receiver<Value>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Drain whatever is still queued, then exit.
                while let Ok(envelope) = rx.try_recv() {
                    emit_datagram(&sock, target, envelope).await;
                }
                return;
            }
            envelope = rx.recv() => match envelope {
                Some(envelope) => emit_datagram(&sock, target, envelope).await,
                None => return,
            }
        }
    }
}

async fn listen_loop(
    sock: UdpSocket,
    cancel: CancellationToken,
    handlers: Arc<RwLock<HashMap<String, SignalHandler>>>,
    latency_ms: Arc<AtomicI64>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            // One-second deadline so the stop signal is observed promptly.
            res = tokio::time::timeout(Duration::from_secs(1), sock.recv_from(&mut buf)) => res,
        };

        let (n, _peer) = match received {
            Err(_deadline) => continue,
            Ok(Ok(recv)) => recv,
            Ok(Err(_)) => {
                // Back off briefly on persistent read errors.
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        if n == 0 {
            continue;
        }

        let Ok(msg) = serde_json::from_slice::<Value>(&buf[..n]) else {
            continue;
        };

        if let Some(sent) = msg.get("sent").and_then(Value::as_f64) {
            let now = chrono::Utc::now().timestamp_millis();
            latency_ms.store(now - sent as i64, Ordering::Relaxed);
        }

        let Some(signal) = msg.get("signal").and_then(Value::as_str) else {
            continue;
        };
        let handler = handlers
            .read()
            .expect("emitter handlers poisoned")
            .get(signal)
            .cloned();
        if let Some(handler) = handler {
            // A slow handler must not block the read loop.
            tokio::spawn(async move { handler(msg) });
        }
    }
}
