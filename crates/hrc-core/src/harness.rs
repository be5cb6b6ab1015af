//! Test harness for the remote-control protocol.
//!
//! Shared fakes for the collaborator seams (engine, UI, port access) plus
//! small helpers for driving sessions without a real socket. Used by the
//! unit tests across this crate and by the integration tests under
//! `tests/`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::config::RemoteConfig;
use crate::engine::{
    ChangeEvent, ChangeTopic, CommandResult, EngineCommand, PlaybackEngine, PlaybackSnapshot,
};
use crate::errors::PortAccessError;
use crate::hub::BroadcastHub;
use crate::platform::PortAccess;
use crate::session::Session;
use crate::ui::UiBridge;

/// Register a session on `hub` and hand back the raw outbound queue so a
/// test can read exactly what would hit the wire.
pub fn open_session(hub: &BroadcastHub) -> (Arc<Session>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (close_tx, _) = watch::channel(false);
    (hub.register(tx, close_tx), rx)
}

/// Drain every queued text frame and return the `channel` field of each.
pub async fn drain_channels(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
    let mut channels = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            let value: Value = serde_json::from_str(&text).expect("wire frame is json");
            let channel = value
                .get("channel")
                .and_then(Value::as_str)
                .expect("wire frame has channel")
                .to_owned();
            channels.push(channel);
        }
    }
    channels
}

/// A config bound to loopback with an ephemeral port and a fast companion
/// retry, suitable for socket tests.
pub fn loopback_config() -> RemoteConfig {
    RemoteConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        api_version: "1.1.0".to_owned(),
        companion_reconnect_ms: 50,
        ..RemoteConfig::default()
    }
}

/// Playback engine fake: records executed commands, serves a settable
/// snapshot, and lets tests emit changes and completions by hand. With
/// [`ScriptedEngine::enable_echo`] every executed command that carries a
/// request id completes itself immediately, echoing the id in the body.
pub struct ScriptedEngine {
    snapshot: Mutex<PlaybackSnapshot>,
    executed: Mutex<Vec<EngineCommand>>,
    changes: broadcast::Sender<ChangeEvent>,
    results: broadcast::Sender<CommandResult>,
    echo: AtomicBool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::with_snapshot(PlaybackSnapshot::default())
    }

    pub fn with_snapshot(snapshot: PlaybackSnapshot) -> Self {
        let (changes, _) = broadcast::channel(64);
        let (results, _) = broadcast::channel(64);
        Self {
            snapshot: Mutex::new(snapshot),
            executed: Mutex::new(Vec::new()),
            changes,
            results,
            echo: AtomicBool::new(false),
        }
    }

    pub fn enable_echo(&self) {
        self.echo.store(true, Ordering::Release);
    }

    pub fn set_snapshot(&self, snapshot: PlaybackSnapshot) {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    pub fn executed(&self) -> Vec<EngineCommand> {
        self.executed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Emit a playback change as the engine would.
    pub fn emit_change(&self, topic: ChangeTopic, value: Value) {
        let _ = self.changes.send(ChangeEvent::new(topic, value));
    }

    /// Emit a completion as the engine would.
    pub fn complete(&self, request_id: Value, body: Value) {
        let _ = self.results.send(CommandResult { request_id, body });
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackEngine for ScriptedEngine {
    fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn execute(&self, command: EngineCommand) {
        if self.echo.load(Ordering::Acquire) {
            if let Some(request_id) = &command.request_id {
                let body = json!({
                    "namespace": command.namespace,
                    "method": command.method,
                    "requestId": request_id,
                    "value": Value::Null,
                });
                self.complete(request_id.clone(), body);
            }
        }
        self.executed.lock().unwrap_or_else(|e| e.into_inner()).push(command);
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    fn subscribe_results(&self) -> broadcast::Receiver<CommandResult> {
        self.results.subscribe()
    }
}

/// UI bridge fake recording every interaction.
#[derive(Default)]
pub struct RecordingUi {
    codes: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, String)>>,
    confirm_firewall: AtomicBool,
    confirm_requests: AtomicU64,
}

impl RecordingUi {
    pub fn confirming() -> Self {
        let ui = Self::default();
        ui.confirm_firewall.store(true, Ordering::Release);
        ui
    }

    pub fn displayed_codes(&self) -> Vec<String> {
        self.codes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn failures(&self) -> Vec<(String, String)> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn confirm_requests(&self) -> u64 {
        self.confirm_requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UiBridge for RecordingUi {
    async fn display_auth_code(&self, code: &str) {
        self.codes.lock().unwrap_or_else(|e| e.into_inner()).push(code.to_owned());
    }

    async fn confirm_firewall_rule(&self, _port: u16) -> bool {
        self.confirm_requests.fetch_add(1, Ordering::Relaxed);
        self.confirm_firewall.load(Ordering::Acquire)
    }

    async fn report_startup_failure(&self, title: &str, message: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((title.to_owned(), message.to_owned()));
    }
}

/// Port-access fake with a fixed verdict and a call counter.
pub struct StubPortAccess {
    allow: bool,
    calls: AtomicU64,
}

impl StubPortAccess {
    pub fn allowing() -> Self {
        Self { allow: true, calls: AtomicU64::new(0) }
    }

    pub fn denying() -> Self {
        Self { allow: false, calls: AtomicU64::new(0) }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PortAccess for StubPortAccess {
    async fn ensure_port_accessible(&self, _port: u16) -> Result<(), PortAccessError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.allow {
            Ok(())
        } else {
            Err(PortAccessError::Denied)
        }
    }
}
