//! Broadcast hub: the set of connected sessions and the fan-out path for
//! playback-state changes. Changes also reach the optional companion sink,
//! which lives outside the session set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::companion::CompanionHandle;
use crate::engine::ChangeEvent;
use crate::session::{Session, SessionId};

/// Registry of live sessions plus the companion sink handle.
pub struct BroadcastHub {
    sessions: DashMap<SessionId, Arc<Session>>,
    next_id: AtomicU64,
    companion: Mutex<Option<CompanionHandle>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            companion: Mutex::new(None),
        }
    }

    /// Create a session around a freshly accepted connection's outbound
    /// queue and add it to the broadcast set.
    pub(crate) fn register(
        &self,
        outbound: mpsc::UnboundedSender<Message>,
        close_signal: watch::Sender<bool>,
    ) -> Arc<Session> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Session::new(id, outbound, close_signal));
        self.sessions.insert(id, session.clone());
        debug!(session = %id, total = self.sessions.len(), "session registered");
        session
    }

    /// Drop a session from the broadcast set.
    pub(crate) fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&id).map(|(_, session)| session);
        if removed.is_some() {
            debug!(session = %id, total = self.sessions.len(), "session removed");
        }
        removed
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn attach_companion(&self, handle: CompanionHandle) {
        *self.companion.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub(crate) fn detach_companion(&self) {
        *self.companion.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Fan a playback change out to every session and the companion sink,
    /// applying the wire renaming.
    pub fn broadcast_change(&self, event: &ChangeEvent) {
        self.broadcast(event.topic.wire_channel(), &event.value);
    }

    /// Fan an already-named channel out to every session and the companion.
    pub fn broadcast(&self, channel: &str, payload: &Value) {
        for entry in self.sessions.iter() {
            entry.value().send_notification(channel, payload.clone());
        }
        if let Some(companion) = &*self.companion.lock().unwrap_or_else(|e| e.into_inner()) {
            companion.channel(channel, payload.clone());
        }
    }

    /// Close every session (server shutdown path).
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().close();
        }
        self.sessions.clear();
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
