//! Per-connection session wrapper.
//!
//! A [`Session`] composes the raw socket instead of augmenting it: the
//! connection task owns the actual websocket, and the session only holds the
//! handle to its outbound queue. The queue is drained by a single writer
//! task, so everything pushed through [`Session::send_notification`] and
//! [`Session::send_result`] reaches the transport in call order.
//!
//! All sends are best-effort. Once the session is closed (or the writer is
//! gone) they become silent no-ops; nothing here ever errors toward the
//! caller.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{trace, warn};

use crate::codec::{self, Notification};

/// Identifier assigned to a session when its connection is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side representative of one connected client.
pub struct Session {
    id: SessionId,
    authorized: AtomicBool,
    closed: AtomicBool,
    outbound: mpsc::UnboundedSender<Message>,
    close_signal: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        outbound: mpsc::UnboundedSender<Message>,
        close_signal: watch::Sender<bool>,
    ) -> Self {
        Self {
            id,
            authorized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            outbound,
            close_signal,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether this session has passed the authorization gate.
    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::Acquire)
    }

    pub(crate) fn set_authorized(&self) {
        self.authorized.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue an outbound `{channel, payload}` notification.
    pub fn send_notification(&self, channel: &str, payload: Value) {
        match codec::encode(&Notification::new(channel, payload)) {
            Ok(text) => self.send_text(text),
            Err(error) => warn!(session = %self.id, %error, "failed to encode notification"),
        }
    }

    /// Queue a raw result object for an asynchronous command completion.
    pub fn send_result(&self, body: &Value) {
        match serde_json::to_string(body) {
            Ok(text) => self.send_text(text),
            Err(error) => warn!(session = %self.id, %error, "failed to encode result"),
        }
    }

    /// Close the session. Idempotent: the first call queues a close frame
    /// and wakes the connection task; later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Message::Close(None));
        let _ = self.close_signal.send(true);
    }

    /// Watch that flips to `true` when [`Session::close`] runs.
    pub(crate) fn subscribe_close(&self) -> watch::Receiver<bool> {
        self.close_signal.subscribe()
    }

    /// Queue a raw protocol frame (pong replies, mainly).
    pub(crate) fn send_frame(&self, message: Message) {
        if self.is_closed() {
            return;
        }
        if self.outbound.send(message).is_err() {
            trace!(session = %self.id, "dropping frame for departed writer");
        }
    }

    fn send_text(&self, text: String) {
        if self.is_closed() {
            trace!(session = %self.id, "dropping message for closed session");
            return;
        }
        if self.outbound.send(Message::Text(text)).is_err() {
            trace!(session = %self.id, "dropping message for departed writer");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("authorized", &self.is_authorized())
            .field("closed", &self.is_closed())
            .finish()
    }
}
