//! Companion sink: one outbound WebSocket connection to an external platform
//! integration. It receives the same renamed change notifications as the
//! session set. The link reconnects with a fixed delay, except after the
//! remote end sends `{"type": "disconnect"}`, which suppresses reconnection
//! until the server is next started.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::codec::{self, Envelope, Notification};

/// Sending side of the companion link, held by the broadcast hub.
#[derive(Clone)]
pub struct CompanionHandle {
    tx: mpsc::UnboundedSender<Notification>,
}

impl CompanionHandle {
    /// Queue a `{channel, payload}` notification for the companion.
    /// Best-effort, like session sends.
    pub fn channel(&self, channel: &str, payload: serde_json::Value) {
        let _ = self.tx.send(Notification::new(channel, payload));
    }
}

/// Start the companion client task. The handle feeds it; the task ends when
/// `shutdown` flips, when the remote asks to disconnect and the connection
/// then drops, or when the handle side is gone.
pub(crate) fn spawn_companion(
    url: String,
    reconnect_delay: Duration,
    shutdown: watch::Receiver<bool>,
) -> (CompanionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_companion(url, reconnect_delay, rx, shutdown));
    (CompanionHandle { tx }, task)
}

async fn run_companion(
    url: String,
    reconnect_delay: Duration,
    mut rx: mpsc::UnboundedReceiver<Notification>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reconnect = true;
    while reconnect && !*shutdown.borrow() {
        match connect_async(&url).await {
            Ok((ws, _)) => {
                info!(%url, "companion link established");
                let (mut sink, mut stream) = ws.split();
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }
                        outbound = rx.recv() => match outbound {
                            Some(notification) => match codec::encode(&notification) {
                                Ok(text) => {
                                    if sink.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(error) => {
                                    warn!(%error, "failed to encode companion notification");
                                }
                            },
                            // Hub side is gone; nothing left to deliver.
                            None => return,
                        },
                        inbound = stream.next() => match inbound {
                            Some(Ok(Message::Text(text))) => {
                                if matches!(codec::decode(&text), Ok(Envelope::Disconnect)) {
                                    info!("companion asked to disconnect; reconnection suppressed");
                                    reconnect = false;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if sink.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(error)) => {
                                debug!(%error, "companion read error");
                                break;
                            }
                        }
                    }
                }
                if reconnect {
                    debug!("companion link lost");
                }
            }
            Err(error) => {
                warn!(%url, %error, "companion connect failed");
            }
        }
        if reconnect && !*shutdown.borrow() {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(reconnect_delay) => {}
            }
        }
    }
}
