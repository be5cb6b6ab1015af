//! Server lifecycle manager.
//!
//! `RemoteServer` owns all protocol state: the broadcast hub, the
//! authorization gate, the dispatcher with its correlation map, and the
//! lifecycle state machine `stopped → starting → listening → stopped`.
//! Starting runs the platform port-access pre-check, binds the listener,
//! and spawns the accept loop plus the engine event pumps. Stopping closes
//! the listener and every session. A bind failure is fatal for that start
//! attempt and is reported to the user through the UI bridge; it is never
//! retried automatically.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::companion::spawn_companion;
use crate::config::RemoteConfig;
use crate::dispatch::{DispatchStatsSnapshot, Dispatcher};
use crate::engine::{ChangeEvent, CommandResult, PlaybackEngine};
use crate::errors::ServerError;
use crate::gate::AuthGate;
use crate::hub::BroadcastHub;
use crate::platform::PortAccess;
use crate::session::SessionId;
use crate::settings::SettingsStore;
use crate::ui::UiBridge;

/// Title of the user-visible bind-failure notification.
pub const BIND_FAILURE_TITLE: &str = "Could not start Playback API";

/// Body of the user-visible bind-failure notification.
pub fn bind_failure_message(port: u16) -> String {
    format!(
        "The playback API attempted (and failed) to start on port {port}. \
         Another application is probably using this port"
    )
}

/// Lifecycle state of the listening server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening(SocketAddr),
}

/// The remote-control server. One instance per hosting application; all
/// shared protocol state lives here rather than in globals.
pub struct RemoteServer {
    config: RemoteConfig,
    engine: Arc<dyn PlaybackEngine>,
    ui: Arc<dyn UiBridge>,
    settings: Arc<dyn SettingsStore>,
    port_access: Arc<dyn PortAccess>,
    hub: Arc<BroadcastHub>,
    gate: Arc<AuthGate>,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<ServerState>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RemoteServer {
    pub fn new(
        config: RemoteConfig,
        engine: Arc<dyn PlaybackEngine>,
        ui: Arc<dyn UiBridge>,
        settings: Arc<dyn SettingsStore>,
        port_access: Arc<dyn PortAccess>,
    ) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        let gate = Arc::new(AuthGate::new(config.fixed_auth_code.clone(), ui.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            engine.clone(),
            gate.clone(),
            hub.clone(),
            config.api_version.clone(),
        ));
        Self {
            config,
            engine,
            ui,
            settings,
            port_access,
            hub,
            gate,
            dispatcher,
            state: Mutex::new(ServerState::Stopped),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bring the server up: port-access pre-check, bind, spawn the accept
    /// loop and engine pumps. On a bind failure the user is notified via
    /// the UI bridge and the state returns to `Stopped`.
    pub async fn start(&self) -> Result<(), ServerError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ServerState::Stopped {
                return Err(ServerError::AlreadyRunning);
            }
            *state = ServerState::Starting;
        }
        info!(port = self.config.port, "starting remote api");

        if let Err(error) = self.port_access.ensure_port_accessible(self.config.port).await {
            warn!(%error, "port-access pre-check failed; not binding");
            self.set_state(ServerState::Stopped);
            return Err(error.into());
        }

        let addr = self.config.bind_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                error!(%addr, error = %source, "failed to bind remote api listener");
                self.ui
                    .report_startup_failure(
                        BIND_FAILURE_TITLE,
                        &bind_failure_message(self.config.port),
                    )
                    .await;
                self.set_state(ServerState::Stopped);
                return Err(ServerError::Bind { addr, source });
            }
        };
        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(source) => {
                self.set_state(ServerState::Stopped);
                return Err(ServerError::Bind { addr, source });
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        if let Some(url) = &self.config.companion_url {
            let (handle, task) = spawn_companion(
                url.clone(),
                self.config.companion_reconnect(),
                shutdown_rx.clone(),
            );
            self.hub.attach_companion(handle);
            tasks.push(task);
        }

        tasks.push(tokio::spawn(change_pump(
            self.engine.subscribe_changes(),
            self.hub.clone(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(results_pump(
            self.engine.subscribe_results(),
            self.dispatcher.clone(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(accept_loop(
            listener,
            self.hub.clone(),
            self.gate.clone(),
            self.dispatcher.clone(),
            shutdown_rx,
        )));

        *self.shutdown.lock().unwrap_or_else(|e| e.into_inner()) = Some(shutdown_tx);
        *self.tasks.lock().unwrap_or_else(|e| e.into_inner()) = tasks;
        self.set_state(ServerState::Listening(local));
        info!(%local, "remote api listening");
        Ok(())
    }

    /// Take the server down: close the listener, every session, and the
    /// companion link. Idempotent; a stopped server stays stopped.
    pub async fn stop(&self) {
        let shutdown = self.shutdown.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(shutdown) = shutdown else {
            return;
        };
        info!("stopping remote api");
        let _ = shutdown.send(true);
        self.hub.close_all();
        self.hub.detach_companion();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            let _ = task.await;
        }
        self.set_state(ServerState::Stopped);
        info!("remote api stopped");
    }

    /// Toggle the feature: persist the flag, then start or stop to match.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), ServerError> {
        self.settings.set_remote_enabled(enabled);
        if enabled {
            if self.state() == ServerState::Stopped {
                self.start().await
            } else {
                Ok(())
            }
        } else {
            self.stop().await;
            Ok(())
        }
    }

    /// Side-channel entry point for the pairing flow: authorize `session`
    /// if `code` matches the current challenge.
    pub fn authorize(&self, session: SessionId, code: &str) -> bool {
        if !self.gate.verify(code) {
            debug!(session = %session, "authorization attempt with stale code");
            return false;
        }
        match self.hub.get(session) {
            Some(session) => {
                session.set_authorized();
                info!(session = %session.id(), "session authorized");
                true
            }
            None => {
                debug!(session = %session, "authorization for unknown session");
                false
            }
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.state(), ServerState::Listening(_))
    }

    /// Address actually bound, once listening. With a configured port of 0
    /// this is where the ephemeral port shows up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.state() {
            ServerState::Listening(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.hub.session_ids()
    }

    pub fn session_count(&self) -> usize {
        self.hub.session_count()
    }

    pub fn dispatch_stats(&self) -> DispatchStatsSnapshot {
        self.dispatcher.stats()
    }

    pub fn pending_correlations(&self) -> usize {
        self.dispatcher.pending_correlations()
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

async fn accept_loop(
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
    gate: Arc<AuthGate>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        hub.clone(),
                        gate.clone(),
                        dispatcher.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(error) => warn!(%error, "accept failed"),
            },
        }
    }
    debug!("accept loop ended");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<BroadcastHub>,
    gate: Arc<AuthGate>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws = tokio::select! {
        _ = shutdown.changed() => return,
        handshake = accept_async(stream) => match handshake {
            Ok(ws) => ws,
            Err(error) => {
                debug!(%peer, %error, "websocket handshake failed");
                return;
            }
        },
    };
    let (sink, mut inbound) = ws.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (close_tx, _) = watch::channel(false);
    let session = hub.register(out_tx, close_tx);
    let id = session.id();
    let mut closed = session.subscribe_close();
    let writer = tokio::spawn(write_loop(sink, out_rx));
    info!(session = %id, %peer, "client connected");

    gate.challenge(&session).await;
    dispatcher.initial_burst(&session);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = closed.changed() => break,
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatcher.handle_text(&session, &text).await,
                Some(Ok(Message::Ping(data))) => session.send_frame(Message::Pong(data)),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!(session = %id, %error, "read error");
                    break;
                }
            },
        }
    }

    session.close();
    hub.remove(id);
    dispatcher.purge_session(id);
    let _ = writer.await;
    info!(session = %id, "client disconnected");
}

/// Drain one session's outbound queue into its socket, in order. Ends after
/// forwarding a close frame or when the session handle is dropped.
async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() {
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn change_pump(
    mut changes: broadcast::Receiver<ChangeEvent>,
    hub: Arc<BroadcastHub>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = changes.recv() => match event {
                Ok(event) => hub.broadcast_change(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "change stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn results_pump(
    mut results: broadcast::Receiver<CommandResult>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = results.recv() => match result {
                Ok(result) => dispatcher.deliver_result(&result),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "result stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
