//! Integration tests for the remote-control server over real sockets.
//!
//! These tests verify the complete end-to-end workflows including:
//! - Connect (challenge then initial burst)
//! - Pairing and command forwarding with request correlation
//! - Broadcast fan-out to every connected client
//! - Lifecycle (bind failure, firewall denial, stop and restart)
//! - The companion link (mirroring, reconnect, disconnect signal)

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};

use hrc_core::config::RemoteConfig;
use hrc_core::engine::{ChangeTopic, EngineCommand, PlaybackSnapshot};
use hrc_core::errors::{PortAccessError, ServerError};
use hrc_core::harness::{loopback_config, RecordingUi, ScriptedEngine, StubPortAccess};
use hrc_core::platform::OpenPortAccess;
use hrc_core::server::{bind_failure_message, RemoteServer, ServerState, BIND_FAILURE_TITLE};
use hrc_core::session::SessionId;
use hrc_core::settings::{MemorySettings, SettingsStore};

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Rig {
    server: Arc<RemoteServer>,
    engine: Arc<ScriptedEngine>,
    ui: Arc<RecordingUi>,
    settings: Arc<MemorySettings>,
}

fn build_rig(config: RemoteConfig) -> Rig {
    let engine = Arc::new(ScriptedEngine::new());
    let ui = Arc::new(RecordingUi::confirming());
    let settings = Arc::new(MemorySettings::new(false));
    let server = Arc::new(RemoteServer::new(
        config,
        engine.clone(),
        ui.clone(),
        settings.clone(),
        Arc::new(OpenPortAccess),
    ));
    Rig { server, engine, ui, settings }
}

async fn start_rig() -> (Rig, SocketAddr) {
    let rig = build_rig(loopback_config());
    rig.server.start().await.expect("server start");
    let addr = rig.server.local_addr().expect("listening address");
    (rig, addr)
}

async fn connect_client(addr: SocketAddr) -> Client {
    let (client, _) = timeout(WAIT, connect_async(format!("ws://{addr}")))
        .await
        .expect("connect timed out")
        .expect("websocket connect");
    client
}

/// Read the next text frame as JSON, skipping pings.
async fn next_frame<S>(stream: &mut S) -> Value
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let frame = timeout(WAIT, stream.next())
            .await
            .expect("read timed out")
            .expect("connection ended")
            .expect("read failed");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).expect("frame is json"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn read_frames<S>(stream: &mut S, count: usize) -> Vec<Value>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        frames.push(next_frame(stream).await);
    }
    frames
}

fn channels(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .map(|frame| frame["channel"].as_str().expect("frame has channel").to_owned())
        .collect()
}

/// Pair the most recently challenged session using the code the UI showed.
fn pair(rig: &Rig) -> SessionId {
    let code = rig.ui.displayed_codes().pop().expect("challenge displayed");
    let id = rig.server.session_ids().pop().expect("session registered");
    assert!(rig.server.authorize(id, &code), "pairing code accepted");
    id
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

/// Test: A fresh connection gets the challenge, then the burst in order.
#[tokio::test]
async fn integration_connect_issues_challenge_then_initial_burst() {
    let (rig, addr) = start_rig().await;
    let mut client = connect_client(addr).await;

    let frames = read_frames(&mut client, 6).await;
    assert_eq!(
        channels(&frames),
        ["connect", "API_VERSION", "playState", "shuffle", "repeat", "volume"]
    );
    assert_eq!(frames[0]["payload"], json!("CODE_REQUIRED"));
    assert_eq!(frames[1]["payload"], json!("1.1.0"));
    assert_eq!(frames[2]["payload"], json!(false));

    let codes = rig.ui.displayed_codes();
    assert_eq!(codes.len(), 1);
    assert_eq!(codes[0].len(), 4);
    assert!(codes[0].chars().all(|c| c.is_ascii_digit()));
}

/// Test: With a loaded track the burst carries it as the final frame.
#[tokio::test]
async fn integration_initial_burst_includes_track_when_available() {
    let (rig, addr) = start_rig().await;
    rig.engine.set_snapshot(PlaybackSnapshot {
        playing: true,
        volume: json!(80),
        track: Some(json!({"title": "Aurora", "artist": "Iris"})),
        ..PlaybackSnapshot::default()
    });

    let mut client = connect_client(addr).await;
    let frames = read_frames(&mut client, 7).await;

    assert_eq!(channels(&frames)[6], "track");
    assert_eq!(frames[6]["payload"]["title"], json!("Aurora"));
    assert_eq!(frames[2]["payload"], json!(true));
    assert_eq!(frames[5]["payload"], json!(80));
}

/// Test: The bootstrap request repeats the burst without pairing.
#[tokio::test]
async fn integration_bootstrap_command_repeats_the_burst() {
    let (_rig, addr) = start_rig().await;
    let mut client = connect_client(addr).await;
    read_frames(&mut client, 6).await;

    client
        .send(Message::Text(r#"{"namespace":"initial_burst"}"#.into()))
        .await
        .expect("send bootstrap");

    let frames = read_frames(&mut client, 5).await;
    assert_eq!(
        channels(&frames),
        ["API_VERSION", "playState", "shuffle", "repeat", "volume"]
    );
}

/// Test: Commands from an unpaired client reissue the challenge and never
/// reach the engine.
#[tokio::test]
async fn integration_commands_before_pairing_reissue_the_challenge() {
    let (rig, addr) = start_rig().await;
    let mut client = connect_client(addr).await;
    read_frames(&mut client, 6).await;

    client
        .send(Message::Text(
            r#"{"namespace":"playback","method":"playPause"}"#.into(),
        ))
        .await
        .expect("send command");

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["channel"], json!("connect"));
    assert_eq!(frame["payload"], json!("CODE_REQUIRED"));
    assert_eq!(rig.ui.displayed_codes().len(), 2);
    assert!(rig.engine.executed().is_empty());
    assert_eq!(rig.server.dispatch_stats().challenges, 1);
}

/// Test: Pairing unlocks forwarding, and a completion comes back to the
/// requesting client with the verbatim request id.
#[tokio::test]
async fn integration_pairing_unlocks_command_forwarding() {
    let (rig, addr) = start_rig().await;
    rig.engine.enable_echo();
    let mut client = connect_client(addr).await;
    read_frames(&mut client, 6).await;

    pair(&rig);
    client
        .send(Message::Text(
            r#"{"namespace":"playback","method":"setVolume","arguments":[55],"requestId":7}"#
                .into(),
        ))
        .await
        .expect("send command");

    let result = next_frame(&mut client).await;
    assert_eq!(result["requestId"], json!(7));
    assert_eq!(result["namespace"], json!("playback"));
    assert_eq!(result["method"], json!("setVolume"));

    wait_until(|| !rig.engine.executed().is_empty()).await;
    assert_eq!(
        rig.engine.executed()[0],
        EngineCommand {
            namespace: "playback".to_owned(),
            method: "setVolume".to_owned(),
            arguments: vec![json!(55)],
            request_id: Some(json!(7)),
        }
    );
    assert_eq!(rig.server.dispatch_stats().results_delivered, 1);
    assert_eq!(rig.server.pending_correlations(), 0);
}

/// Test: Wrong codes and unknown sessions are rejected, and the session
/// stays locked.
#[tokio::test]
async fn integration_stale_codes_and_unknown_sessions_are_rejected() {
    let (rig, addr) = start_rig().await;
    let mut client = connect_client(addr).await;
    read_frames(&mut client, 6).await;

    let id = rig.server.session_ids().pop().expect("session registered");
    assert!(!rig.server.authorize(id, "wrong"));
    assert!(!rig.server.authorize(SessionId(4040), &rig.ui.displayed_codes()[0]));

    client
        .send(Message::Text(
            r#"{"namespace":"playback","method":"playPause"}"#.into(),
        ))
        .await
        .expect("send command");
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["channel"], json!("connect"));
    assert!(rig.engine.executed().is_empty());
}

/// Test: Every connected client sees every change exactly once, in order,
/// with the wire renaming applied.
#[tokio::test]
async fn integration_playback_changes_fan_out_to_every_client() {
    let (rig, addr) = start_rig().await;
    let mut first = connect_client(addr).await;
    read_frames(&mut first, 6).await;
    let mut second = connect_client(addr).await;
    read_frames(&mut second, 6).await;

    rig.engine.emit_change(ChangeTopic::State, json!(true));
    rig.engine.emit_change(ChangeTopic::Volume, json!(25));

    for client in [&mut first, &mut second] {
        let state = next_frame(client).await;
        assert_eq!(state["channel"], json!("playState"));
        assert_eq!(state["payload"], json!(true));
        let volume = next_frame(client).await;
        assert_eq!(volume["channel"], json!("volume"));
        assert_eq!(volume["payload"], json!(25));
        let extra = timeout(Duration::from_millis(150), client.next()).await;
        assert!(extra.is_err(), "unexpected extra frame: {extra:?}");
    }
}

/// Test: A completion for a client that already left is skipped, and its
/// correlation does not linger.
#[tokio::test]
async fn integration_results_for_departed_sessions_are_skipped() {
    let (rig, addr) = start_rig().await;
    let mut client = connect_client(addr).await;
    read_frames(&mut client, 6).await;
    pair(&rig);

    client
        .send(Message::Text(
            r#"{"namespace":"playback","method":"getPlaybackTime","requestId":9}"#.into(),
        ))
        .await
        .expect("send command");
    wait_until(|| !rig.engine.executed().is_empty()).await;
    assert_eq!(rig.server.pending_correlations(), 1);

    client.close(None).await.expect("client close");
    wait_until(|| rig.server.session_count() == 0).await;
    wait_until(|| rig.server.pending_correlations() == 0).await;

    rig.engine.complete(json!(9), json!({"value": 120}));
    wait_until(|| rig.server.dispatch_stats().results_dropped == 1).await;
    assert_eq!(rig.server.dispatch_stats().results_delivered, 0);
}

/// Test: Malformed frames and the companion-only disconnect signal are
/// dropped without killing the connection.
#[tokio::test]
async fn integration_malformed_frames_leave_the_connection_open() {
    let (rig, addr) = start_rig().await;
    let mut client = connect_client(addr).await;
    read_frames(&mut client, 6).await;

    for raw in [
        "definitely not json",
        r#"{"bogus":true}"#,
        r#"{"channel":"volume","payload":1}"#,
        r#"{"namespace":"playback"}"#,
        r#"{"type":"disconnect"}"#,
    ] {
        client
            .send(Message::Text(raw.into()))
            .await
            .expect("send frame");
    }

    client
        .send(Message::Text(r#"{"namespace":"initial_burst"}"#.into()))
        .await
        .expect("send bootstrap");
    let frames = read_frames(&mut client, 5).await;
    assert_eq!(channels(&frames)[0], "API_VERSION");

    wait_until(|| rig.server.dispatch_stats().decode_errors == 4).await;
    assert!(rig.engine.executed().is_empty());
}

/// Test: A bind conflict surfaces through the UI bridge and leaves the
/// server stopped.
#[tokio::test]
async fn integration_bind_conflict_reports_startup_failure() {
    let occupant = TcpListener::bind("127.0.0.1:0").await.expect("occupy a port");
    let port = occupant.local_addr().expect("occupant addr").port();

    let mut config = loopback_config();
    config.port = port;
    let rig = build_rig(config);

    let error = rig.server.start().await.expect_err("start must fail");
    assert!(matches!(error, ServerError::Bind { .. }));
    assert_eq!(rig.server.state(), ServerState::Stopped);

    let failures = rig.ui.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, BIND_FAILURE_TITLE);
    assert_eq!(failures[0].1, bind_failure_message(port));
}

/// Test: A denied port-access pre-check aborts startup before bind, with
/// no bind-failure report.
#[tokio::test]
async fn integration_firewall_denial_blocks_startup() {
    let engine = Arc::new(ScriptedEngine::new());
    let ui = Arc::new(RecordingUi::default());
    let settings = Arc::new(MemorySettings::new(false));
    let port_access = Arc::new(StubPortAccess::denying());
    let server = RemoteServer::new(
        loopback_config(),
        engine,
        ui.clone(),
        settings,
        port_access.clone(),
    );

    let error = server.start().await.expect_err("start must fail");
    assert!(matches!(
        error,
        ServerError::PortAccess(PortAccessError::Denied)
    ));
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(ui.failures().is_empty());
    assert_eq!(port_access.calls(), 1);
}

/// Test: Stop closes every session and the server can start again.
#[tokio::test]
async fn integration_stop_closes_sessions_and_allows_restart() {
    let (rig, addr) = start_rig().await;
    let mut client = connect_client(addr).await;
    read_frames(&mut client, 6).await;

    rig.server.stop().await;
    assert_eq!(rig.server.state(), ServerState::Stopped);
    assert_eq!(rig.server.session_count(), 0);
    loop {
        match timeout(WAIT, client.next()).await.expect("close timed out") {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }

    rig.server.start().await.expect("restart");
    let addr = rig.server.local_addr().expect("listening again");
    let mut second = connect_client(addr).await;
    let frame = next_frame(&mut second).await;
    assert_eq!(frame["channel"], json!("connect"));
    rig.server.stop().await;
}

/// Test: The enable toggle persists the flag and drives the lifecycle.
#[tokio::test]
async fn integration_set_enabled_persists_the_flag_and_drives_lifecycle() {
    let rig = build_rig(loopback_config());

    rig.server.set_enabled(true).await.expect("enable");
    assert!(rig.server.is_listening());
    assert!(rig.settings.remote_enabled());

    rig.server.set_enabled(true).await.expect("idempotent enable");
    assert!(rig.server.is_listening());

    rig.server.set_enabled(false).await.expect("disable");
    assert_eq!(rig.server.state(), ServerState::Stopped);
    assert!(!rig.settings.remote_enabled());
}

async fn accept_companion(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("companion dial timed out")
        .expect("accept companion");
    timeout(WAIT, accept_async(stream))
        .await
        .expect("handshake timed out")
        .expect("companion handshake")
}

/// Test: The companion link mirrors renamed broadcasts, redials after a
/// drop, and stays down after the disconnect signal.
#[tokio::test]
async fn integration_companion_mirrors_broadcasts_and_honors_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("companion listener");
    let companion_addr = listener.local_addr().expect("companion addr");

    let mut config = loopback_config();
    config.companion_url = Some(format!("ws://{companion_addr}"));
    let rig = build_rig(config);
    rig.server.start().await.expect("server start");

    let mut link = accept_companion(&listener).await;
    rig.engine.emit_change(ChangeTopic::State, json!(false));
    let frame = next_frame(&mut link).await;
    assert_eq!(frame["channel"], json!("playState"));
    assert_eq!(frame["payload"], json!(false));

    link.close(None).await.expect("close link");
    drop(link);
    let mut link = accept_companion(&listener).await;
    rig.engine.emit_change(ChangeTopic::Volume, json!(70));
    let frame = next_frame(&mut link).await;
    assert_eq!(frame["channel"], json!("volume"));
    assert_eq!(frame["payload"], json!(70));

    link.send(Message::Text(r#"{"type":"disconnect"}"#.into()))
        .await
        .expect("send disconnect");
    link.close(None).await.expect("close link");
    let redial = timeout(Duration::from_millis(400), listener.accept()).await;
    assert!(redial.is_err(), "companion redialed after disconnect signal");

    rig.server.stop().await;
}
