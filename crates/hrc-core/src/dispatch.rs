//! Command dispatcher: routes decoded inbound traffic, enforces the
//! authorization gate, forwards commands to the playback engine, and
//! correlates asynchronous results back to the session that asked.
//!
//! Inbound handling order: decode, bootstrap short-circuit, shape
//! validation, authorization, forward, correlate. Malformed traffic is
//! logged and dropped without an answer on the wire; the only thing an
//! unauthorized client ever gets back is the challenge notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::burst::send_initial_burst;
use crate::codec::{self, Command, Envelope};
use crate::engine::{CommandResult, EngineCommand, PlaybackEngine};
use crate::gate::AuthGate;
use crate::hub::BroadcastHub;
use crate::session::{Session, SessionId};

/// Counters over everything the dispatcher has seen. Relaxed atomics; the
/// snapshot is a point-in-time read, not a consistent cut.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    decode_errors: AtomicU64,
    bursts: AtomicU64,
    challenges: AtomicU64,
    forwarded: AtomicU64,
    results_delivered: AtomicU64,
    results_dropped: AtomicU64,
}

/// Point-in-time view of [`DispatchStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    pub decode_errors: u64,
    pub bursts: u64,
    pub challenges: u64,
    pub forwarded: u64,
    pub results_delivered: u64,
    pub results_dropped: u64,
}

impl DispatchStats {
    fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            bursts: self.bursts.load(Ordering::Relaxed),
            challenges: self.challenges.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            results_delivered: self.results_delivered.load(Ordering::Relaxed),
            results_dropped: self.results_dropped.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Routes inbound envelopes and owns the pending-correlation map.
pub struct Dispatcher {
    engine: Arc<dyn PlaybackEngine>,
    gate: Arc<AuthGate>,
    hub: Arc<BroadcastHub>,
    api_version: String,
    correlations: DashMap<String, SessionId>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn PlaybackEngine>,
        gate: Arc<AuthGate>,
        hub: Arc<BroadcastHub>,
        api_version: String,
    ) -> Self {
        Self {
            engine,
            gate,
            hub,
            api_version,
            correlations: DashMap::new(),
            stats: DispatchStats::default(),
        }
    }

    /// Handle one inbound text frame from `session`.
    pub async fn handle_text(&self, session: &Session, text: &str) {
        DispatchStats::bump(&self.stats.received);
        let envelope = match codec::decode(text) {
            Ok(envelope) => envelope,
            Err(error) => {
                DispatchStats::bump(&self.stats.decode_errors);
                warn!(session = %session.id(), %error, message = text, "dropping malformed message");
                return;
            }
        };
        match envelope {
            Envelope::Command(command) => self.handle_command(session, command).await,
            Envelope::Disconnect => {
                // Meaningful on the companion link only.
                debug!(session = %session.id(), "disconnect signal ignored for websocket session");
            }
            Envelope::Notification(notification) => {
                DispatchStats::bump(&self.stats.decode_errors);
                warn!(
                    session = %session.id(),
                    channel = %notification.channel,
                    "dropping notification-shaped message on inbound path"
                );
            }
        }
    }

    async fn handle_command(&self, session: &Session, command: Command) {
        if command.is_bootstrap() {
            DispatchStats::bump(&self.stats.bursts);
            self.initial_burst(session);
            return;
        }
        let Some(method) = command.method else {
            DispatchStats::bump(&self.stats.decode_errors);
            warn!(
                session = %session.id(),
                namespace = %command.namespace,
                "dropping command without method"
            );
            return;
        };
        let arguments = command.arguments.unwrap_or_default();
        if !session.is_authorized() {
            DispatchStats::bump(&self.stats.challenges);
            debug!(
                session = %session.id(),
                namespace = %command.namespace,
                %method,
                "unauthorized command; issuing challenge"
            );
            self.gate.challenge(session).await;
            return;
        }
        // Register the correlation before the engine sees the command, so a
        // completion cannot beat it into the map.
        if let Some(request_id) = &command.request_id {
            self.correlations.insert(correlation_key(request_id), session.id());
        }
        self.engine.execute(EngineCommand {
            namespace: command.namespace,
            method,
            arguments,
            request_id: command.request_id,
        });
        DispatchStats::bump(&self.stats.forwarded);
    }

    /// Push the burst to `session` from the engine's current snapshot.
    /// Used on connect and on every bootstrap request.
    pub fn initial_burst(&self, session: &Session) {
        send_initial_burst(session, &self.api_version, &self.engine.snapshot());
    }

    /// Deliver an engine completion to whichever session awaits it. The
    /// correlation is consumed either way; a completion for a departed
    /// session is a silent skip.
    pub fn deliver_result(&self, result: &CommandResult) {
        let key = correlation_key(&result.request_id);
        let Some((_, session_id)) = self.correlations.remove(&key) else {
            DispatchStats::bump(&self.stats.results_dropped);
            debug!(request_id = %key, "no pending correlation for result");
            return;
        };
        match self.hub.get(session_id) {
            Some(session) if !session.is_closed() => {
                session.send_result(&result.body);
                DispatchStats::bump(&self.stats.results_delivered);
            }
            _ => {
                DispatchStats::bump(&self.stats.results_dropped);
                debug!(session = %session_id, "requesting session gone; result skipped");
            }
        }
    }

    /// Drop all correlations held for a departed session.
    pub fn purge_session(&self, id: SessionId) {
        self.correlations.retain(|_, owner| *owner != id);
    }

    pub fn pending_correlations(&self) -> usize {
        self.correlations.len()
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Request ids are opaque JSON values; the map keys on their compact JSON
/// form, which is stable for the verbatim value the client sent.
fn correlation_key(request_id: &Value) -> String {
    request_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{drain_channels, open_session, RecordingUi, ScriptedEngine};
    use serde_json::json;

    struct Fixture {
        dispatcher: Dispatcher,
        engine: Arc<ScriptedEngine>,
        ui: Arc<RecordingUi>,
        hub: Arc<BroadcastHub>,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(ScriptedEngine::with_snapshot(crate::engine::PlaybackSnapshot {
            playing: true,
            shuffle: json!("NO_SHUFFLE"),
            repeat: json!("LIST_REPEAT"),
            volume: json!(70),
            track: Some(json!({"title": "Aria"})),
        }));
        let ui = Arc::new(RecordingUi::default());
        let hub = Arc::new(BroadcastHub::new());
        let gate = Arc::new(AuthGate::new(Some("0000".into()), ui.clone()));
        let dispatcher =
            Dispatcher::new(engine.clone(), gate, hub.clone(), "1.1.0".into());
        Fixture { dispatcher, engine, ui, hub }
    }

    #[tokio::test]
    async fn bootstrap_is_exempt_from_authorization() {
        let f = fixture();
        let (session, mut rx) = open_session(&f.hub);

        f.dispatcher.handle_text(&session, r#"{"namespace":"initial_burst"}"#).await;

        let channels = drain_channels(&mut rx).await;
        assert_eq!(
            channels,
            vec!["API_VERSION", "playState", "shuffle", "repeat", "volume", "track"]
        );
        assert!(f.ui.displayed_codes().is_empty());
        assert_eq!(f.dispatcher.stats().bursts, 1);
    }

    #[tokio::test]
    async fn bootstrap_with_extra_fields_still_bursts() {
        let f = fixture();
        let (session, mut rx) = open_session(&f.hub);

        f.dispatcher
            .handle_text(
                &session,
                r#"{"namespace":"initial_burst","method":"x","requestId":7}"#,
            )
            .await;

        assert_eq!(drain_channels(&mut rx).await.len(), 6);
        assert_eq!(f.dispatcher.pending_correlations(), 0);
    }

    #[tokio::test]
    async fn unauthorized_command_challenges_and_is_not_forwarded() {
        let f = fixture();
        let (session, mut rx) = open_session(&f.hub);

        f.dispatcher
            .handle_text(
                &session,
                r#"{"namespace":"playback","method":"play","arguments":[],"requestId":"r1"}"#,
            )
            .await;

        let frame = rx.recv().await.unwrap().into_text().unwrap();
        assert_eq!(frame, r#"{"channel":"connect","payload":"CODE_REQUIRED"}"#);
        assert!(rx.try_recv().is_err());
        assert!(f.engine.executed().is_empty());
        assert_eq!(f.dispatcher.pending_correlations(), 0);
        assert_eq!(f.ui.displayed_codes().len(), 1);
        assert_eq!(f.dispatcher.stats().challenges, 1);
    }

    #[tokio::test]
    async fn every_unauthorized_attempt_reissues_the_challenge() {
        let f = fixture();
        let (session, _rx) = open_session(&f.hub);

        for _ in 0..3 {
            f.dispatcher
                .handle_text(&session, r#"{"namespace":"playback","method":"play"}"#)
                .await;
        }

        assert_eq!(f.ui.displayed_codes().len(), 3);
        assert_eq!(f.dispatcher.stats().challenges, 3);
    }

    #[tokio::test]
    async fn authorized_command_is_forwarded_with_default_arguments() {
        let f = fixture();
        let (session, mut rx) = open_session(&f.hub);
        session.set_authorized();

        f.dispatcher
            .handle_text(&session, r#"{"namespace":"playback","method":"play"}"#)
            .await;

        let executed = f.engine.executed();
        assert_eq!(
            executed,
            vec![EngineCommand {
                namespace: "playback".into(),
                method: "play".into(),
                arguments: vec![],
                request_id: None,
            }]
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(f.dispatcher.stats().forwarded, 1);
    }

    #[tokio::test]
    async fn result_is_delivered_once_with_verbatim_request_id() {
        let f = fixture();
        let (session, mut rx) = open_session(&f.hub);
        session.set_authorized();

        f.dispatcher
            .handle_text(
                &session,
                r#"{"namespace":"playback","method":"setVolume","arguments":[40],"requestId":{"seq":1}}"#,
            )
            .await;
        assert_eq!(f.dispatcher.pending_correlations(), 1);

        let body = json!({"namespace": "playback", "requestId": {"seq": 1}, "value": null});
        let result = CommandResult { request_id: json!({"seq": 1}), body: body.clone() };
        f.dispatcher.deliver_result(&result);

        let frame = rx.recv().await.unwrap().into_text().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&frame).unwrap(), body);
        assert_eq!(f.dispatcher.pending_correlations(), 0);

        // A second completion for the same id has nothing to consume.
        f.dispatcher.deliver_result(&result);
        assert!(rx.try_recv().is_err());
        let stats = f.dispatcher.stats();
        assert_eq!(stats.results_delivered, 1);
        assert_eq!(stats.results_dropped, 1);
    }

    #[tokio::test]
    async fn results_for_departed_sessions_are_skipped() {
        let f = fixture();
        let (session, _rx) = open_session(&f.hub);
        session.set_authorized();

        f.dispatcher
            .handle_text(
                &session,
                r#"{"namespace":"playback","method":"play","requestId":"r9"}"#,
            )
            .await;
        f.hub.remove(session.id());

        f.dispatcher.deliver_result(&CommandResult {
            request_id: json!("r9"),
            body: json!({"requestId": "r9"}),
        });

        let stats = f.dispatcher.stats();
        assert_eq!(stats.results_delivered, 0);
        assert_eq!(stats.results_dropped, 1);
        assert_eq!(f.dispatcher.pending_correlations(), 0);
    }

    #[tokio::test]
    async fn purge_drops_only_that_sessions_correlations() {
        let f = fixture();
        let (a, _rx_a) = open_session(&f.hub);
        let (b, _rx_b) = open_session(&f.hub);
        a.set_authorized();
        b.set_authorized();

        f.dispatcher
            .handle_text(&a, r#"{"namespace":"playback","method":"play","requestId":"a1"}"#)
            .await;
        f.dispatcher
            .handle_text(&b, r#"{"namespace":"playback","method":"play","requestId":"b1"}"#)
            .await;
        assert_eq!(f.dispatcher.pending_correlations(), 2);

        f.dispatcher.purge_session(a.id());
        assert_eq!(f.dispatcher.pending_correlations(), 1);
    }

    #[tokio::test]
    async fn command_without_method_is_dropped_without_challenge() {
        let f = fixture();
        let (session, mut rx) = open_session(&f.hub);

        f.dispatcher.handle_text(&session, r#"{"namespace":"playback"}"#).await;

        assert!(rx.try_recv().is_err());
        assert!(f.engine.executed().is_empty());
        assert!(f.ui.displayed_codes().is_empty());
        assert_eq!(f.dispatcher.stats().decode_errors, 1);
    }

    #[tokio::test]
    async fn malformed_traffic_is_counted_and_silent() {
        let f = fixture();
        let (session, mut rx) = open_session(&f.hub);

        for text in ["garbage", "[]", r#"{"foo":1}"#, r#"{"channel":"x","payload":1}"#] {
            f.dispatcher.handle_text(&session, text).await;
        }

        assert!(rx.try_recv().is_err());
        assert_eq!(f.dispatcher.stats().decode_errors, 4);
        assert_eq!(f.dispatcher.stats().received, 4);
    }

    #[tokio::test]
    async fn disconnect_signal_is_a_no_op_for_sessions() {
        let f = fixture();
        let (session, mut rx) = open_session(&f.hub);

        f.dispatcher.handle_text(&session, r#"{"type":"disconnect"}"#).await;

        assert!(rx.try_recv().is_err());
        assert!(f.engine.executed().is_empty());
        assert_eq!(f.dispatcher.stats().decode_errors, 0);
    }

    #[tokio::test]
    async fn results_can_interleave_with_broadcasts_per_session_order() {
        let f = fixture();
        let (session, mut rx) = open_session(&f.hub);
        session.set_authorized();

        f.dispatcher
            .handle_text(&session, r#"{"namespace":"playback","method":"play","requestId":1}"#)
            .await;
        f.hub.broadcast("volume", &json!(10));
        f.dispatcher
            .deliver_result(&CommandResult { request_id: json!(1), body: json!({"requestId": 1}) });

        let first = rx.recv().await.unwrap().into_text().unwrap();
        let second = rx.recv().await.unwrap().into_text().unwrap();
        assert_eq!(first, r#"{"channel":"volume","payload":10}"#);
        assert_eq!(second, r#"{"requestId":1}"#);
    }
}
